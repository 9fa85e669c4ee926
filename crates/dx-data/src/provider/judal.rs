//! judal.co.kr 테마/종목 페이지 크롤러.
//!
//! ## 페이지
//! - `/?view=themeList`: 테마 링크 목록
//! - `/?view=stockList&themeIdx={idx}`: 테마별 종목 지표 테이블
//!
//! 파싱은 순수 함수(`parse_theme_list`, `parse_stock_list`)로 분리되어 있어
//! 고정 HTML로 테스트합니다.

use chrono::Utc;
use dx_core::{Stock, StockIndicators, ThemeEntry};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{DataError, Result};

pub const DEFAULT_BASE_URL: &str = "https://www.judal.co.kr";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 테마/종목 페이지 클라이언트.
pub struct JudalClient {
    client: Client,
    base_url: String,
}

impl JudalClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| DataError::FetchError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_page(&self, query: &[(&str, &str)]) -> Result<String> {
        let html = self
            .client
            .get(format!("{}/", self.base_url))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(html)
    }

    /// 테마 목록을 가져옵니다.
    pub async fn fetch_themes(&self) -> Result<Vec<ThemeEntry>> {
        let html = self.get_page(&[("view", "themeList")]).await?;
        parse_theme_list(&html)
    }

    /// 테마의 종목 목록을 가져옵니다.
    pub async fn fetch_theme_stocks(&self, theme_idx: i64) -> Result<Vec<Stock>> {
        let idx = theme_idx.to_string();
        let html = self
            .get_page(&[("view", "stockList"), ("themeIdx", idx.as_str())])
            .await?;
        parse_stock_list(&html)
    }
}

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| DataError::ParseError(format!("selector {}: {:?}", s, e)))
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| DataError::ParseError(e.to_string()))
}

/// 테마 목록 HTML에서 `(theme_idx, name)`을 추출합니다. 첫 등장 순서를 유지합니다.
pub fn parse_theme_list(html: &str) -> Result<Vec<ThemeEntry>> {
    let doc = Html::parse_document(html);
    let link = selector("a[href*='view=stockList'][href*='themeIdx=']")?;
    let idx_re = regex(r"themeIdx=(\d+)")?;

    let mut seen = HashSet::new();
    let mut themes = Vec::new();
    for a in doc.select(&link) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Some(theme_idx) = idx_re
            .captures(href)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
        else {
            continue;
        };

        let name = a.text().collect::<String>().trim().to_string();
        if name.is_empty() || name.contains("테마토크") {
            continue;
        }
        if seen.insert(theme_idx) {
            themes.push(ThemeEntry { theme_idx, name });
        }
    }
    Ok(themes)
}

/// 종목 테이블 HTML을 파싱합니다. 코드나 이름이 없는 행은 건너뜁니다.
pub fn parse_stock_list(html: &str) -> Result<Vec<Stock>> {
    let doc = Html::parse_document(html);
    let row_sel = selector("table tbody tr")?;
    let first_cell_sel = selector("th[scope='row'], td")?;
    let naver_link_sel = selector("a[href*='finance.naver.com']")?;
    let code_link_sel = selector("a[href*='code=']")?;
    let td_sel = selector("td")?;
    let code_re = regex(r"code=(\d{6})")?;

    let now = Utc::now();
    let mut stocks = Vec::new();

    for row in doc.select(&row_sel) {
        let Some(first_cell) = row.select(&first_cell_sel).next() else {
            continue;
        };
        let Some(link) = first_cell
            .select(&naver_link_sel)
            .next()
            .or_else(|| first_cell.select(&code_link_sel).next())
        else {
            continue;
        };

        let code = link
            .value()
            .attr("href")
            .and_then(|href| code_re.captures(href))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let link_text = link.text().collect::<String>();
        let link_text = link_text.trim();
        let name = link_text.lines().next().unwrap_or_default().trim().to_string();
        if code.is_empty() || name.is_empty() {
            continue;
        }

        let market = if link_text.contains("KOSPI") {
            "KOSPI"
        } else if link_text.contains("KOSDAQ") {
            "KOSDAQ"
        } else {
            ""
        };

        let cells: Vec<ElementRef> = row.select(&td_sel).collect();
        stocks.push(Stock {
            code,
            name,
            market: market.to_string(),
            indicators: parse_indicators(&cells),
            updated_at: now,
        });
    }
    Ok(stocks)
}

fn clean_number(text: &str) -> String {
    text.replace([',', '%'], "").trim().to_string()
}

/// 0 또는 파싱 불가 값은 `None`.
fn int_cell(text: &str) -> Option<i64> {
    clean_number(text).parse::<i64>().ok().filter(|v| *v != 0)
}

fn float_cell(text: &str) -> Option<f64> {
    clean_number(text).parse::<f64>().ok().filter(|v| *v != 0.0)
}

/// 위치 기반 컬럼 매핑.
fn parse_indicators(cells: &[ElementRef]) -> StockIndicators {
    let text = |i: usize| -> String {
        cells
            .get(i)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    };

    StockIndicators {
        current_price: int_cell(&text(0)),
        price_change: int_cell(&text(1)),
        change_rate: float_cell(&text(2)),
        three_day_sum: float_cell(&text(3)),
        high_52w: int_cell(&text(4)),
        low_52w: int_cell(&text(5)),
        neglect_index_52w: float_cell(&text(8)),
        price_index_3y: float_cell(&text(12)),
        expected_return: float_cell(&text(13)),
        pbr: float_cell(&text(14)),
        per: float_cell(&text(15)),
        eps: int_cell(&text(16)),
        // 억 원 단위
        market_cap: int_cell(&text(17)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEME_HTML: &str = r#"
        <html><body>
            <a href="/?view=stockList&themeIdx=12">반도체</a>
            <a href="/?view=stockList&themeIdx=7">2차전지</a>
            <a href="/?view=stockList&themeIdx=12">반도체</a>
            <a href="/?view=stockList&themeIdx=99">테마토크</a>
            <a href="/?view=stockList&themeIdx=3">  </a>
            <a href="/?view=themeList">전체</a>
        </body></html>
    "#;

    fn stock_row(code: &str, name: &str, market: &str, cells: &[&str]) -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
        format!(
            r#"<tr><th scope="row"><a href="https://finance.naver.com/item/main.naver?code={code}">{name}
                <span>{market}</span></a></th>{tds}</tr>"#
        )
    }

    #[test]
    fn test_parse_theme_list_dedups_and_skips() {
        let themes = parse_theme_list(THEME_HTML).unwrap();
        assert_eq!(
            themes,
            vec![
                ThemeEntry { theme_idx: 12, name: "반도체".to_string() },
                ThemeEntry { theme_idx: 7, name: "2차전지".to_string() },
            ]
        );
    }

    #[test]
    fn test_parse_stock_list_columns() {
        let cells = [
            "71,200", "-300", "-0.42%", "1.5", "88,800", "65,800", "x", "x", "12.3",
            "x", "x", "x", "95.1", "21.4%", "1.21", "13.5", "5,275", "4,250,000",
        ];
        let html = format!(
            "<table><tbody>{}{}</tbody></table>",
            stock_row("005930", "삼성전자", "KOSPI", &cells),
            r#"<tr><th scope="row">합계</th><td>1</td></tr>"#
        );

        let stocks = parse_stock_list(&html).unwrap();
        assert_eq!(stocks.len(), 1);

        let s = &stocks[0];
        assert_eq!(s.code, "005930");
        assert_eq!(s.name, "삼성전자");
        assert_eq!(s.market, "KOSPI");
        assert_eq!(s.indicators.current_price, Some(71_200));
        assert_eq!(s.indicators.price_change, Some(-300));
        assert_eq!(s.indicators.change_rate, Some(-0.42));
        assert_eq!(s.indicators.high_52w, Some(88_800));
        assert_eq!(s.indicators.neglect_index_52w, Some(12.3));
        assert_eq!(s.indicators.price_index_3y, Some(95.1));
        assert_eq!(s.indicators.expected_return, Some(21.4));
        assert_eq!(s.indicators.pbr, Some(1.21));
        assert_eq!(s.indicators.per, Some(13.5));
        assert_eq!(s.indicators.eps, Some(5_275));
        assert_eq!(s.indicators.market_cap, Some(4_250_000));
        assert_eq!(s.indicators.volume_index, None);
    }

    #[test]
    fn test_zero_and_garbage_become_none() {
        let html = format!(
            "<table><tbody>{}</tbody></table>",
            stock_row("035720", "카카오", "KOSDAQ", &["0", "-", "N/A"])
        );
        let stocks = parse_stock_list(&html).unwrap();
        assert_eq!(stocks[0].market, "KOSDAQ");
        assert_eq!(stocks[0].indicators.current_price, None);
        assert_eq!(stocks[0].indicators.price_change, None);
        assert_eq!(stocks[0].indicators.change_rate, None);
        assert_eq!(stocks[0].indicators.market_cap, None);
    }

    #[tokio::test]
    async fn test_fetch_theme_stocks() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "<table><tbody>{}</tbody></table>",
            stock_row("000660", "SK하이닉스", "KOSPI", &["180,000"])
        );
        server
            .mock("GET", "/")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("view".into(), "stockList".into()),
                mockito::Matcher::UrlEncoded("themeIdx".into(), "12".into()),
            ]))
            .with_body(body)
            .create_async()
            .await;

        let client = JudalClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let stocks = client.fetch_theme_stocks(12).await.unwrap();
        assert_eq!(stocks[0].code, "000660");
        assert_eq!(stocks[0].indicators.current_price, Some(180_000));
    }
}
