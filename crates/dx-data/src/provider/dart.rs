//! OpenDART API 클라이언트.
//!
//! ## 엔드포인트
//! - `corpCode.xml`: 전체 기업 고유번호 (XML이 담긴 ZIP)
//! - `list.json`: 기간별 공시 목록 (페이지당 100건)
//! - `document.xml`: 공시 원문 (ZIP)

use chrono::{NaiveDate, TimeZone, Utc};
use dx_core::{Corp, Filing};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::http_client;
use crate::error::{DataError, Result};

pub const DEFAULT_BASE_URL: &str = "https://opendart.fss.or.kr/api";

const STATUS_OK: &str = "000";
const STATUS_NO_DATA: &str = "013";
const PAGE_COUNT: u32 = 100;

#[derive(Debug, Deserialize)]
struct ListResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    total_page: u32,
    #[serde(default)]
    list: Vec<Filing>,
}

/// 공시 목록 한 페이지.
#[derive(Debug, Clone)]
pub struct FilingPage {
    pub filings: Vec<Filing>,
    pub page_no: u32,
    pub total_page: u32,
}

/// 저장된 원문 파일.
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    pub path: PathBuf,
    pub sha256: String,
    pub size: usize,
}

/// OpenDART 클라이언트.
pub struct DartClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl DartClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            // 기업 코드 ZIP이 수 MB라서 여유 있게
            client: http_client(Duration::from_secs(60))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_bytes(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(&[("crtfc_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// 전체 기업 목록을 내려받습니다.
    pub async fn corp_codes(&self) -> Result<Vec<Corp>> {
        let bytes = self.get_bytes("corpCode.xml", &[]).await?;
        let xml = first_zip_entry(&bytes)?;
        let corps = parse_corp_codes(&xml)?;
        info!(count = corps.len(), "DART corp codes downloaded");
        Ok(corps)
    }

    /// 공시 목록 한 페이지를 조회합니다. 데이터가 없으면 빈 페이지.
    pub async fn filings_page(&self, bgn_de: &str, end_de: &str, page_no: u32) -> Result<FilingPage> {
        let page = page_no.to_string();
        let page_count = PAGE_COUNT.to_string();
        let bytes = self
            .get_bytes(
                "list.json",
                &[
                    ("bgn_de", bgn_de),
                    ("end_de", end_de),
                    ("page_count", page_count.as_str()),
                    ("page_no", page.as_str()),
                ],
            )
            .await?;

        let response: ListResponse = serde_json::from_slice(&bytes)?;
        match response.status.as_str() {
            STATUS_OK => Ok(FilingPage {
                filings: response.list,
                page_no,
                total_page: response.total_page,
            }),
            STATUS_NO_DATA => Ok(FilingPage {
                filings: Vec::new(),
                page_no,
                total_page: 0,
            }),
            other => Err(DataError::Upstream {
                status: 200,
                context: format!("DART list.json {}: {}", other, response.message),
            }),
        }
    }

    /// 기간 내 모든 페이지의 공시를 조회합니다.
    pub async fn filings(&self, bgn_de: &str, end_de: &str) -> Result<Vec<Filing>> {
        let mut all = Vec::new();
        let mut page_no = 1;
        loop {
            let page = self.filings_page(bgn_de, end_de, page_no).await?;
            debug!(page_no, total_page = page.total_page, count = page.filings.len(), "DART filings page");
            let empty = page.filings.is_empty();
            all.extend(page.filings);
            if empty || page_no >= page.total_page {
                break;
            }
            page_no += 1;
        }
        Ok(all)
    }

    /// 공시 원문 ZIP을 `dest_dir/{rcept_no}.zip`에 저장하고 SHA-256을 계산합니다.
    pub async fn download_document(&self, rcept_no: &str, dest_dir: &Path) -> Result<DownloadedDocument> {
        let bytes = self
            .get_bytes("document.xml", &[("rcept_no", rcept_no)])
            .await?;

        // 원문이 없으면 ZIP 대신 오류 XML이 옵니다
        if !bytes.starts_with(b"PK") {
            return Err(DataError::UnrecognizedSchema {
                provider: "dart".to_string(),
                detail: format!("document.xml for {} is not a ZIP archive", rcept_no),
            });
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("{}.zip", rcept_no));
        tokio::fs::write(&path, &bytes).await?;

        Ok(DownloadedDocument {
            path,
            sha256: sha256_hex(&bytes),
            size: bytes.len(),
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// ZIP의 첫 번째 파일 내용을 문자열로 읽습니다.
fn first_zip_entry(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        return Ok(content);
    }
    Err(DataError::ParseError("empty corpCode archive".to_string()))
}

fn child_text(el: &ElementRef, selector: &Selector) -> String {
    el.select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| DataError::ParseError(format!("selector {}: {:?}", s, e)))
}

/// `<result><list><corp_code/>...</list></result>` 형식을 파싱합니다.
pub fn parse_corp_codes(xml: &str) -> Result<Vec<Corp>> {
    let doc = Html::parse_document(xml);
    let list = selector("list")?;
    let corp_code = selector("corp_code")?;
    let corp_name = selector("corp_name")?;
    let stock_code = selector("stock_code")?;
    let modify_date = selector("modify_date")?;

    let corps = doc
        .select(&list)
        .filter_map(|item| {
            let code = child_text(&item, &corp_code);
            if code.is_empty() {
                return None;
            }
            let modified_at = NaiveDate::parse_from_str(&child_text(&item, &modify_date), "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt))
                .unwrap_or_else(Utc::now);
            Some(Corp {
                corp_code: code,
                corp_name: child_text(&item, &corp_name),
                stock_code: child_text(&item, &stock_code),
                modified_at,
            })
        })
        .collect();
    Ok(corps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::io::Write;

    const CORP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<result>
    <list>
        <corp_code>00126380</corp_code>
        <corp_name>삼성전자</corp_name>
        <stock_code>005930</stock_code>
        <modify_date>20240102</modify_date>
    </list>
    <list>
        <corp_code>00434003</corp_code>
        <corp_name>다코</corp_name>
        <stock_code> </stock_code>
        <modify_date>20170630</modify_date>
    </list>
</result>"#;

    fn zip_of(name: &str, content: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_parse_corp_codes() {
        let corps = parse_corp_codes(CORP_XML).unwrap();
        assert_eq!(corps.len(), 2);
        assert_eq!(corps[0].corp_code, "00126380");
        assert_eq!(corps[0].corp_name, "삼성전자");
        assert_eq!(corps[0].stock_code, "005930");
        assert_eq!(corps[0].modified_at.format("%Y%m%d").to_string(), "20240102");
        assert_eq!(corps[1].stock_code, "");
    }

    #[tokio::test]
    async fn test_corp_codes_from_zip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/corpCode.xml")
            .match_query(Matcher::UrlEncoded("crtfc_key".into(), "key".into()))
            .with_status(200)
            .with_body(zip_of("CORPCODE.xml", CORP_XML.as_bytes()))
            .create_async()
            .await;

        let client = DartClient::new(&server.url(), "key").unwrap();
        let corps = client.corp_codes().await.unwrap();
        assert_eq!(corps.len(), 2);
    }

    #[tokio::test]
    async fn test_filings_follow_pages() {
        let mut server = mockito::Server::new_async().await;
        let page = |no: u32, rcept_no: &str| {
            format!(
                r#"{{"status":"000","message":"정상","page_no":{no},"page_count":100,
                    "total_count":2,"total_page":2,
                    "list":[{{"corp_code":"00126380","corp_name":"삼성전자","stock_code":"005930",
                             "corp_cls":"Y","report_nm":"주요사항보고서","rcept_no":"{rcept_no}",
                             "flr_nm":"삼성전자","rcept_dt":"20240102","rm":""}}]}}"#
            )
        };
        server
            .mock("GET", "/list.json")
            .match_query(Matcher::UrlEncoded("page_no".into(), "1".into()))
            .with_body(page(1, "20240102000001"))
            .create_async()
            .await;
        server
            .mock("GET", "/list.json")
            .match_query(Matcher::UrlEncoded("page_no".into(), "2".into()))
            .with_body(page(2, "20240102000002"))
            .create_async()
            .await;

        let client = DartClient::new(&server.url(), "key").unwrap();
        let filings = client.filings("20240101", "20240103").await.unwrap();
        assert_eq!(filings.len(), 2);
        assert_eq!(filings[1].rcept_no, "20240102000002");
        assert_eq!(filings[0].dcm_no, "");
    }

    #[tokio::test]
    async fn test_no_data_status_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/list.json")
            .match_query(Matcher::Any)
            .with_body(r#"{"status":"013","message":"조회된 데이타가 없습니다."}"#)
            .create_async()
            .await;

        let client = DartClient::new(&server.url(), "key").unwrap();
        assert!(client.filings("20240101", "20240101").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_document_hashes_file() {
        let mut server = mockito::Server::new_async().await;
        let body = zip_of("20240102000001.xml", b"<DOCUMENT/>");
        server
            .mock("GET", "/document.xml")
            .match_query(Matcher::UrlEncoded("rcept_no".into(), "20240102000001".into()))
            .with_body(body.clone())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = DartClient::new(&server.url(), "key").unwrap();
        let doc = client
            .download_document("20240102000001", dir.path())
            .await
            .unwrap();

        assert_eq!(doc.sha256, sha256_hex(&body));
        assert_eq!(std::fs::read(&doc.path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_rejects_non_zip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/document.xml")
            .match_query(Matcher::Any)
            .with_body("<result><status>014</status></result>")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = DartClient::new(&server.url(), "key").unwrap();
        assert!(matches!(
            client.download_document("x", dir.path()).await,
            Err(DataError::UnrecognizedSchema { .. })
        ));
    }
}
