//! 계층형 설정.
//!
//! 설정은 프로세스 시작 시 한 번만 해석됩니다.
//!
//! 1. [`AppConfig::default`] 기본값
//! 2. 환경 변수 ([`AppConfig::apply_env`])
//! 3. 선택적 오버라이드 파일 ([`ConfigOverrides`], TOML 또는 JSON)
//!
//! 뒤 단계가 앞 단계를 덮어씁니다. 빈 문자열은 "값 없음"으로 취급합니다.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// 오버라이드 파일 경로를 지정하는 환경 변수.
pub const CONFIG_FILE_ENV: &str = "DX_CONFIG_FILE";

/// 오버라이드 파일 기본 경로.
pub const DEFAULT_CONFIG_FILE: &str = "data/config.json";

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub keys: ProviderKeys,
    pub news: NewsConfig,
    pub crawler: CrawlerConfig,
    pub candle: CandleConfig,
    pub schedule: ScheduleConfig,
}

/// HTTP 서버 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 도메인별 저장소 경로.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub dart_db_path: String,
    pub judal_db_path: String,
    pub candle_db_path: String,
    pub news_db_path: String,
    /// 공시 원문 ZIP 저장 디렉토리
    pub storage_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dart_db_path: "./data/dart.db".to_string(),
            judal_db_path: "./data/judal.db".to_string(),
            candle_db_path: "./data/candle.db".to_string(),
            news_db_path: "./data/news.db".to_string(),
            storage_dir: "./storage".to_string(),
        }
    }
}

/// 외부 제공자 자격 증명.
///
/// 값이 없으면 해당 도메인의 작업이 등록되지 않습니다.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeys {
    pub dart_api_key: Option<String>,
    pub naver_client_id: Option<String>,
    pub naver_client_secret: Option<String>,
    pub newsapi_key: Option<String>,
    pub alpaca_api_key: Option<String>,
    pub alpaca_api_secret: Option<String>,
    pub fmp_api_key: Option<String>,
    pub kiwoom_rest_api_url: Option<String>,
}

/// 자격 증명 표시용 마스크.
fn mask(v: &Option<String>) -> &'static str {
    if v.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

impl std::fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKeys")
            .field("dart_api_key", &mask(&self.dart_api_key))
            .field("naver_client_id", &mask(&self.naver_client_id))
            .field("naver_client_secret", &mask(&self.naver_client_secret))
            .field("newsapi_key", &mask(&self.newsapi_key))
            .field("alpaca_api_key", &mask(&self.alpaca_api_key))
            .field("alpaca_api_secret", &mask(&self.alpaca_api_secret))
            .field("fmp_api_key", &mask(&self.fmp_api_key))
            .field("kiwoom_rest_api_url", &self.kiwoom_rest_api_url)
            .finish()
    }
}

impl ProviderKeys {
    /// 설정된 비밀 값을 마스크로 바꾼 사본. URL은 그대로 둡니다.
    pub fn redacted(&self) -> Self {
        let hide = |v: &Option<String>| v.as_ref().map(|_| mask(v).to_string());
        Self {
            dart_api_key: hide(&self.dart_api_key),
            naver_client_id: hide(&self.naver_client_id),
            naver_client_secret: hide(&self.naver_client_secret),
            newsapi_key: hide(&self.newsapi_key),
            alpaca_api_key: hide(&self.alpaca_api_key),
            alpaca_api_secret: hide(&self.alpaca_api_secret),
            fmp_api_key: hide(&self.fmp_api_key),
            kiwoom_rest_api_url: self.kiwoom_rest_api_url.clone(),
        }
    }

    pub fn has_naver(&self) -> bool {
        self.naver_client_id.is_some() && self.naver_client_secret.is_some()
    }

    pub fn has_alpaca(&self) -> bool {
        self.alpaca_api_key.is_some() && self.alpaca_api_secret.is_some()
    }
}

/// 뉴스 파이프라인 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    pub naver_base_url: String,
    pub newsapi_base_url: String,
    /// 제목 유사도 중복 판정 임계값 (Jaro-Winkler, 0.0~1.0)
    pub dedup_threshold: f64,
    /// 유사도 비교 대상으로 삼을 기존 기사의 시간 범위
    pub dedup_window_hours: i64,
    /// 유사도 비교 후보 최대 개수
    pub dedup_candidate_limit: i64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            naver_base_url: "https://openapi.naver.com".to_string(),
            newsapi_base_url: "https://newsapi.org".to_string(),
            dedup_threshold: 0.92,
            dedup_window_hours: 48,
            dedup_candidate_limit: 500,
        }
    }
}

/// 테마/종목 크롤러 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub base_url: String,
    /// 테마 페이지 요청 간 최소 간격 (ms)
    pub delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.judal.co.kr".to_string(),
            delay_ms: 1500,
            timeout_secs: 30,
        }
    }
}

impl CrawlerConfig {
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

/// 캔들 수집 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleConfig {
    /// 저장된 데이터가 없을 때 가져올 과거 일수
    pub backfill_days: i64,
    /// 다중 심볼 제공자의 호출당 심볼 수
    pub batch_size: usize,
    pub alpaca_base_url: String,
    pub fmp_base_url: String,
    /// 유니버스 생성 시 최소 시가총액
    pub universe_min_market_cap: f64,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            backfill_days: 30,
            batch_size: 100,
            alpaca_base_url: "https://data.alpaca.markets".to_string(),
            fmp_base_url: "https://financialmodelingprep.com/api/v3".to_string(),
            universe_min_market_cap: 0.0,
        }
    }
}

/// 스케줄(cron) 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// cron 표현식을 해석할 시간대 (IANA 이름)
    pub timezone: String,
    pub news_fetch: String,
    pub judal_crawl: String,
    pub dart_filings: String,
    pub dart_documents: String,
    pub dart_corps: String,
    pub candle_us_daily: String,
    pub candle_us_minute: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Seoul".to_string(),
            news_fetch: "*/15 * * * *".to_string(),
            judal_crawl: "0 0 * * *".to_string(),
            dart_filings: "0 * * * *".to_string(),
            dart_documents: "*/5 * * * *".to_string(),
            dart_corps: "0 0 * * 0".to_string(),
            candle_us_daily: "0 6 * * 2-6".to_string(),
            candle_us_minute: "10 6 * * 2-6".to_string(),
        }
    }
}

impl ScheduleConfig {
    /// 시간대 문자열을 파싱합니다.
    pub fn tz(&self) -> CoreResult<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|_| CoreError::InvalidValue(format!("timezone: {}", self.timezone)))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn set_string(target: &mut String, value: Option<String>) {
    if let Some(v) = non_empty(value) {
        *target = v;
    }
}

fn set_optional(target: &mut Option<String>, value: Option<String>) {
    if let Some(v) = non_empty(value) {
        *target = Some(v);
    }
}

fn set_parsed<T: FromStr>(target: &mut T, value: Option<String>) {
    if let Some(v) = non_empty(value).and_then(|v| v.parse().ok()) {
        *target = v;
    }
}

impl AppConfig {
    /// 외부에 노출해도 되는 사본 (자격 증명 마스킹).
    pub fn redacted(&self) -> Self {
        Self {
            keys: self.keys.redacted(),
            ..self.clone()
        }
    }

    /// 환경 변수 계층을 적용합니다.
    ///
    /// `lookup`은 키에 대한 값을 돌려주는 함수입니다. 운영에서는
    /// `std::env::var`를, 테스트에서는 고정 맵을 넘깁니다.
    /// 숫자 파싱에 실패한 값은 무시하고 이전 값을 유지합니다.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        set_string(&mut self.server.host, lookup("API_HOST"));
        set_parsed(&mut self.server.port, lookup("PORT"));

        set_string(&mut self.storage.dart_db_path, lookup("DART_DB_PATH"));
        set_string(&mut self.storage.judal_db_path, lookup("JUDAL_DB_PATH"));
        set_string(&mut self.storage.candle_db_path, lookup("CANDLE_DB_PATH"));
        set_string(&mut self.storage.news_db_path, lookup("NEWS_DB_PATH"));
        set_string(&mut self.storage.storage_dir, lookup("STORAGE_DIR"));

        set_optional(&mut self.keys.dart_api_key, lookup("DART_API_KEY"));
        set_optional(&mut self.keys.naver_client_id, lookup("NAVER_CLIENT_ID"));
        set_optional(&mut self.keys.naver_client_secret, lookup("NAVER_CLIENT_SECRET"));
        set_optional(&mut self.keys.newsapi_key, lookup("NEWSAPI_KEY"));
        set_optional(&mut self.keys.alpaca_api_key, lookup("ALPACA_API_KEY"));
        set_optional(&mut self.keys.alpaca_api_secret, lookup("ALPACA_API_SECRET"));
        set_optional(&mut self.keys.fmp_api_key, lookup("FMP_API_KEY"));
        set_optional(&mut self.keys.kiwoom_rest_api_url, lookup("KIWOOM_REST_API_URL"));

        set_parsed(&mut self.news.dedup_threshold, lookup("DEDUP_THRESHOLD"));

        set_string(&mut self.crawler.base_url, lookup("JUDAL_BASE_URL"));
        set_parsed(&mut self.crawler.delay_ms, lookup("CRAWL_DELAY_MS"));

        set_parsed(&mut self.candle.backfill_days, lookup("CANDLE_BACKFILL_DAYS"));

        set_string(&mut self.schedule.timezone, lookup("SCHEDULER_TIMEZONE"));
        set_string(&mut self.schedule.news_fetch, lookup("NEWS_FETCH_CRON"));
        set_string(&mut self.schedule.judal_crawl, lookup("JUDAL_CRAWL_CRON"));
        set_string(&mut self.schedule.dart_filings, lookup("DART_FILINGS_CRON"));
        set_string(&mut self.schedule.dart_documents, lookup("DART_DOCS_CRON"));
        set_string(&mut self.schedule.dart_corps, lookup("DART_CORPS_CRON"));
        set_string(&mut self.schedule.candle_us_daily, lookup("CANDLE_US_DAILY_CRON"));
        set_string(&mut self.schedule.candle_us_minute, lookup("CANDLE_US_MINUTE_CRON"));

        self
    }

    /// 파일 오버라이드 계층을 적용합니다.
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        set_string(&mut self.storage.dart_db_path, overrides.dart_db_path);
        set_string(&mut self.storage.judal_db_path, overrides.judal_db_path);
        set_string(&mut self.storage.candle_db_path, overrides.candle_db_path);
        set_string(&mut self.storage.news_db_path, overrides.news_db_path);
        set_string(&mut self.storage.storage_dir, overrides.storage_dir);

        set_optional(&mut self.keys.dart_api_key, overrides.dart_api_key);
        set_optional(&mut self.keys.naver_client_id, overrides.naver_client_id);
        set_optional(&mut self.keys.naver_client_secret, overrides.naver_client_secret);
        set_optional(&mut self.keys.newsapi_key, overrides.newsapi_key);
        set_optional(&mut self.keys.alpaca_api_key, overrides.alpaca_api_key);
        set_optional(&mut self.keys.alpaca_api_secret, overrides.alpaca_api_secret);
        set_optional(&mut self.keys.fmp_api_key, overrides.fmp_api_key);
        set_optional(&mut self.keys.kiwoom_rest_api_url, overrides.kiwoom_rest_api_url);

        set_string(&mut self.schedule.news_fetch, overrides.news_fetch_cron);
        if let Some(delay) = overrides.crawl_delay_ms.filter(|d| *d > 0) {
            self.crawler.delay_ms = delay;
        }

        self
    }

    /// 기본값 → 환경 변수 → 오버라이드 파일 순서로 설정을 해석합니다.
    ///
    /// `.env`가 있으면 먼저 읽습니다. 오버라이드 파일이 없으면 건너뜁니다.
    pub fn load() -> CoreResult<Self> {
        let _ = dotenvy::dotenv();

        let config = Self::default().apply_env(|key| std::env::var(key).ok());

        let path = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        match ConfigOverrides::from_file(&path)? {
            Some(overrides) => {
                tracing::info!(path = %path, "Applying config overrides");
                Ok(config.merge(overrides))
            }
            None => Ok(config),
        }
    }

    /// 바인딩 주소 문자열.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 파일에서 읽는 설정 오버라이드.
///
/// 존재하고 비어 있지 않은 필드만 적용됩니다.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub dart_db_path: Option<String>,
    pub judal_db_path: Option<String>,
    pub candle_db_path: Option<String>,
    pub news_db_path: Option<String>,
    pub storage_dir: Option<String>,
    pub dart_api_key: Option<String>,
    pub naver_client_id: Option<String>,
    pub naver_client_secret: Option<String>,
    pub newsapi_key: Option<String>,
    pub alpaca_api_key: Option<String>,
    pub alpaca_api_secret: Option<String>,
    pub fmp_api_key: Option<String>,
    pub kiwoom_rest_api_url: Option<String>,
    pub news_fetch_cron: Option<String>,
    pub crawl_delay_ms: Option<u64>,
}

impl ConfigOverrides {
    /// 파일에서 오버라이드를 읽습니다. 파일이 없으면 `None`.
    ///
    /// 형식은 확장자(.toml / .json)로 결정됩니다.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let overrides = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;

        Ok(Some(overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.schedule.news_fetch, "*/15 * * * *");
        assert_eq!(config.crawler.delay_ms, 1500);
        assert_eq!(config.candle.backfill_days, 30);
        assert!(config.keys.dart_api_key.is_none());
    }

    #[test]
    fn test_env_layer_overrides_defaults() {
        let config = AppConfig::default().apply_env(env(&[
            ("PORT", "9090"),
            ("DART_API_KEY", "abc"),
            ("NAVER_CLIENT_ID", "   "),
            ("CRAWL_DELAY_MS", "not-a-number"),
        ]));

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.keys.dart_api_key.as_deref(), Some("abc"));
        // 공백 값은 미설정으로 취급
        assert!(config.keys.naver_client_id.is_none());
        // 파싱 실패 시 기존 값 유지
        assert_eq!(config.crawler.delay_ms, 1500);
    }

    #[test]
    fn test_file_layer_wins_over_env() {
        let config = AppConfig::default()
            .apply_env(env(&[("PORT", "9090"), ("NEWSAPI_KEY", "from-env")]))
            .merge(ConfigOverrides {
                port: Some(7070),
                newsapi_key: Some("from-file".to_string()),
                dart_api_key: Some(String::new()),
                ..Default::default()
            });

        assert_eq!(config.server.port, 7070);
        assert_eq!(config.keys.newsapi_key.as_deref(), Some("from-file"));
        assert!(config.keys.dart_api_key.is_none());
    }

    #[test]
    fn test_overrides_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 8181, "fmp_api_key": "fmp"}"#).unwrap();

        let overrides = ConfigOverrides::from_file(&path).unwrap().unwrap();
        assert_eq!(overrides.port, Some(8181));
        assert_eq!(overrides.fmp_api_key.as_deref(), Some("fmp"));

        let missing = ConfigOverrides::from_file(dir.path().join("none.toml")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_debug_masks_keys() {
        let keys = ProviderKeys {
            dart_api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", keys);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<set>"));
    }

    #[test]
    fn test_redacted_hides_secrets_only() {
        let mut config = AppConfig::default();
        config.keys.dart_api_key = Some("secret".to_string());
        config.keys.kiwoom_rest_api_url = Some("http://localhost:9000".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.keys.dart_api_key.as_deref(), Some("<set>"));
        assert_eq!(redacted.keys.fmp_api_key, None);
        assert_eq!(
            redacted.keys.kiwoom_rest_api_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert_eq!(redacted.server.port, config.server.port);
        assert_eq!(config.keys.dart_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_timezone_parse() {
        assert!(ScheduleConfig::default().tz().is_ok());
        let bad = ScheduleConfig {
            timezone: "Mars/Base".to_string(),
            ..Default::default()
        };
        assert!(bad.tz().is_err());
    }
}
