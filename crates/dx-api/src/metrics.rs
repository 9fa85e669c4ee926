//! Prometheus 메트릭 설정.
//!
//! 수집 파이프라인 카운터와 HTTP 요청 메트릭을 `/metrics`로 노출합니다.

use axum::extract::State;
use axum::response::IntoResponse;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Prometheus 레코더를 설치하고 렌더링 핸들을 반환합니다.
///
/// 프로세스당 한 번만 설치할 수 있습니다.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install_recorder()
}

/// GET /metrics
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

/// HTTP 응답 카운터 증가.
pub fn record_http_response(method: &str, path: &str, status: u16) {
    counter!(
        "http_responses_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// HTTP 요청 지속 시간 기록.
pub fn record_http_duration(method: &str, path: &str, duration_secs: f64) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_secs);
}

/// 경로의 식별자 세그먼트를 `:id`로 바꿉니다.
///
/// 종목코드, 접수번호, 기사 해시처럼 숫자 또는 16진수로만 된 세그먼트가 대상입니다.
/// 예: `/dart/filings/20240515000123` → `/dart/filings/:id`
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let is_numeric = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
            let is_hash = segment.len() >= 32 && segment.chars().all(|c| c.is_ascii_hexdigit());
            if is_numeric || is_hash {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/dart/filings/20240515000123"), "/dart/filings/:id");
        assert_eq!(normalize_path("/judal/stocks/005930/history"), "/judal/stocks/:id/history");
    }

    #[test]
    fn test_normalize_path_hash() {
        let id = "a".repeat(64);
        assert_eq!(normalize_path(&format!("/news/articles/{}", id)), "/news/articles/:id");
    }

    #[test]
    fn test_normalize_path_no_params() {
        assert_eq!(normalize_path("/candle/universe"), "/candle/universe");
        assert_eq!(normalize_path("/candle/stocks/AAPL"), "/candle/stocks/AAPL");
    }
}
