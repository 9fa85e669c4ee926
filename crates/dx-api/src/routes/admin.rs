//! 운영 endpoint.
//!
//! - `GET /admin/status`: 도메인별 데이터 최신성
//! - `GET /admin/config`: 현재 설정 (자격 증명은 `<set>`/`<unset>`으로 마스킹)
//!
//! 도메인 상태는 저장소가 없으면 `{"status": "unavailable"}`,
//! 기록이 없으면 `{"status": "no_data"}`입니다.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use dx_collector::modules::market_today;
use dx_core::{AppConfig, Market};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

fn unavailable() -> Value {
    json!({ "status": "unavailable" })
}

fn no_data() -> Value {
    json!({ "status": "no_data" })
}

fn minutes_since(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - at).num_minutes().max(0)
}

/// 접수일(YYYYMMDD)부터 한국 기준 오늘까지의 일수.
fn days_since(rcept_dt: &str) -> Option<i64> {
    let filed = NaiveDate::parse_from_str(rcept_dt, "%Y%m%d").ok()?;
    let today = NaiveDate::parse_from_str(&market_today(Market::Kr), "%Y-%m-%d").ok()?;
    Some((today - filed).num_days())
}

async fn judal_status(state: &AppState, now: DateTime<Utc>) -> ApiResult<Value> {
    let Ok(repo) = state.judal() else {
        return Ok(unavailable());
    };
    let latest = repo.crawl_logs(1).await?.into_iter().next();
    Ok(match latest {
        Some(log) => json!({
            "minutes_ago": minutes_since(log.created_at, now),
            "latest_log": log,
        }),
        None => no_data(),
    })
}

async fn dart_status(state: &AppState) -> ApiResult<Value> {
    let Ok(repo) = state.dart() else {
        return Ok(unavailable());
    };
    Ok(match repo.latest_rcept_dt().await? {
        Some(rcept_dt) => json!({
            "days_ago": days_since(&rcept_dt),
            "last_filing_date": rcept_dt,
        }),
        None => no_data(),
    })
}

async fn news_status(state: &AppState, now: DateTime<Utc>) -> ApiResult<Value> {
    let Ok(store) = state.news() else {
        return Ok(unavailable());
    };
    let latest = store.list_runs(1).await?.into_iter().next();
    Ok(match latest {
        Some(run) => json!({
            "minutes_ago": minutes_since(run.ended_at.unwrap_or(run.started_at), now),
            "latest_run": run,
        }),
        None => no_data(),
    })
}

/// GET /admin/status
pub async fn admin_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    Ok(Json(json!({
        "timestamp": now,
        "status": {
            "judal": judal_status(&state, now).await?,
            "dart": dart_status(&state).await?,
            "news": news_status(&state, now).await?,
        },
    })))
}

/// GET /admin/config
pub async fn admin_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json(state.config.redacted())
}

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/status", get(admin_status))
        .route("/admin/config", get(admin_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_util::get as get_json;
    use crate::state::create_test_state;
    use axum::http::StatusCode;
    use chrono::Duration;
    use dx_collector::Services;
    use dx_core::{Filing, NewCrawlLog, RunLog};
    use dx_data::NewsStore;

    #[tokio::test]
    async fn test_status_without_data() {
        let app = admin_router().with_state(Arc::new(create_test_state().await));
        let (status, body) = get_json(app, "/admin/status").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["timestamp"].is_string());
        assert_eq!(body["status"]["judal"]["status"], "no_data");
        assert_eq!(body["status"]["dart"]["status"], "no_data");
        assert_eq!(body["status"]["news"]["status"], "no_data");

        let app = admin_router().with_state(Arc::new(AppState::new(Services::default())));
        let (status, body) = get_json(app, "/admin/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["dart"]["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_status_reports_freshness() {
        let state = create_test_state().await;
        let today = Utc::now().date_naive();

        state
            .judal()
            .unwrap()
            .insert_crawl_log(&NewCrawlLog {
                crawl_date: today,
                crawl_type: "daily_batch".to_string(),
                themes_count: 3,
                stocks_count: 40,
                history_count: 40,
                duration_seconds: 12.5,
                status: "completed".to_string(),
                error_message: None,
            })
            .await
            .unwrap();

        let filed = NaiveDate::parse_from_str(&market_today(Market::Kr), "%Y-%m-%d").unwrap()
            - Duration::days(2);
        state
            .dart()
            .unwrap()
            .upsert_filings(&[Filing {
                rcept_no: "20240101000001".to_string(),
                corp_code: "00126380".to_string(),
                corp_name: "삼성전자".to_string(),
                report_nm: "주요사항보고서".to_string(),
                rcept_dt: filed.format("%Y%m%d").to_string(),
                flr_nm: String::new(),
                rm: String::new(),
                dcm_no: String::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }])
            .await
            .unwrap();

        state
            .news()
            .unwrap()
            .create_run(&RunLog::start("run-1", Utc::now() - Duration::minutes(90)))
            .await
            .unwrap();

        let app = admin_router().with_state(Arc::new(state));
        let (status, body) = get_json(app, "/admin/status").await;
        assert_eq!(status, StatusCode::OK);

        let judal = &body["status"]["judal"];
        assert_eq!(judal["latest_log"]["themes_count"], 3);
        assert_eq!(judal["minutes_ago"], 0);

        let dart = &body["status"]["dart"];
        assert_eq!(dart["last_filing_date"], filed.format("%Y%m%d").to_string());
        assert_eq!(dart["days_ago"], 2);

        let news = &body["status"]["news"];
        assert_eq!(news["latest_run"]["run_id"], "run-1");
        assert_eq!(news["minutes_ago"], 90);
    }

    #[tokio::test]
    async fn test_config_masks_keys() {
        let mut config = AppConfig::default();
        config.keys.dart_api_key = Some("dart-secret".to_string());
        config.keys.newsapi_key = Some("news-secret".to_string());
        let state = create_test_state().await.with_config(config);

        let app = admin_router().with_state(Arc::new(state));
        let (status, body) = get_json(app, "/admin/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["keys"]["dart_api_key"], "<set>");
        assert_eq!(body["keys"]["newsapi_key"], "<set>");
        assert!(body["keys"]["fmp_api_key"].is_null());
        assert_eq!(body["server"]["port"], 8080);
        assert!(!body.to_string().contains("secret"));
    }
}
