//! DX Unified API 서버.
//!
//! 도메인 저장소를 열고 예약 수집 작업을 시작한 뒤 REST API를 제공합니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{http::StatusCode, middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use dx_api::metrics::{metrics_handler, setup_metrics_recorder};
use dx_api::middleware::metrics_layer;
use dx_api::routes::create_api_router;
use dx_api::state::AppState;
use dx_collector::{register_jobs, Scheduler, Services};
use dx_core::{init_logging, AppConfig, LogConfig};

/// 예약 작업 종료 대기 시간.
const SCHEDULER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// 요청으로 시작된 백그라운드 작업 종료 대기 시간.
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// CORS 레이어.
///
/// - `CORS_ORIGINS`: 쉼표로 구분된 허용 origin 목록. 없으면 모든 origin 허용.
fn cors_layer() -> CorsLayer {
    let configured = std::env::var("CORS_ORIGINS")
        .ok()
        .filter(|origins| !origins.trim().is_empty());

    let allow_origin = match &configured {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                info!("CORS configured with {} allowed origins", origins.len());
                AllowOrigin::list(origins)
            }
        }
        None => {
            warn!("CORS_ORIGINS not set, allowing any origin (development mode)");
            AllowOrigin::any()
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// 전체 라우터 생성.
fn create_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    // 메트릭 라우터 (별도 상태)
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    Router::new()
        .merge(metrics_router)
        .merge(create_api_router().with_state(state))
        .layer(middleware::from_fn(metrics_layer))
        .layer(TraceLayer::new_for_http())
        // 전역 타임아웃 (30초) - 408 상태 코드 반환
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(cors_layer())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config = LogConfig::from_env("dx_api=info,dx_collector=info,dx_data=info,tower_http=info");
    init_logging(&log_config).map_err(|e| anyhow::anyhow!("logging init failed: {}", e))?;

    info!("Starting DX Unified API server...");

    let config = AppConfig::load().context("failed to load configuration")?;

    let metrics_handle = setup_metrics_recorder().context("failed to install metrics recorder")?;
    info!("Prometheus metrics recorder initialized");

    let services = Services::open(&config).await;
    info!(
        news = services.news.is_some(),
        judal = services.crawl.is_some(),
        dart = services.dart.is_some(),
        candles = services.candles.is_some(),
        "Service pipelines status"
    );

    // 초기 DART 설정은 서버 기동을 막지 않음
    let setup = services.clone();
    tokio::spawn(async move { setup.initial_setup().await });

    let mut scheduler = Scheduler::new(config.schedule.tz()?);
    let registered = register_jobs(&mut scheduler, &services, &config)?;
    scheduler.start().await?;
    info!(jobs = registered, timezone = %config.schedule.timezone, "Scheduler started");

    let state = Arc::new(AppState::new(services).with_config(config.clone()));
    info!(version = %state.version, "Application state initialized");

    let app = create_router(state.clone(), metrics_handle);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "API server listening");
    info!("Metrics available at http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown initiated, cleaning up...");

    match scheduler.stop(SCHEDULER_STOP_TIMEOUT).await {
        Ok(true) => info!("Scheduler stopped"),
        Ok(false) => warn!("Scheduler stop timed out, abandoning running jobs"),
        Err(e) => error!(error = %e, "Failed to stop scheduler"),
    }

    state.background.close();
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, state.background.wait())
        .await
        .is_err()
    {
        warn!("Background task timeout, forcing shutdown");
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Graceful shutdown 시그널 대기 (Ctrl+C 또는 SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
