//! 캔들/유니버스 endpoint.
//!
//! `POST /candle/ingest`는 수집을 백그라운드에서 시작하고 바로 응답합니다.
//! 결과는 `GET /candle/runs`로 확인합니다.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use dx_core::{CandleQuery, IngestParams, Market};
use dx_data::{IngestRunStore, UniverseStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use super::clamp_limit;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_TIMEFRAME: &str = "1m";
const TIMEFRAMES: &[&str] = &["1m", "5m", "1d"];
const CANDLES_DEFAULT_LIMIT: i64 = 100;
const CANDLES_MAX_LIMIT: i64 = 10_000;
const UNIVERSE_DEFAULT_LIMIT: i64 = 100;
const UNIVERSE_MAX_LIMIT: i64 = 5_000;
const DATES_MAX_LIMIT: i64 = 100;
const RUNS_DEFAULT_LIMIT: i64 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct UniverseParams {
    pub market: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandlesParams {
    pub market: Option<String>,
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    /// epoch 초 (포함)
    pub date_from: Option<i64>,
    /// epoch 초 (포함)
    pub date_to: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DatesParams {
    pub market: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IngestQuery {
    pub market: Option<String>,
    pub timeframe: Option<String>,
    /// 유니버스 일자 (YYYY-MM-DD)
    pub date: Option<String>,
}

fn parse_market(raw: Option<&str>) -> ApiResult<Option<Market>> {
    match raw.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) => m
            .parse()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("unknown market: {}", m))),
        None => Ok(None),
    }
}

fn parse_timeframe(raw: Option<String>) -> ApiResult<String> {
    let timeframe = raw
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());
    if TIMEFRAMES.contains(&timeframe.as_str()) {
        Ok(timeframe)
    } else {
        Err(ApiError::BadRequest(format!("unsupported timeframe: {}", timeframe)))
    }
}

impl CandlesParams {
    fn into_query(self, symbol: Option<String>) -> ApiResult<CandleQuery> {
        Ok(CandleQuery {
            market: parse_market(self.market.as_deref())?.map(|m| m.as_str().to_string()),
            symbol: symbol.or(self.symbol).filter(|s| !s.is_empty()),
            timeframe: parse_timeframe(self.timeframe)?,
            ts_from: self.date_from,
            ts_to: self.date_to,
            limit: clamp_limit(self.limit, CANDLES_DEFAULT_LIMIT, CANDLES_MAX_LIMIT),
        })
    }
}

/// GET /candle/universe
pub async fn list_universe(
    State(state): State<Arc<AppState>>,
    params: Result<Query<UniverseParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let market = parse_market(params.market.as_deref())?;
    let limit = clamp_limit(params.limit, UNIVERSE_DEFAULT_LIMIT, UNIVERSE_MAX_LIMIT);

    let instruments = state
        .candles()?
        .list_instruments(market.map(|m| m.as_str()), limit)
        .await?;
    Ok(Json(json!({ "count": instruments.len(), "instruments": instruments })))
}

/// GET /candle/stocks
pub async fn list_candles(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CandlesParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let query = params.into_query(None)?;
    let candles = state.candles()?.query_candles(&query).await?;
    Ok(Json(json!({
        "count": candles.len(),
        "timeframe": query.timeframe,
        "candles": candles,
    })))
}

/// GET /candle/stocks/{symbol}
pub async fn symbol_candles(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    params: Result<Query<CandlesParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let query = params.into_query(Some(symbol.clone()))?;
    let candles = state.candles()?.query_candles(&query).await?;
    Ok(Json(json!({
        "symbol": symbol,
        "timeframe": query.timeframe,
        "count": candles.len(),
        "candles": candles,
    })))
}

/// GET /candle/dates
pub async fn available_dates(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DatesParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let market = parse_market(params.market.as_deref())?;
    let limit = clamp_limit(params.limit, DATES_MAX_LIMIT, DATES_MAX_LIMIT);
    let dates = state
        .candles()?
        .available_dates(market.map(|m| m.as_str()), limit)
        .await?;
    Ok(Json(json!({ "count": dates.len(), "dates": dates })))
}

/// GET /candle/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RunsParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params?;
    let limit = clamp_limit(params.limit, RUNS_DEFAULT_LIMIT, 200);
    let runs = state.candles()?.list_runs(limit).await?;
    Ok(Json(json!({ "count": runs.len(), "runs": runs })))
}

/// POST /candle/ingest
///
/// 제공자가 없는 시장/타임프레임은 실행 전에 503으로 거절합니다.
pub async fn trigger_ingest(
    State(state): State<Arc<AppState>>,
    params: Result<Query<IngestQuery>, QueryRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Query(params) = params?;
    let market = parse_market(params.market.as_deref())?.unwrap_or(Market::Kr);
    let timeframe = parse_timeframe(params.timeframe)?;
    let ymd = match params.date.filter(|d| !d.trim().is_empty()) {
        Some(d) => Some(
            NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("date must be YYYY-MM-DD: {}", d)))?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        None => None,
    };

    let candles = state
        .services
        .candles
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("candle ingest is not configured".to_string()))?;
    if !candles.supports(market, &timeframe) {
        return Err(ApiError::Unavailable(format!(
            "no candle provider for {} {}",
            market, timeframe
        )));
    }

    let ingest = IngestParams {
        market,
        timeframe: timeframe.clone(),
        ymd,
    };
    let task_state = state.clone();
    state.background.spawn(async move {
        match task_state.services.collect_candles(ingest).await {
            Ok(run) => info!(id = run.id, status = %run.status, rows = run.inserted_rows, "Manual candle ingest finished"),
            Err(e) => error!(error = %e, "Manual candle ingest failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": format!("Ingest started for {} {}", market, timeframe),
            "market": market,
            "timeframe": timeframe,
        })),
    ))
}

pub fn candle_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/candle/universe", get(list_universe))
        .route("/candle/stocks", get(list_candles))
        .route("/candle/stocks/{symbol}", get(symbol_candles))
        .route("/candle/dates", get(available_dates))
        .route("/candle/runs", get(list_runs))
        .route("/candle/ingest", post(trigger_ingest))
}
