use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ldcommon::models::{IngestionTask, SessionKind, SessionPriceRecord, TradingDay};
use crate::ldcommon::rate_limit::RateLimitStats;
use crate::ldsched::TriggerKind;

use super::server::AppState;

/// 派发请求体，日期缺省为调度时区的前一天
#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    pub date: Option<String>,
}

/// 派发响应：任务已受理，结果通过任务注册表查询
#[derive(Serialize)]
pub struct DispatchResponse {
    pub task_id: String,
    pub status: String,
}

/// 明确无效的触发输入（如格式错误的日期）是唯一的同步错误出口
fn parse_date(raw: &Option<String>) -> Result<Option<NaiveDate>, (StatusCode, String)> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|_| (StatusCode::BAD_REQUEST, format!("无效日期: {}", s))),
    }
}

async fn dispatch(
    state: &AppState,
    trigger: TriggerKind,
    request: Option<Json<DispatchRequest>>,
) -> Result<Json<DispatchResponse>, (StatusCode, String)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let date = parse_date(&request.date)?;

    let task_id = state.coordinator.dispatch(trigger, date);
    info!(target: "web", "已派发 {}: {}", trigger.stage_name(), task_id);

    Ok(Json(DispatchResponse {
        task_id,
        status: "STARTED".to_string(),
    }))
}

pub async fn dispatch_daily_candles(
    State(state): State<AppState>,
    request: Option<Json<DispatchRequest>>,
) -> Result<Json<DispatchResponse>, (StatusCode, String)> {
    dispatch(&state, TriggerKind::DailyCandles, request).await
}

pub async fn dispatch_morning_session(
    State(state): State<AppState>,
    request: Option<Json<DispatchRequest>>,
) -> Result<Json<DispatchResponse>, (StatusCode, String)> {
    dispatch(&state, TriggerKind::MorningSession, request).await
}

pub async fn dispatch_evening_session(
    State(state): State<AppState>,
    request: Option<Json<DispatchRequest>>,
) -> Result<Json<DispatchResponse>, (StatusCode, String)> {
    dispatch(&state, TriggerKind::EveningSession, request).await
}

pub async fn dispatch_last_trades(
    State(state): State<AppState>,
    request: Option<Json<DispatchRequest>>,
) -> Result<Json<DispatchResponse>, (StatusCode, String)> {
    dispatch(&state, TriggerKind::LastTrades, request).await
}

/// 预览查询参数
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub date: String,
}

/// 时段价格预览响应
#[derive(Serialize)]
pub struct PreviewResponse {
    pub date: String,
    pub session_kind: String,
    pub prices: Vec<SessionPriceRecord>,
}

async fn preview_session(
    state: &AppState,
    kind: SessionKind,
    query: PreviewQuery,
) -> Result<Json<PreviewResponse>, (StatusCode, String)> {
    let date = query
        .date
        .parse::<NaiveDate>()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("无效日期: {}", query.date)))?;

    let prices = state
        .sessions
        .preview(date, kind)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(PreviewResponse {
        date: date.to_string(),
        session_kind: kind.as_str().to_string(),
        prices,
    }))
}

pub async fn preview_morning_session(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, (StatusCode, String)> {
    preview_session(&state, SessionKind::MorningOpen, query).await
}

pub async fn preview_evening_session(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, (StatusCode, String)> {
    preview_session(&state, SessionKind::EveningClose, query).await
}

/// 交易日历查询参数
#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub exchange: Option<String>,
    pub from: String,
    pub to: String,
}

/// 交易日历查询：上游调用，同样要经过并发闸门
pub async fn trading_schedule_handler(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Vec<TradingDay>>, (StatusCode, String)> {
    let from = query
        .from
        .parse::<NaiveDate>()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("无效日期: {}", query.from)))?;
    let to = query
        .to
        .parse::<NaiveDate>()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("无效日期: {}", query.to)))?;
    let exchange = query.exchange.as_deref().unwrap_or("MOEX");

    let _permit = state
        .rate_limiter
        .acquire("trading_schedule")
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let days = state
        .api
        .get_trading_schedule(exchange, from, to)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(days))
}

/// 任务生命周期查询
pub async fn task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<IngestionTask>, (StatusCode, String)> {
    match state.db.get_task(&task_id) {
        Ok(Some(task)) => Ok(Json(task)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("任务不存在: {}", task_id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// 并发闸门状态查询
pub async fn rate_limit_handler(State(state): State<AppState>) -> Json<RateLimitStats> {
    Json(state.rate_limiter.stats())
}
