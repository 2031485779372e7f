// Web服务器实现
//
// 控制面只做两件事：派发流水线并立即返回任务 id；
// 提供只读的状态与预览查询。业务逻辑都在编排层
use crate::ldcommon::{AppError, Database, InvestApi, RateLimiter, Result};
use crate::ldingest::SessionPriceService;
use crate::ldsched::ScheduleCoordinator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers;

/// 各处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub coordinator: Arc<ScheduleCoordinator>,
    pub sessions: Arc<SessionPriceService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub api: InvestApi,
}

/// 启动Web服务器
pub async fn start_web_server(state: AppState, listen_addr: &str) -> Result<()> {
    let app = Router::new()
        .route("/api/candles/daily", post(handlers::dispatch_daily_candles))
        .route("/api/session/morning", post(handlers::dispatch_morning_session))
        .route("/api/session/evening", post(handlers::dispatch_evening_session))
        .route("/api/last-trades", post(handlers::dispatch_last_trades))
        .route("/api/session/morning/preview", get(handlers::preview_morning_session))
        .route("/api/session/evening/preview", get(handlers::preview_evening_session))
        .route("/api/trading-schedule", get(handlers::trading_schedule_handler))
        .route("/api/tasks/:task_id", get(handlers::task_handler))
        .route("/api/rate-limit", get(handlers::rate_limit_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Web服务器启动在 http://{}", listen_addr);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| AppError::WebServerError(format!("绑定地址 {} 失败: {}", listen_addr, e)))?;

    match axum::serve(listener, app).await {
        Ok(_) => info!("Web服务器已关闭"),
        Err(e) => {
            error!("Web服务器错误: {}", e);
            return Err(AppError::WebServerError(format!("Web服务器错误: {}", e)));
        }
    }

    Ok(())
}
