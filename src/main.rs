// 投资数据加载服务主程序
use anyhow::Result;
use clap::Parser;
use invest_data_loader::ldcommon::{logging_setup, AppConfig, Database, InvestApi, RateLimiter};
use invest_data_loader::ldingest::{
    CandleIngestService, FetchOrchestrator, LastTradesService, SessionPriceService,
    VolumeAggregationService,
};
use invest_data_loader::ldsched::{ScheduleCoordinator, TriggerKind};
use invest_data_loader::ldserver::web::{start_web_server, AppState};
use invest_data_loader::AppError;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// 默认配置文件路径
const DEFAULT_CONFIG_PATH: &str = "config/InvestDataLoader.toml";

#[derive(Parser, Debug)]
#[command(name = "invest_data_loader", about = "T-Invest 市场数据加载服务")]
struct Args {
    /// 配置文件路径
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// 只执行一个触发器然后退出（daily_candles / morning_session / evening_session / last_trades）
    #[arg(long)]
    run_once: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 持有 guard，直到 main 函数结束，确保文件被正确写入
    let _log_guard = logging_setup::init_logging("logs")?;

    run_app().await
}

/// 应用程序的核心业务逻辑
async fn run_app() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load_from_file(&args.config)?;

    info!("核心应用逻辑开始执行");

    let db = Arc::new(Database::new(&config.database.database_path)?);
    let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let api = InvestApi::from_config(&config.api, &config.scheduler.timezone)?;

    let orchestrator = Arc::new(FetchOrchestrator::new(db.clone(), rate_limiter.clone()));
    let tz = chrono_tz::Tz::from_str(&config.scheduler.timezone)
        .map_err(|e| AppError::ConfigError(format!("无效时区 {}: {}", config.scheduler.timezone, e)))?;

    let candles = Arc::new(CandleIngestService::new(orchestrator.clone(), api.clone()));
    let sessions = Arc::new(SessionPriceService::new(db.clone(), tz));
    let last_trades = Arc::new(LastTradesService::new(orchestrator.clone(), api.clone()));
    let aggregation = Arc::new(VolumeAggregationService::new(db.clone()));

    let coordinator = Arc::new(ScheduleCoordinator::new(
        db.clone(),
        candles,
        sessions.clone(),
        last_trades,
        aggregation,
        &config.scheduler.timezone,
    )?);

    // 一次性运行模式：执行指定触发器后退出
    if let Some(stage) = &args.run_once {
        let trigger = TriggerKind::from_name(stage)
            .ok_or_else(|| AppError::ConfigError(format!("未知触发器: {}", stage)))?;
        let task_id = coordinator.run_now(trigger, None).await;
        info!("一次性运行完成，任务 id: {}", task_id);
        return Ok(());
    }

    // 启动定时触发器
    if config.scheduler.enabled {
        let handles = coordinator.start();
        info!("已启动 {} 个定时触发器", handles.len());
    } else {
        info!("定时触发器已禁用，仅提供 API 派发");
    }

    // Web控制面前台运行
    let state = AppState {
        db,
        coordinator,
        sessions,
        rate_limiter,
        api,
    };
    start_web_server(state, &config.server.listen_addr).await?;
    Ok(())
}
