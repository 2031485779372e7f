// 导出共享模块
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging_setup;
pub mod models;
pub mod rate_limit;

// 重新导出常用类型，方便使用
pub use api::InvestApi;
pub use config::AppConfig;
pub use db::{Database, PersistRecord};
pub use error::{AppError, Result};
pub use models::{
    AssetClass, BatchSummary, Candle, CandleInterval, FetchOutcome, InsertOutcome, Instrument,
    LastTradeRecord, SessionKind, SessionPriceRecord, TradingDay,
};
pub use rate_limit::{ApiPermit, RateLimiter, RateLimitStats};
