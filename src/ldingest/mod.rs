// 导出数据摄取模块
pub mod aggregation;
pub mod candles;
pub mod last_trades;
pub mod orchestrator;
pub mod session;

pub use aggregation::VolumeAggregationService;
pub use candles::CandleIngestService;
pub use last_trades::LastTradesService;
pub use orchestrator::FetchOrchestrator;
pub use session::{SessionPriceDeriver, SessionPriceService};
