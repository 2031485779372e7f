// 导出模块
pub mod ldcommon;
pub mod ldingest;
pub mod ldsched;
pub mod ldserver;

// Re-export error types
pub use ldcommon::error::{AppError, Result};
