// 导出服务器相关模块
pub mod web;

pub use crate::ldcommon::{AppError, Database, InvestApi, Result};
