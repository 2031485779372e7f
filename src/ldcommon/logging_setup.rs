//! 统一日志系统初始化模块
//!
//! 提供跨二进制文件的日志系统初始化功能，避免代码重复

use crate::ldcommon::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志系统：控制台 + 按天滚动的文件输出
///
/// 返回的 guard 必须存活到进程结束，否则文件缓冲不会刷盘
pub fn init_logging(log_dir: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("警告：无法创建日志目录: {}", e);
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    // 压低依赖库的噪音
    let filter_str = format!("{},hyper=warn,reqwest=warn,rusqlite=warn,tower_http=info", log_level);

    let file_appender = tracing_appender::rolling::daily(log_dir, "invest_data_loader.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(EnvFilter::new(filter_str.clone()));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::new(filter_str));

    // init() 同时安装 log 桥接，log 宏产生的记录一并进入 tracing
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
