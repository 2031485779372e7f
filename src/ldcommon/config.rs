//! 数据加载服务配置模块

use crate::ldcommon::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 系统配置常量
pub mod constants {
    /// 上游允许的最大并发请求数
    pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

    /// 同一操作类别两次请求之间的最小间隔（毫秒）
    pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 100;

    /// 获取许可的最长等待时间（毫秒）
    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

    /// 默认调度时区
    pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

    /// 默认交易所标签
    pub const DEFAULT_EXCHANGE: &str = "MOEX";
}

use constants::*;

fn default_database_path() -> String {
    "./data/invest.db".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_api_base_url() -> String {
    "https://invest-public-api.tinkoff.ru/rest".to_string()
}

fn default_token_env() -> String {
    "T_INVEST_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_min_request_interval_ms() -> u64 {
    DEFAULT_MIN_REQUEST_INTERVAL_MS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_exchange() -> String {
    DEFAULT_EXCHANGE.to_string()
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_listen_addr() -> String {
    "0.0.0.0:8083".to_string()
}

/// 服务总配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 上游 API 配置
    #[serde(default)]
    pub api: ApiConfig,

    /// 并发闸门配置
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// 调度器配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Web 服务配置
    #[serde(default)]
    pub server: ServerConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// 连接池大小
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

/// 上游 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// REST 端点
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// 存放访问令牌的环境变量名
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 并发闸门配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 最大并发请求数，所有操作类别共享
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// 同一操作类别的最小请求间隔（毫秒）
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// 获取许可的最长等待时间（毫秒），超时报 RateLimitExceeded
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            min_request_interval_ms: default_min_request_interval_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 触发器使用的命名时区
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// 交易所标签，写入时段价格行
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// 是否启动定时触发器（测试环境可关闭）
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            exchange: default_exchange(),
            enabled: default_scheduler_enabled(),
        }
    }
}

/// Web 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置，文件不存在时使用默认值
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(target: "config", "配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("解析配置文件 {} 失败: {}", path.display(), e)))?;
        Ok(config)
    }
}
