use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Time parsing error: {0}")]
    TimeParseError(#[from] chrono::ParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("URL parsing error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// 并发闸门在限定等待时间内没有拿到许可
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// 上游返回的数据没有通过基础校验（非正价格、缺失标识等）
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("Web server error: {0}")]
    WebServerError(String),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),
}

impl AppError {
    /// 检查错误是否为可重试类型
    ///
    /// 用于调用方判断是否应该对单个品种重试失败的操作
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络相关错误通常可重试
            AppError::HttpError(_) | AppError::ApiError(_) => true,

            // 闸门超时属于暂时性拥塞，稍后重试即可
            AppError::RateLimitExceeded(_) => true,

            // 数据库锁争用等可重试
            AppError::DatabaseError(msg) => {
                msg.contains("locked") || msg.contains("busy") || msg.contains("timeout")
            }
            AppError::SqliteError(_) => true,

            AppError::IoError(_) => true,

            // 解析错误、配置错误、校验错误不可重试
            AppError::JsonError(_)
            | AppError::TimeParseError(_)
            | AppError::ConfigError(_)
            | AppError::UrlParseError(_)
            | AppError::ValidationError(_) => false,

            AppError::WebServerError(_) | AppError::SchedulerError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
