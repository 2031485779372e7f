//! 上游请求并发闸门
//!
//! 上游对同时在途的请求数有硬性上限，超出后所有调用方都会被降级或拒绝，
//! 因此每一次上游调用都必须经过这里拿到许可

use crate::ldcommon::config::RateLimitConfig;
use crate::ldcommon::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// 一次上游调用持有的许可
///
/// 许可在值被丢弃时归还，任何退出路径（成功、错误、超时）都不会泄漏
#[derive(Debug)]
pub struct ApiPermit {
    _permit: OwnedSemaphorePermit,
    operation_class: String,
}

impl ApiPermit {
    pub fn operation_class(&self) -> &str {
        &self.operation_class
    }
}

/// 闸门的即时状态，仅用于健康检查与监控，不参与流控决策
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub max_permits: usize,
    pub used_permits: usize,
    pub available_permits: usize,
    pub active_operation_classes: usize,
}

/// 并发闸门
///
/// 固定容量的许可池，所有操作类别共享；同一类别的两次请求之间
/// 还要保持一个最小间隔，避免突发打满上游
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    min_request_interval: Duration,
    acquire_timeout: Duration,
    /// 每个操作类别最近一次请求的时间
    last_request_times: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            max_permits: config.max_concurrent_requests,
            min_request_interval: Duration::from_millis(config.min_request_interval_ms),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            last_request_times: Mutex::new(HashMap::new()),
        }
    }

    /// 获取一个许可，最多等待配置的超时时间
    ///
    /// 超时返回 `RateLimitExceeded`，调用方按可重试错误处理
    pub async fn acquire(&self, operation_class: &str) -> Result<ApiPermit> {
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(AppError::RateLimitExceeded(format!(
                    "许可池已关闭，操作类别: {}",
                    operation_class
                )))
            }
            Err(_) => {
                return Err(AppError::RateLimitExceeded(format!(
                    "等待 {}ms 未能获取许可，操作类别: {}",
                    self.acquire_timeout.as_millis(),
                    operation_class
                )))
            }
        };

        // 同一类别保持最小请求间隔
        self.wait_for_minimum_interval(operation_class).await;

        self.last_request_times
            .lock()
            .unwrap()
            .insert(operation_class.to_string(), Instant::now());

        Ok(ApiPermit {
            _permit: permit,
            operation_class: operation_class.to_string(),
        })
    }

    async fn wait_for_minimum_interval(&self, operation_class: &str) {
        let wait = {
            let times = self.last_request_times.lock().unwrap();
            times.get(operation_class).and_then(|last| {
                let elapsed = last.elapsed();
                if elapsed < self.min_request_interval {
                    Some(self.min_request_interval - elapsed)
                } else {
                    None
                }
            })
        };

        if let Some(wait) = wait {
            debug!(target: "rate_limit", "操作类别 {} 等待 {}ms 后发起下一次请求", operation_class, wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// 读取闸门即时状态
    pub fn stats(&self) -> RateLimitStats {
        let available = self.semaphore.available_permits();
        RateLimitStats {
            max_permits: self.max_permits,
            used_permits: self.max_permits - available,
            available_permits: available,
            active_operation_classes: self.last_request_times.lock().unwrap().len(),
        }
    }
}
