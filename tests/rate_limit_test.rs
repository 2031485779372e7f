// 并发闸门测试
use invest_data_loader::ldcommon::config::RateLimitConfig;
use invest_data_loader::ldcommon::rate_limit::RateLimiter;
use invest_data_loader::AppError;
use std::sync::Arc;
use std::time::Duration;

fn gate_config(max: usize, acquire_timeout_ms: u64) -> RateLimitConfig {
    RateLimitConfig {
        max_concurrent_requests: max,
        min_request_interval_ms: 0, // 测试不关心请求间隔
        acquire_timeout_ms,
    }
}

#[tokio::test]
async fn test_gate_capacity_blocks_excess_callers() {
    let limiter = Arc::new(RateLimiter::new(&gate_config(2, 5_000)));

    // 占满全部许可
    let p1 = limiter.acquire("candles").await.unwrap();
    let p2 = limiter.acquire("candles").await.unwrap();

    let stats = limiter.stats();
    assert_eq!(stats.max_permits, 2);
    assert_eq!(stats.used_permits, 2);
    assert_eq!(stats.available_permits, 0);
    assert_eq!(stats.used_permits + stats.available_permits, stats.max_permits);

    // 第三个调用方必须阻塞，直到有人归还
    let limiter_clone = limiter.clone();
    let blocked = tokio::spawn(async move { limiter_clone.acquire("candles").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "超出容量的调用方应该仍在等待");

    drop(p1);
    let p3 = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("归还许可后等待者应该被放行")
        .unwrap()
        .unwrap();

    let stats = limiter.stats();
    assert_eq!(stats.used_permits, 2);
    assert_eq!(stats.used_permits + stats.available_permits, stats.max_permits);

    drop(p2);
    drop(p3);
    let stats = limiter.stats();
    assert_eq!(stats.used_permits, 0);
    assert_eq!(stats.available_permits, 2);
}

#[tokio::test]
async fn test_acquire_timeout_reports_rate_limit_exceeded() {
    let limiter = RateLimiter::new(&gate_config(1, 50));

    let _held = limiter.acquire("instruments").await.unwrap();

    // 在限定等待时间内拿不到许可要报可重试的 RateLimitExceeded
    match limiter.acquire("instruments").await {
        Err(e @ AppError::RateLimitExceeded(_)) => {
            assert!(e.is_retryable(), "闸门超时应该是可重试错误");
        }
        other => panic!("预期 RateLimitExceeded，实际: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_permit_released_on_every_exit_path() {
    let limiter = Arc::new(RateLimiter::new(&gate_config(1, 1_000)));

    // 模拟一次失败的上游调用：许可在错误路径上同样被归还
    {
        let _permit = limiter.acquire("candles").await.unwrap();
        // 出错返回，permit 随作用域结束丢弃
    }
    assert_eq!(limiter.stats().available_permits, 1);

    // 归还后可以立即再次获取
    let _again = limiter.acquire("candles").await.unwrap();
    assert_eq!(limiter.stats().used_permits, 1);
}

#[tokio::test]
async fn test_stats_tracks_operation_classes() {
    let limiter = RateLimiter::new(&gate_config(3, 1_000));

    let _a = limiter.acquire("candles").await.unwrap();
    let _b = limiter.acquire("last_trades").await.unwrap();

    let stats = limiter.stats();
    assert_eq!(stats.active_operation_classes, 2);
}
