// 批次编排器测试
use invest_data_loader::ldcommon::config::RateLimitConfig;
use invest_data_loader::ldcommon::models::{
    AssetClass, Candle, CandleInterval, FetchOutcome, Instrument,
};
use invest_data_loader::ldcommon::{Database, RateLimiter};
use invest_data_loader::ldingest::FetchOrchestrator;
use invest_data_loader::AppError;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

// 创建测试数据库
fn setup_test_db(name: &str) -> Arc<Database> {
    let db_path = PathBuf::from(format!("./target/test_{}.db", name));

    // 如果文件已存在，则删除
    if db_path.exists() {
        fs::remove_file(&db_path).unwrap();
    }

    Arc::new(Database::new(&db_path).unwrap())
}

fn instrument(figi: &str) -> Instrument {
    Instrument {
        figi: figi.to_string(),
        ticker: format!("T_{}", figi),
        asset_class: AssetClass::Shares,
        currency: "RUB".to_string(),
        exchange: "MOEX".to_string(),
    }
}

fn minute_candle(figi: &str, time_ms: i64, price: f64) -> Candle {
    Candle {
        figi: figi.to_string(),
        time_ms,
        open: price,
        high: price + 1.0,
        low: price - 1.0,
        close: price + 0.5,
        volume: 100,
        is_complete: true,
        interval: CandleInterval::Minute,
    }
}

fn make_orchestrator(db: Arc<Database>) -> FetchOrchestrator {
    let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
        max_concurrent_requests: 5,
        min_request_interval_ms: 0,
        acquire_timeout_ms: 5_000,
    }));
    FetchOrchestrator::new(db, limiter)
}

#[tokio::test]
async fn test_partial_failure_isolation() {
    let db = setup_test_db("orch_partial_failure");
    let orchestrator = make_orchestrator(db.clone());

    let instruments = vec![instrument("FIGI_A"), instrument("FIGI_B"), instrument("FIGI_C")];

    // FIGI_B 的上游调用失败，其余品种正常返回一条K线
    let summary = orchestrator
        .run_batch("minute_candles", instruments, |inst: Instrument| async move {
            if inst.figi == "FIGI_B" {
                Err(AppError::ApiError("模拟上游故障".to_string()))
            } else {
                Ok(FetchOutcome::Data(vec![minute_candle(&inst.figi, 1_715_300_000_000, 100.0)]))
            }
        })
        .await;

    // 单个品种的失败不会中断批次
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.inserted, 2);

    // 其余品种的数据已经落库，失败品种没有
    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_A").unwrap(), 1);
    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_B").unwrap(), 0);
    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_C").unwrap(), 1);
}

#[tokio::test]
async fn test_idempotent_rerun_skips_existing() {
    let db = setup_test_db("orch_idempotent");
    let orchestrator = make_orchestrator(db.clone());

    let fetch = |inst: Instrument| async move {
        Ok(FetchOutcome::Data(vec![minute_candle(&inst.figi, 1_715_300_000_000, 250.0)]))
    };

    let first = orchestrator
        .run_batch("minute_candles", vec![instrument("FIGI_X")], fetch)
        .await;
    assert_eq!(first.inserted, 1);
    assert_eq!(first.skipped_existing, 0);

    // 同一自然键重复摄取：第二次报告 skipped_existing，行数仍为 1
    let second = orchestrator
        .run_batch("minute_candles", vec![instrument("FIGI_X")], fetch)
        .await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped_existing, 1);

    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_X").unwrap(), 1);
}

#[tokio::test]
async fn test_no_data_counted_separately_from_errors() {
    let db = setup_test_db("orch_no_data");
    let orchestrator = make_orchestrator(db.clone());

    let summary = orchestrator
        .run_batch(
            "minute_candles",
            vec![instrument("FIGI_EMPTY"), instrument("FIGI_FULL")],
            |inst: Instrument| async move {
                if inst.figi == "FIGI_EMPTY" {
                    Ok(FetchOutcome::NoData)
                } else {
                    Ok(FetchOutcome::Data(vec![minute_candle(&inst.figi, 1_715_300_060_000, 10.0)]))
                }
            },
        )
        .await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.no_data, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.errored, 0);
}

#[tokio::test]
async fn test_invalid_records_filtered_not_errored() {
    let db = setup_test_db("orch_invalid");
    let orchestrator = make_orchestrator(db.clone());

    // 一条合法K线 + 一条非正价格K线 + 一条未收盘K线
    let summary = orchestrator
        .run_batch("minute_candles", vec![instrument("FIGI_V")], |inst: Instrument| async move {
            let good = minute_candle(&inst.figi, 1_715_300_000_000, 100.0);
            let mut zero_price = minute_candle(&inst.figi, 1_715_300_060_000, 100.0);
            zero_price.open = 0.0;
            let mut incomplete = minute_candle(&inst.figi, 1_715_300_120_000, 100.0);
            incomplete.is_complete = false;
            Ok(FetchOutcome::Data(vec![good, zero_price, incomplete]))
        })
        .await;

    // 无效记录只被过滤计数，不算品种失败
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.errored, 0);
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.filtered_invalid, 2);

    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_V").unwrap(), 1);
}

#[tokio::test]
async fn test_end_to_end_daily_candles_scenario() {
    // 对应场景：2024-05-10 为 [A, B] 加载日K线，A 抛错、B 返回一条K线
    let db = setup_test_db("orch_end_to_end");
    let orchestrator = make_orchestrator(db.clone());

    let summary = orchestrator
        .run_batch(
            "daily_candles",
            vec![instrument("FIGI_A"), instrument("FIGI_B")],
            |inst: Instrument| async move {
                if inst.figi == "FIGI_A" {
                    Err(AppError::ApiError("连接被重置".to_string()))
                } else {
                    let mut candle = minute_candle(&inst.figi, 1_715_292_000_000, 320.5);
                    candle.interval = CandleInterval::Day;
                    Ok(FetchOutcome::Data(vec![candle]))
                }
            },
        )
        .await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.total_records, 1);
    assert_eq!(summary.inserted, 1);

    assert_eq!(db.get_candle_count(CandleInterval::Day, "FIGI_B").unwrap(), 1);
    assert_eq!(db.get_candle_count(CandleInterval::Day, "FIGI_A").unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_batches_share_one_gate() {
    // 两个批次并发运行，共享同一个闸门，许可数不会超过上限
    let db = setup_test_db("orch_shared_gate");
    let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
        max_concurrent_requests: 2,
        min_request_interval_ms: 0,
        acquire_timeout_ms: 10_000,
    }));
    let orchestrator = Arc::new(FetchOrchestrator::new(db, limiter.clone()));

    let run = |figi_prefix: &'static str, orchestrator: Arc<FetchOrchestrator>, limiter: Arc<RateLimiter>| async move {
        let instruments: Vec<Instrument> = (0..6)
            .map(|i| instrument(&format!("{}_{}", figi_prefix, i)))
            .collect();
        orchestrator
            .run_batch("minute_candles", instruments, move |inst: Instrument| {
                let limiter = limiter.clone();
                async move {
                    // 在途期间观察闸门不变式
                    let stats = limiter.stats();
                    assert!(stats.used_permits <= stats.max_permits);
                    assert_eq!(stats.used_permits + stats.available_permits, stats.max_permits);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok(FetchOutcome::Data(vec![minute_candle(&inst.figi, 1_715_300_000_000, 42.0)]))
                }
            })
            .await
    };

    let (a, b) = tokio::join!(
        run("BATCH_A", orchestrator.clone(), limiter.clone()),
        run("BATCH_B", orchestrator.clone(), limiter.clone())
    );

    assert_eq!(a.succeeded, 6);
    assert_eq!(b.succeeded, 6);
    assert_eq!(limiter.stats().used_permits, 0);
}
