// 幂等存储与任务注册表测试
use chrono::NaiveDate;
use invest_data_loader::ldcommon::models::{
    Candle, CandleInterval, InsertOutcome, LastTradeRecord, SessionKind, SessionPriceRecord,
};
use invest_data_loader::ldcommon::Database;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn setup_test_db(name: &str) -> Arc<Database> {
    let db_path = PathBuf::from(format!("./target/test_{}.db", name));
    if db_path.exists() {
        fs::remove_file(&db_path).unwrap();
    }
    Arc::new(Database::new(&db_path).unwrap())
}

fn candle(figi: &str, time_ms: i64, interval: CandleInterval) -> Candle {
    Candle {
        figi: figi.to_string(),
        time_ms,
        open: 100.0,
        high: 101.0,
        low: 99.0,
        close: 100.5,
        volume: 1_000,
        is_complete: true,
        interval,
    }
}

#[test]
fn test_put_if_absent_candle() {
    let db = setup_test_db("db_candle");
    let record = candle("FIGI_X", 1_715_300_000_000, CandleInterval::Minute);

    assert_eq!(db.put_if_absent(&record).unwrap(), InsertOutcome::Inserted);
    // 同一自然键第二次写入：跳过，不报错
    assert_eq!(db.put_if_absent(&record).unwrap(), InsertOutcome::SkippedExisting);
    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_X").unwrap(), 1);

    // 同一 (figi, time_ms) 在另一粒度的表里是另一条记录
    let daily = candle("FIGI_X", 1_715_300_000_000, CandleInterval::Day);
    assert_eq!(db.put_if_absent(&daily).unwrap(), InsertOutcome::Inserted);
    assert_eq!(db.get_candle_count(CandleInterval::Day, "FIGI_X").unwrap(), 1);
}

#[test]
fn test_put_if_absent_session_price_and_trade() {
    let db = setup_test_db("db_session_trade");
    let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();

    let price = SessionPriceRecord {
        figi: "FIGI_X".to_string(),
        price_date: date,
        kind: SessionKind::MorningOpen,
        price: 101.5,
        currency: "RUB".to_string(),
        exchange: "MOEX".to_string(),
    };
    assert_eq!(db.put_if_absent(&price).unwrap(), InsertOutcome::Inserted);
    assert_eq!(db.put_if_absent(&price).unwrap(), InsertOutcome::SkippedExisting);

    // 不同时段类型是另一个自然键
    let mut close = price.clone();
    close.kind = SessionKind::EveningClose;
    close.price = 104.6;
    assert_eq!(db.put_if_absent(&close).unwrap(), InsertOutcome::Inserted);

    let trade = LastTradeRecord {
        figi: "FIGI_X".to_string(),
        trade_time_ms: 1_715_300_000_500,
        direction: "BUY".to_string(),
        price: 101.7,
        quantity: 5,
    };
    assert_eq!(db.put_if_absent(&trade).unwrap(), InsertOutcome::Inserted);
    assert_eq!(db.put_if_absent(&trade).unwrap(), InsertOutcome::SkippedExisting);
}

#[test]
fn test_concurrent_writers_same_key_one_row() {
    // 两个写入方竞争同一自然键：唯一约束兜底，冲突折叠为 SkippedExisting
    let db = setup_test_db("db_concurrent");
    let record = candle("FIGI_RACE", 1_715_300_000_000, CandleInterval::Minute);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let record = record.clone();
        handles.push(std::thread::spawn(move || db.put_if_absent(&record).unwrap()));
    }

    let outcomes: Vec<InsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let inserted = outcomes.iter().filter(|o| **o == InsertOutcome::Inserted).count();

    assert_eq!(inserted, 1, "同一自然键只能有一次真正的插入");
    assert_eq!(db.get_candle_count(CandleInterval::Minute, "FIGI_RACE").unwrap(), 1);
}

#[test]
fn test_task_registry_lifecycle_write_once() {
    let db = setup_test_db("db_tasks");

    db.record_task_start("MORNING_SESSION_0a1b2c3d", "morning_session").unwrap();

    let task = db.get_task("MORNING_SESSION_0a1b2c3d").unwrap().unwrap();
    assert_eq!(task.status, "STARTED");
    assert_eq!(task.stage, "morning_session");
    assert!(task.ended_at_ms.is_none());

    db.record_task_end("MORNING_SESSION_0a1b2c3d", "COMPLETED", "processed=10").unwrap();

    let task = db.get_task("MORNING_SESSION_0a1b2c3d").unwrap().unwrap();
    assert_eq!(task.status, "COMPLETED");
    assert_eq!(task.message.as_deref(), Some("processed=10"));
    assert!(task.ended_at_ms.is_some());
    assert!(task.duration_ms.is_some());

    // 终态只写一次：第二次写入被忽略
    db.record_task_end("MORNING_SESSION_0a1b2c3d", "FAILED", "迟到的状态").unwrap();
    let task = db.get_task("MORNING_SESSION_0a1b2c3d").unwrap().unwrap();
    assert_eq!(task.status, "COMPLETED");
    assert_eq!(task.message.as_deref(), Some("processed=10"));
}

#[test]
fn test_unknown_task_lookup() {
    let db = setup_test_db("db_task_missing");
    assert!(db.get_task("NO_SUCH_TASK").unwrap().is_none());
}
