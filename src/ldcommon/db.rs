use crate::ldcommon::error::{AppError, Result};
use crate::ldcommon::models::{
    AssetClass, Candle, CandleInterval, IngestionTask, InsertOutcome, Instrument, LastTradeRecord,
    SessionKind, SessionPriceRecord,
};
use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tracing::{error, info};

// 数据库连接池类型
pub type DbPool = Pool<SqliteConnectionManager>;

/// 可幂等持久化的记录
///
/// 每种记录类型自带自然键与基础校验；写入统一走
/// `Database::put_if_absent`，键冲突一律视为"已存在"而不是错误
pub trait PersistRecord: Send + Sync {
    /// 自然键的文本表示，用于日志
    fn natural_key(&self) -> String;

    /// 基础健全性检查，未通过的记录直接丢弃
    fn is_valid(&self) -> bool;

    /// 不存在则插入；存在（或并发写入者抢先）则什么都不做
    fn insert_if_absent(&self, conn: &rusqlite::Connection) -> Result<InsertOutcome>;
}

impl PersistRecord for Candle {
    fn natural_key(&self) -> String {
        format!("{}:{}:{}", self.figi, self.time_ms, self.interval.table_name())
    }

    fn is_valid(&self) -> bool {
        Candle::is_valid(self)
    }

    fn insert_if_absent(&self, conn: &rusqlite::Connection) -> Result<InsertOutcome> {
        // 自然键 (figi, time_ms) 是表的主键，OR IGNORE 把并发冲突
        // 折叠成"未写入"，changes 为 0 即已存在
        let changed = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (
                        figi, time_ms, open, high, low, close, volume, is_complete
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    self.interval.table_name()
                ),
                params![
                    self.figi,
                    self.time_ms,
                    self.open,
                    self.high,
                    self.low,
                    self.close,
                    self.volume,
                    self.is_complete as i64,
                ],
            )
            .map_err(|e| AppError::DatabaseError(format!("插入K线 {} 失败: {}", self.natural_key(), e)))?;

        if changed == 0 {
            Ok(InsertOutcome::SkippedExisting)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}

impl PersistRecord for SessionPriceRecord {
    fn natural_key(&self) -> String {
        format!("{}:{}:{}", self.figi, self.price_date, self.kind.as_str())
    }

    fn is_valid(&self) -> bool {
        SessionPriceRecord::is_valid(self)
    }

    fn insert_if_absent(&self, conn: &rusqlite::Connection) -> Result<InsertOutcome> {
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO session_prices (
                    figi, price_date, session_kind, price, currency, exchange
                ) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    self.figi,
                    self.price_date.to_string(),
                    self.kind.as_str(),
                    self.price,
                    self.currency,
                    self.exchange,
                ],
            )
            .map_err(|e| {
                AppError::DatabaseError(format!("插入时段价格 {} 失败: {}", self.natural_key(), e))
            })?;

        if changed == 0 {
            Ok(InsertOutcome::SkippedExisting)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}

impl PersistRecord for LastTradeRecord {
    fn natural_key(&self) -> String {
        format!("{}:{}:{}", self.figi, self.trade_time_ms, self.direction)
    }

    fn is_valid(&self) -> bool {
        LastTradeRecord::is_valid(self)
    }

    fn insert_if_absent(&self, conn: &rusqlite::Connection) -> Result<InsertOutcome> {
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO last_trades (
                    figi, trade_time_ms, direction, price, quantity
                ) VALUES (?, ?, ?, ?, ?)",
                params![
                    self.figi,
                    self.trade_time_ms,
                    self.direction,
                    self.price,
                    self.quantity,
                ],
            )
            .map_err(|e| {
                AppError::DatabaseError(format!("插入成交记录 {} 失败: {}", self.natural_key(), e))
            })?;

        if changed == 0 {
            Ok(InsertOutcome::SkippedExisting)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}

/// Database handler for market data
#[derive(Debug)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection with WAL mode and optimized settings
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists for database
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(target: "db", "Using SQLite database at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;          -- 保留WAL模式以获得更好的安全性
                PRAGMA synchronous = NORMAL;        -- 平衡性能和安全性
                PRAGMA cache_size = -102400;        -- 设置缓存为100MB (负数表示KB)
                PRAGMA temp_store = MEMORY;         -- 临时表存储在内存中
                PRAGMA busy_timeout = 5000;         -- 忙等待超时
            ",
            )
        });

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::DatabaseError(format!("创建连接池失败: {}", e)))?;

        let db = Self { pool };

        match db.init_db() {
            Ok(_) => {
                info!(target: "db", "✅ SQLite数据库初始化成功");
            }
            Err(e) => {
                error!(target: "db", "❌ 数据库初始化失败，程序无法继续: {}", e);
                return Err(e);
            }
        }

        Ok(db)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::DatabaseError(format!("获取数据库连接失败: {}", e)))
    }

    /// Initialize database tables
    ///
    /// 每个自然键都落在主键上，这是幂等写入的最终保障：
    /// 先查后插的竞态由唯一约束兜底
    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS instruments (
                figi TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                asset_class TEXT NOT NULL,
                currency TEXT NOT NULL,
                exchange TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS minute_candles (
                figi TEXT NOT NULL,
                time_ms INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                is_complete INTEGER NOT NULL,
                PRIMARY KEY (figi, time_ms)
            );

            CREATE TABLE IF NOT EXISTS daily_candles (
                figi TEXT NOT NULL,
                time_ms INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                is_complete INTEGER NOT NULL,
                PRIMARY KEY (figi, time_ms)
            );

            CREATE TABLE IF NOT EXISTS session_prices (
                figi TEXT NOT NULL,
                price_date TEXT NOT NULL,
                session_kind TEXT NOT NULL,
                price REAL NOT NULL,
                currency TEXT NOT NULL,
                exchange TEXT NOT NULL,
                PRIMARY KEY (figi, price_date, session_kind)
            );

            CREATE TABLE IF NOT EXISTS last_trades (
                figi TEXT NOT NULL,
                trade_time_ms INTEGER NOT NULL,
                direction TEXT NOT NULL,
                price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                PRIMARY KEY (figi, trade_time_ms, direction)
            );

            CREATE TABLE IF NOT EXISTS ingestion_tasks (
                task_id TEXT PRIMARY KEY,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                started_at_ms INTEGER NOT NULL,
                ended_at_ms INTEGER,
                duration_ms INTEGER
            );

            CREATE TABLE IF NOT EXISTS volume_aggregates (
                figi TEXT NOT NULL,
                agg_date TEXT NOT NULL,
                total_volume INTEGER NOT NULL,
                PRIMARY KEY (figi, agg_date)
            );
        ",
        )
        .map_err(|e| AppError::DatabaseError(format!("创建数据表失败: {}", e)))?;

        Ok(())
    }

    /// 幂等写入：不存在则插入，存在则跳过
    pub fn put_if_absent<R: PersistRecord>(&self, record: &R) -> Result<InsertOutcome> {
        let conn = self.conn()?;
        record.insert_if_absent(&conn)
    }

    // ---------- 参考数据 ----------

    /// 写入一个工具（预加载流程与测试使用）
    pub fn save_instrument(&self, instrument: &Instrument) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO instruments (figi, ticker, asset_class, currency, exchange)
             VALUES (?, ?, ?, ?, ?)",
            params![
                instrument.figi,
                instrument.ticker,
                instrument.asset_class.as_str(),
                instrument.currency,
                instrument.exchange,
            ],
        )
        .map_err(|e| AppError::DatabaseError(format!("保存工具 {} 失败: {}", instrument.figi, e)))?;
        Ok(())
    }

    /// 按资产类别读取工具列表；`None` 表示全部类别
    pub fn get_instruments(&self, asset_classes: Option<&[AssetClass]>) -> Result<Vec<Instrument>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT figi, ticker, asset_class, currency, exchange FROM instruments ORDER BY figi",
        )?;

        let rows = stmt.query_map([], |row| {
            let class_str: String = row.get(2)?;
            Ok(Instrument {
                figi: row.get(0)?,
                ticker: row.get(1)?,
                asset_class: match class_str.as_str() {
                    "FUTURES" => AssetClass::Futures,
                    "INDICATIVES" => AssetClass::Indicatives,
                    _ => AssetClass::Shares,
                },
                currency: row.get(3)?,
                exchange: row.get(4)?,
            })
        })?;

        let mut instruments = Vec::new();
        for row in rows {
            let instrument = row?;
            match asset_classes {
                Some(classes) if !classes.contains(&instrument.asset_class) => continue,
                _ => instruments.push(instrument),
            }
        }
        Ok(instruments)
    }

    // ---------- K线查询 ----------

    /// 读取一个品种在半开区间 [from_ms, to_ms) 内的分钟K线，按时间升序
    pub fn get_minute_candles_in_window(
        &self,
        figi: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT figi, time_ms, open, high, low, close, volume, is_complete
             FROM minute_candles
             WHERE figi = ? AND time_ms >= ? AND time_ms < ?
             ORDER BY time_ms ASC",
        )?;

        let rows = stmt.query_map(params![figi, from_ms, to_ms], |row| {
            Ok(Candle {
                figi: row.get(0)?,
                time_ms: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                volume: row.get(6)?,
                is_complete: row.get::<_, i64>(7)? != 0,
                interval: CandleInterval::Minute,
            })
        })?;

        let mut candles = Vec::new();
        for row in rows {
            candles.push(row?);
        }
        Ok(candles)
    }

    /// 某品种某张K线表的行数（测试与校验用）
    pub fn get_candle_count(&self, interval: CandleInterval, figi: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE figi = ?", interval.table_name()),
            params![figi],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 读取一条时段价格
    pub fn get_session_price(
        &self,
        figi: &str,
        date: NaiveDate,
        kind: SessionKind,
    ) -> Result<Option<SessionPriceRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT figi, price_date, session_kind, price, currency, exchange
                 FROM session_prices WHERE figi = ? AND price_date = ? AND session_kind = ?",
                params![figi, date.to_string(), kind.as_str()],
                |row| {
                    let date_str: String = row.get(1)?;
                    Ok((date_str, row.get::<_, f64>(3)?, row.get::<_, String>(4)?, row.get::<_, String>(5)?))
                },
            )
            .optional()?;

        match record {
            Some((date_str, price, currency, exchange)) => {
                let price_date = date_str
                    .parse::<NaiveDate>()
                    .map_err(|e| AppError::DatabaseError(format!("时段价格日期解析失败: {}", e)))?;
                Ok(Some(SessionPriceRecord {
                    figi: figi.to_string(),
                    price_date,
                    kind,
                    price,
                    currency,
                    exchange,
                }))
            }
            None => Ok(None),
        }
    }

    // ---------- 任务注册表 ----------

    /// 任务开始：写入 STARTED 行，只此一次
    pub fn record_task_start(&self, task_id: &str, stage: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ingestion_tasks (task_id, stage, status, started_at_ms)
             VALUES (?, ?, 'STARTED', ?)",
            params![task_id, stage, chrono::Utc::now().timestamp_millis()],
        )
        .map_err(|e| AppError::DatabaseError(format!("记录任务 {} 开始失败: {}", task_id, e)))?;
        Ok(())
    }

    /// 任务结束：写入终态，只允许从 STARTED 迁移一次
    pub fn record_task_end(&self, task_id: &str, status: &str, message: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp_millis();
        let changed = conn
            .execute(
                "UPDATE ingestion_tasks
                 SET status = ?, message = ?, ended_at_ms = ?,
                     duration_ms = ? - started_at_ms
                 WHERE task_id = ? AND status = 'STARTED'",
                params![status, message, now, now, task_id],
            )
            .map_err(|e| AppError::DatabaseError(format!("记录任务 {} 结束失败: {}", task_id, e)))?;

        if changed == 0 {
            error!(target: "db", "任务 {} 不存在或已写过终态，忽略本次状态 {}", task_id, status);
        }
        Ok(())
    }

    /// 按任务 id 读取生命周期记录
    pub fn get_task(&self, task_id: &str) -> Result<Option<IngestionTask>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                "SELECT task_id, stage, status, message, started_at_ms, ended_at_ms, duration_ms
                 FROM ingestion_tasks WHERE task_id = ?",
                params![task_id],
                |row| {
                    Ok(IngestionTask {
                        task_id: row.get(0)?,
                        stage: row.get(1)?,
                        status: row.get(2)?,
                        message: row.get(3)?,
                        started_at_ms: row.get(4)?,
                        ended_at_ms: row.get(5)?,
                        duration_ms: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(task)
    }

    // ---------- 聚合刷新（对存储侧聚合的黑盒调用，不在此实现聚合逻辑） ----------

    /// 刷新成交量聚合
    ///
    /// `full` 为 true 时全量重建（昂贵，每日一次）；否则只刷新当天（便宜）
    pub fn refresh_volume_aggregates(&self, full: bool) -> Result<()> {
        let conn = self.conn()?;
        if full {
            conn.execute_batch(
                "DELETE FROM volume_aggregates;
                 INSERT INTO volume_aggregates (figi, agg_date, total_volume)
                 SELECT figi, date(time_ms / 1000, 'unixepoch'), SUM(volume)
                 FROM daily_candles GROUP BY figi, date(time_ms / 1000, 'unixepoch');",
            )
        } else {
            conn.execute_batch(
                "INSERT OR REPLACE INTO volume_aggregates (figi, agg_date, total_volume)
                 SELECT figi, date(time_ms / 1000, 'unixepoch'), SUM(volume)
                 FROM daily_candles
                 WHERE date(time_ms / 1000, 'unixepoch') = date('now')
                 GROUP BY figi, date(time_ms / 1000, 'unixepoch');",
            )
        }
        .map_err(|e| AppError::DatabaseError(format!("刷新成交量聚合失败: {}", e)))?;
        Ok(())
    }
}
