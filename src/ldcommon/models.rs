use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 资产类别，对应上游 API 的 instrument 分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Shares,
    Futures,
    Indicatives,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Shares => "SHARES",
            AssetClass::Futures => "FUTURES",
            AssetClass::Indicatives => "INDICATIVES",
        }
    }

    /// 默认的全量类别列表（加载顺序：先股票后期货，最后指示性工具）
    pub fn all() -> Vec<AssetClass> {
        vec![AssetClass::Shares, AssetClass::Futures, AssetClass::Indicatives]
    }
}

/// 表示一个可交易工具 - 参考数据，由独立的预加载流程维护
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// 上游分配的唯一标识（FIGI）
    pub figi: String,
    /// 展示用代码
    pub ticker: String,
    /// 资产类别
    pub asset_class: AssetClass,
    /// 计价货币
    pub currency: String,
    /// 交易所标签
    pub exchange: String,
}

/// K线粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleInterval {
    Minute,
    Day,
}

impl CandleInterval {
    /// 上游 API 的粒度参数名
    pub fn api_name(&self) -> &'static str {
        match self {
            CandleInterval::Minute => "CANDLE_INTERVAL_1_MIN",
            CandleInterval::Day => "CANDLE_INTERVAL_DAY",
        }
    }

    /// 对应的存储表名
    pub fn table_name(&self) -> &'static str {
        match self {
            CandleInterval::Minute => "minute_candles",
            CandleInterval::Day => "daily_candles",
        }
    }
}

/// K线数据 - 数据库存储格式
///
/// 自然键为 (figi, time_ms)，粒度由所在表区分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub figi: String,
    /// 开盘时间（毫秒时间戳，UTC）
    pub time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// 是否为已收盘的完整K线
    pub is_complete: bool,
    /// 粒度，决定写入哪张表
    #[serde(skip)]
    pub interval: CandleInterval,
}

impl Candle {
    /// 基础校验：价格必须为正，标识必须存在，未收盘的K线不入库
    pub fn is_valid(&self) -> bool {
        !self.figi.is_empty()
            && self.open > 0.0
            && self.high > 0.0
            && self.low > 0.0
            && self.close > 0.0
            && self.is_complete
    }
}

impl Default for CandleInterval {
    fn default() -> Self {
        CandleInterval::Minute
    }
}

/// 交易时段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    MorningOpen,
    MainClose,
    EveningClose,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::MorningOpen => "morning_open",
            SessionKind::MainClose => "main_close",
            SessionKind::EveningClose => "evening_close",
        }
    }
}

/// 时段价格 - 由分钟K线推导，从不直接从上游获取
///
/// 自然键为 (figi, price_date, kind)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPriceRecord {
    pub figi: String,
    pub price_date: NaiveDate,
    pub kind: SessionKind,
    pub price: f64,
    pub currency: String,
    pub exchange: String,
}

impl SessionPriceRecord {
    pub fn is_valid(&self) -> bool {
        !self.figi.is_empty() && self.price > 0.0
    }
}

/// 逐笔成交记录
///
/// 自然键为 (figi, trade_time_ms, direction)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTradeRecord {
    pub figi: String,
    pub trade_time_ms: i64,
    /// 买卖方向（BUY / SELL / UNSPECIFIED）
    pub direction: String,
    pub price: f64,
    pub quantity: i64,
}

impl LastTradeRecord {
    pub fn is_valid(&self) -> bool {
        !self.figi.is_empty() && self.price > 0.0 && self.quantity > 0
    }
}

/// 上游交易日历中的一天
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub is_trading_day: bool,
    pub exchange: String,
}

/// 单个品种的拉取结果 - 三态区分"有数据/无数据"，错误走 Err 通道
///
/// 上游返回空列表不是错误，很多品种当天就是没有成交
#[derive(Debug, Clone)]
pub enum FetchOutcome<R> {
    Data(Vec<R>),
    NoData,
}

/// 幂等写入的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 新行已写入
    Inserted,
    /// 自然键已存在，本次未写入任何内容
    SkippedExisting,
}

/// 批次汇总统计
///
/// 字段含义：processed 为批次内全部品种数；succeeded/no_data/errored
/// 按品种计数；其余按记录条数计数
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub errored: usize,
    pub total_records: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub filtered_invalid: usize,
}

impl BatchSummary {
    /// 合并另一个阶段的汇总（用于多阶段流水线的总计）
    pub fn merge(&mut self, other: &BatchSummary) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.no_data += other.no_data;
        self.errored += other.errored;
        self.total_records += other.total_records;
        self.inserted += other.inserted;
        self.skipped_existing += other.skipped_existing;
        self.filtered_invalid += other.filtered_invalid;
    }

    /// 生成一行简短的结果描述，写入任务注册表
    pub fn describe(&self) -> String {
        format!(
            "processed={} succeeded={} no_data={} errored={} records={} inserted={} skipped={} invalid={}",
            self.processed,
            self.succeeded,
            self.no_data,
            self.errored,
            self.total_records,
            self.inserted,
            self.skipped_existing,
            self.filtered_invalid
        )
    }
}

/// 任务注册表中的一条生命周期记录
#[derive(Debug, Clone, Serialize)]
pub struct IngestionTask {
    pub task_id: String,
    pub stage: String,
    pub status: String,
    pub message: Option<String>,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub duration_ms: Option<i64>,
}
