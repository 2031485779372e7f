//! 调度协调器
//!
//! 每个命名触发器绑定一条 cron 式表达式和一个时区；触发时生成
//! 任务 id、按固定顺序执行各阶段（下游阶段等待上游阶段的完成信号，
//! 不用固定延迟近似），生命周期写入任务注册表。
//! 单个触发器的异常在顶层收口，不影响其他触发器和后续的定时运行

use crate::ldcommon::{AppError, AssetClass, BatchSummary, CandleInterval, Database, Result, SessionKind};
use crate::ldingest::{CandleIngestService, LastTradesService, SessionPriceService, VolumeAggregationService};
use crate::ldsched::schedule::ScheduleExpression;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

static TASK_SEQ: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

/// 生成对外可见的任务 id：`{STAGE}_{8位十六进制}`
fn mint_task_id(stage: &str) -> String {
    let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now().timestamp_millis() as u64;
    let tag = (now.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ seq.rotate_left(17)) & 0xFFFF_FFFF;
    format!("{}_{:08x}", stage.to_uppercase(), tag)
}

/// 命名触发器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// 每日K线加载：分钟K线（股票→期货）→ 日K线 → 主时段收盘价 → 全量聚合
    DailyCandles,
    /// 上一交易日的晚间时段收盘价
    EveningSession,
    /// 上一交易日的早间时段开盘价
    MorningSession,
    /// 最近窗口的逐笔成交（股票→期货）
    LastTrades,
}

impl TriggerKind {
    pub fn stage_name(&self) -> &'static str {
        match self {
            TriggerKind::DailyCandles => "daily_candles",
            TriggerKind::EveningSession => "evening_session",
            TriggerKind::MorningSession => "morning_session",
            TriggerKind::LastTrades => "last_trades",
        }
    }

    /// 触发器的默认日程，时刻沿用原有排班
    fn schedule(&self) -> ScheduleExpression {
        match self {
            TriggerKind::DailyCandles => {
                ScheduleExpression::DailyAt(NaiveTime::from_hms_opt(1, 10, 0).expect("静态时刻"))
            }
            TriggerKind::EveningSession => {
                ScheduleExpression::DailyAt(NaiveTime::from_hms_opt(2, 0, 0).expect("静态时刻"))
            }
            TriggerKind::MorningSession => {
                ScheduleExpression::DailyAt(NaiveTime::from_hms_opt(2, 1, 0).expect("静态时刻"))
            }
            TriggerKind::LastTrades => ScheduleExpression::EveryMinutesBetween {
                step_minutes: 30,
                from_hour: 2,
                to_hour: 23,
            },
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "daily_candles" => Some(TriggerKind::DailyCandles),
            "evening_session" => Some(TriggerKind::EveningSession),
            "morning_session" => Some(TriggerKind::MorningSession),
            "last_trades" => Some(TriggerKind::LastTrades),
            _ => None,
        }
    }
}

/// 调度协调器
pub struct ScheduleCoordinator {
    db: Arc<Database>,
    candles: Arc<CandleIngestService>,
    sessions: Arc<SessionPriceService>,
    last_trades: Arc<LastTradesService>,
    aggregation: Arc<VolumeAggregationService>,
    tz: Tz,
}

impl ScheduleCoordinator {
    pub fn new(
        db: Arc<Database>,
        candles: Arc<CandleIngestService>,
        sessions: Arc<SessionPriceService>,
        last_trades: Arc<LastTradesService>,
        aggregation: Arc<VolumeAggregationService>,
        timezone: &str,
    ) -> Result<Self> {
        let tz = Tz::from_str(timezone)
            .map_err(|e| AppError::ConfigError(format!("无效时区 {}: {}", timezone, e)))?;
        Ok(Self {
            db,
            candles,
            sessions,
            last_trades,
            aggregation,
            tz,
        })
    }

    /// 启动全部定时触发器，每个触发器一个独立循环
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let triggers = [
            TriggerKind::DailyCandles,
            TriggerKind::EveningSession,
            TriggerKind::MorningSession,
            TriggerKind::LastTrades,
        ];

        triggers
            .iter()
            .map(|&trigger| {
                let this = self.clone();
                tokio::spawn(async move {
                    this.trigger_loop(trigger).await;
                })
            })
            .collect()
    }

    /// 单个触发器的循环：睡到下一个触发点，跑完一轮流水线再算下一个点
    async fn trigger_loop(self: &Arc<Self>, trigger: TriggerKind) {
        info!("触发器 {} 已启动，时区 {}", trigger.stage_name(), self.tz);
        loop {
            let now = Utc::now();
            let Some(next) = trigger.schedule().next_occurrence(now, self.tz) else {
                error!("触发器 {} 无法计算下一次触发时刻，循环退出", trigger.stage_name());
                return;
            };

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            // 错误已在 launch 内收口；这里等待本轮结束，避免同一触发器重叠执行
            self.run_now(trigger, None).await;
        }
    }

    /// 启动一次流水线并等待其结束，返回任务 id（定时循环与一次性运行使用）
    pub async fn run_now(self: &Arc<Self>, trigger: TriggerKind, date: Option<NaiveDate>) -> String {
        let (task_id, handle) = self.launch(trigger, date);
        if let Err(e) = handle.await {
            error!("[{}] 触发器 {} 执行任务 panic: {:?}", task_id, trigger.stage_name(), e);
        }
        task_id
    }

    /// 外部派发：启动一次流水线并立即返回任务 id，不等待完成
    ///
    /// 执行结果只能通过任务注册表观察
    pub fn dispatch(self: &Arc<Self>, trigger: TriggerKind, date: Option<NaiveDate>) -> String {
        let (task_id, _handle) = self.launch(trigger, date);
        task_id
    }

    /// 生成任务 id、登记 STARTED、把流水线丢进后台执行
    fn launch(self: &Arc<Self>, trigger: TriggerKind, date: Option<NaiveDate>) -> (String, JoinHandle<()>) {
        let stage = trigger.stage_name();
        let task_id = mint_task_id(stage);
        let date = date.unwrap_or_else(|| self.previous_day());

        if let Err(e) = self.db.record_task_start(&task_id, stage) {
            error!("[{}] 登记任务开始失败: {}", task_id, e);
        }

        info!("[{}] 触发 {}，日期 {}", task_id, stage, date);

        let this = self.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            match this.run_pipeline(trigger, &id, date).await {
                Ok(message) => {
                    info!("[{}] {} 完成: {}", id, stage, message);
                    if let Err(e) = this.db.record_task_end(&id, "COMPLETED", &message) {
                        error!("[{}] 登记任务结束失败: {}", id, e);
                    }
                }
                Err(e) => {
                    // 流水线级失败：记入注册表，不影响其他触发器
                    error!("[{}] {} 失败: {}", id, stage, e);
                    if let Err(log_err) = this.db.record_task_end(&id, "FAILED", &e.to_string()) {
                        error!("[{}] 登记任务失败状态失败: {}", id, log_err);
                    }
                }
            }
        });

        (task_id, handle)
    }

    /// 执行一条流水线，返回写入注册表的结果描述
    ///
    /// 阶段之间的先后关系靠 await 上游阶段的完成来保证
    async fn run_pipeline(&self, trigger: TriggerKind, task_id: &str, date: NaiveDate) -> Result<String> {
        // 日历检查每次触发只做一次；非交易日记为成功的空操作
        let needs_trading_day = matches!(
            trigger,
            TriggerKind::EveningSession | TriggerKind::MorningSession | TriggerKind::LastTrades
        );
        if needs_trading_day && is_weekend(date) {
            let message = format!("{} 是周末，{} 时段不存在，跳过", date, trigger.stage_name());
            warn!("[{}] {}", task_id, message);
            return Ok(message);
        }

        match trigger {
            TriggerKind::DailyCandles => {
                let mut total = BatchSummary::default();

                // 分钟K线先落库，后面的主时段收盘价才有推导依据
                let shares = self
                    .candles
                    .load_candles(task_id, date, CandleInterval::Minute, Some(&[AssetClass::Shares]))
                    .await?;
                total.merge(&shares);

                let futures = self
                    .candles
                    .load_candles(task_id, date, CandleInterval::Minute, Some(&[AssetClass::Futures]))
                    .await?;
                total.merge(&futures);

                let daily = self
                    .candles
                    .load_candles(task_id, date, CandleInterval::Day, None)
                    .await?;
                total.merge(&daily);

                if !is_weekend(date) {
                    let sessions = self.sessions.process(task_id, date, SessionKind::MainClose)?;
                    total.merge(&sessions);
                }

                self.aggregation.refresh_full(task_id)?;

                Ok(total.describe())
            }
            TriggerKind::EveningSession => {
                let summary = self.sessions.process(task_id, date, SessionKind::EveningClose)?;
                self.aggregation.refresh_today(task_id)?;
                Ok(summary.describe())
            }
            TriggerKind::MorningSession => {
                let summary = self.sessions.process(task_id, date, SessionKind::MorningOpen)?;
                Ok(summary.describe())
            }
            TriggerKind::LastTrades => {
                let mut total = BatchSummary::default();
                let shares = self
                    .last_trades
                    .load_last_trades(task_id, Some(&[AssetClass::Shares]))
                    .await?;
                total.merge(&shares);
                let futures = self
                    .last_trades
                    .load_last_trades(task_id, Some(&[AssetClass::Futures]))
                    .await?;
                total.merge(&futures);
                Ok(total.describe())
            }
        }
    }

    /// 调度时区下的前一天
    fn previous_day(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive() - Duration::days(1)
    }
}

/// 周末判定：周六、周日没有交易时段
pub fn is_weekend(date: NaiveDate) -> bool {
    date.weekday().number_from_monday() >= 6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_weekend() {
        // 2024-05-11 周六, 2024-05-12 周日, 2024-05-13 周一
        assert!(is_weekend(NaiveDate::from_ymd_opt(2024, 5, 11).unwrap()));
        assert!(is_weekend(NaiveDate::from_ymd_opt(2024, 5, 12).unwrap()));
        assert!(!is_weekend(NaiveDate::from_ymd_opt(2024, 5, 13).unwrap()));
    }

    #[test]
    fn test_mint_task_id_format() {
        let id = mint_task_id("morning_session");
        assert!(id.starts_with("MORNING_SESSION_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        // 连续生成的 id 不应相同
        let other = mint_task_id("morning_session");
        assert_ne!(id, other);
    }
}
