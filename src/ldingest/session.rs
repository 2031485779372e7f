//! 时段价格推导
//!
//! 时段开盘价/收盘价从已落库的分钟K线推导，从不直接向上游请求。
//! 窗口为该日期在交易所时区下的 [当日零点, 次日零点)，
//! 开盘价取窗口内最早一根K线的 open，收盘价取最晚一根的 close

use crate::ldcommon::api::local_midnight_utc;
use crate::ldcommon::{
    AppError, BatchSummary, Database, InsertOutcome, Result, SessionKind, SessionPriceRecord,
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 时段价格推导器
///
/// 只做窗口扫描和取边界，不了解交易日历，某个时段某天
/// 是否存在由上游调用方判断
pub struct SessionPriceDeriver {
    db: Arc<Database>,
}

impl SessionPriceDeriver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 推导一个品种某交易日的开盘价
    ///
    /// 窗口内没有合格K线时返回 None，很多品种当天就是没有成交，
    /// 这不是错误
    pub fn derive_open(&self, figi: &str, date: NaiveDate, tz: Tz) -> Result<Option<f64>> {
        let candles = self.candles_for_day(figi, date, tz)?;
        Ok(candles
            .iter()
            .find(|c| c.open > 0.0)
            .map(|c| c.open))
    }

    /// 推导一个品种某交易日的收盘价
    pub fn derive_close(&self, figi: &str, date: NaiveDate, tz: Tz) -> Result<Option<f64>> {
        let candles = self.candles_for_day(figi, date, tz)?;
        Ok(candles
            .iter()
            .rev()
            .find(|c| c.close > 0.0)
            .map(|c| c.close))
    }

    fn candles_for_day(
        &self,
        figi: &str,
        date: NaiveDate,
        tz: Tz,
    ) -> Result<Vec<crate::ldcommon::Candle>> {
        let start = local_midnight_utc(date, tz)?;
        let next = date
            .succ_opt()
            .ok_or_else(|| AppError::ValidationError(format!("日期越界: {}", date)))?;
        let end = local_midnight_utc(next, tz)?;

        self.db.get_minute_candles_in_window(
            figi,
            start.timestamp_millis(),
            end.timestamp_millis(),
        )
    }
}

/// 时段价格批处理服务
///
/// 把推导器扇出到全部品种并幂等落库，汇总口径与拉取阶段一致
pub struct SessionPriceService {
    db: Arc<Database>,
    deriver: SessionPriceDeriver,
    tz: Tz,
}

impl SessionPriceService {
    pub fn new(db: Arc<Database>, tz: Tz) -> Self {
        let deriver = SessionPriceDeriver::new(db.clone());
        Self { db, deriver, tz }
    }

    pub fn deriver(&self) -> &SessionPriceDeriver {
        &self.deriver
    }

    /// 为全部品种推导并保存某日期某时段的价格
    pub fn process(&self, task_id: &str, date: NaiveDate, kind: SessionKind) -> Result<BatchSummary> {
        let instruments = self
            .db
            .get_instruments(None)
            .map_err(|e| AppError::DatabaseError(format!("获取品种清单失败: {}", e)))?;

        info!(
            target: "session",
            "[{}] 推导 {} 时段价格: {} 个品种, 日期 {}",
            task_id,
            kind.as_str(),
            instruments.len(),
            date
        );

        let mut summary = BatchSummary {
            processed: instruments.len(),
            ..Default::default()
        };

        for instrument in &instruments {
            let derived = match kind {
                SessionKind::MorningOpen => self.deriver.derive_open(&instrument.figi, date, self.tz),
                SessionKind::MainClose | SessionKind::EveningClose => {
                    self.deriver.derive_close(&instrument.figi, date, self.tz)
                }
            };

            let price = match derived {
                Ok(Some(price)) => price,
                Ok(None) => {
                    debug!(target: "session", "[{}] {}: 窗口内没有K线，跳过", task_id, instrument.figi);
                    summary.no_data += 1;
                    continue;
                }
                Err(e) => {
                    error!(target: "session", "[{}] {}: 推导失败: {}", task_id, instrument.figi, e);
                    summary.errored += 1;
                    continue;
                }
            };

            let record = SessionPriceRecord {
                figi: instrument.figi.clone(),
                price_date: date,
                kind,
                price,
                currency: instrument.currency.clone(),
                exchange: instrument.exchange.clone(),
            };

            summary.total_records += 1;

            if !record.is_valid() {
                summary.filtered_invalid += 1;
                continue;
            }

            match self.db.put_if_absent(&record) {
                Ok(InsertOutcome::Inserted) => {
                    summary.succeeded += 1;
                    summary.inserted += 1;
                }
                Ok(InsertOutcome::SkippedExisting) => {
                    summary.succeeded += 1;
                    summary.skipped_existing += 1;
                }
                Err(e) => {
                    error!(target: "session", "[{}] {}: 保存时段价格失败: {}", task_id, instrument.figi, e);
                    summary.errored += 1;
                }
            }
        }

        info!(target: "session", "[{}] {} 时段价格完成: {}", task_id, kind.as_str(), summary.describe());
        Ok(summary)
    }

    /// 只读预览：推导但不落库
    pub fn preview(&self, date: NaiveDate, kind: SessionKind) -> Result<Vec<SessionPriceRecord>> {
        let instruments = self.db.get_instruments(None)?;

        let mut records = Vec::new();
        for instrument in &instruments {
            let derived = match kind {
                SessionKind::MorningOpen => self.deriver.derive_open(&instrument.figi, date, self.tz)?,
                SessionKind::MainClose | SessionKind::EveningClose => {
                    self.deriver.derive_close(&instrument.figi, date, self.tz)?
                }
            };

            if let Some(price) = derived {
                records.push(SessionPriceRecord {
                    figi: instrument.figi.clone(),
                    price_date: date,
                    kind,
                    price,
                    currency: instrument.currency.clone(),
                    exchange: instrument.exchange.clone(),
                });
            }
        }
        Ok(records)
    }
}
