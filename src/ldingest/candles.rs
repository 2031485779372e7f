//! K线摄取阶段
//!
//! 分钟K线与日K线共用一套流程：从库里取品种清单，
//! 经编排器扇出到上游，落库前过滤未收盘与非法价格的K线

use crate::ldcommon::{
    AppError, AssetClass, BatchSummary, CandleInterval, FetchOutcome, InvestApi, Result,
};
use crate::ldingest::orchestrator::FetchOrchestrator;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

/// K线摄取服务
pub struct CandleIngestService {
    orchestrator: Arc<FetchOrchestrator>,
    api: InvestApi,
}

impl CandleIngestService {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, api: InvestApi) -> Self {
        Self { orchestrator, api }
    }

    /// 为指定日期加载一批品种的K线
    ///
    /// 品种清单取不到时整个批次没有意义，直接报错；
    /// 之后的失败全部按品种隔离，体现在汇总计数里
    pub async fn load_candles(
        &self,
        task_id: &str,
        date: NaiveDate,
        interval: CandleInterval,
        asset_classes: Option<&[AssetClass]>,
    ) -> Result<BatchSummary> {
        let instruments = self
            .orchestrator
            .db()
            .get_instruments(asset_classes)
            .map_err(|e| AppError::DatabaseError(format!("获取品种清单失败: {}", e)))?;

        if instruments.is_empty() {
            warn!(target: "candles", "[{}] 品种清单为空，没有可处理的工具", task_id);
            return Ok(BatchSummary::default());
        }

        info!(
            target: "candles",
            "[{}] 加载 {} K线: {} 个品种, 日期 {}",
            task_id,
            interval.table_name(),
            instruments.len(),
            date
        );

        let api = self.api.clone();
        let operation = match interval {
            CandleInterval::Minute => "minute_candles",
            CandleInterval::Day => "daily_candles",
        };

        let summary = self
            .orchestrator
            .run_batch(operation, instruments, move |instrument| {
                let api = api.clone();
                async move {
                    let candles = api.get_candles(&instrument.figi, date, interval).await?;
                    if candles.is_empty() {
                        Ok(FetchOutcome::NoData)
                    } else {
                        Ok(FetchOutcome::Data(candles))
                    }
                }
            })
            .await;

        Ok(summary)
    }
}
