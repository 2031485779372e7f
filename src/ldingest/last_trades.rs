//! 逐笔成交摄取阶段

use crate::ldcommon::{AppError, AssetClass, BatchSummary, FetchOutcome, InvestApi, Result};
use crate::ldingest::orchestrator::FetchOrchestrator;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// 逐笔成交摄取服务
///
/// 每次加载最近一个时间窗口内的成交，窗口重叠部分靠幂等写入去重
pub struct LastTradesService {
    orchestrator: Arc<FetchOrchestrator>,
    api: InvestApi,
    /// 回看窗口长度（分钟）
    window_minutes: i64,
}

impl LastTradesService {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, api: InvestApi) -> Self {
        Self {
            orchestrator,
            api,
            window_minutes: 60,
        }
    }

    /// 加载一批品种最近窗口内的逐笔成交
    pub async fn load_last_trades(
        &self,
        task_id: &str,
        asset_classes: Option<&[AssetClass]>,
    ) -> Result<BatchSummary> {
        let instruments = self
            .orchestrator
            .db()
            .get_instruments(asset_classes)
            .map_err(|e| AppError::DatabaseError(format!("获取品种清单失败: {}", e)))?;

        if instruments.is_empty() {
            warn!(target: "last_trades", "[{}] 品种清单为空，没有可处理的工具", task_id);
            return Ok(BatchSummary::default());
        }

        let to = Utc::now();
        let from = to - Duration::minutes(self.window_minutes);

        info!(
            target: "last_trades",
            "[{}] 加载逐笔成交: {} 个品种, 窗口 {} - {}",
            task_id,
            instruments.len(),
            from,
            to
        );

        let api = self.api.clone();
        let summary = self
            .orchestrator
            .run_batch("last_trades", instruments, move |instrument| {
                let api = api.clone();
                async move {
                    let trades = api.get_last_trades(&instrument.figi, from, to).await?;
                    if trades.is_empty() {
                        Ok(FetchOutcome::NoData)
                    } else {
                        Ok(FetchOutcome::Data(trades))
                    }
                }
            })
            .await;

        Ok(summary)
    }
}
