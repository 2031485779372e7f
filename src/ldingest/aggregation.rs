//! 成交量聚合刷新
//!
//! 聚合本身由存储侧完成，这里只负责在合适的时机触发：
//! 当天刷新便宜、跑得勤，全量重建昂贵、每日一次

use crate::ldcommon::{Database, Result};
use std::sync::Arc;
use tracing::info;

pub struct VolumeAggregationService {
    db: Arc<Database>,
}

impl VolumeAggregationService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 刷新当天的聚合
    pub fn refresh_today(&self, task_id: &str) -> Result<()> {
        info!(target: "aggregation", "[{}] 刷新当天成交量聚合", task_id);
        self.db.refresh_volume_aggregates(false)
    }

    /// 全量重建聚合
    pub fn refresh_full(&self, task_id: &str) -> Result<()> {
        info!(target: "aggregation", "[{}] 全量重建成交量聚合", task_id);
        self.db.refresh_volume_aggregates(true)
    }
}
