//! 批次编排器
//!
//! 把一个逻辑任务扇出到成百上千个品种：每个品种独立经过
//! 许可获取 → 上游拉取 → 归还许可 → 幂等落库，单个品种的失败
//! 只计数、不中断批次

use crate::ldcommon::{
    BatchSummary, Database, FetchOutcome, InsertOutcome, Instrument, PersistRecord, RateLimiter,
    Result,
};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 单个品种处理后的计数
struct InstrumentCounts {
    succeeded: bool,
    no_data: bool,
    errored: bool,
    total_records: usize,
    inserted: usize,
    skipped_existing: usize,
    filtered_invalid: usize,
}

impl InstrumentCounts {
    fn errored() -> Self {
        Self {
            succeeded: false,
            no_data: false,
            errored: true,
            total_records: 0,
            inserted: 0,
            skipped_existing: 0,
            filtered_invalid: 0,
        }
    }

    fn no_data() -> Self {
        Self {
            succeeded: false,
            no_data: true,
            errored: false,
            total_records: 0,
            inserted: 0,
            skipped_existing: 0,
            filtered_invalid: 0,
        }
    }
}

/// 拉取编排器
pub struct FetchOrchestrator {
    db: Arc<Database>,
    rate_limiter: Arc<RateLimiter>,
}

impl FetchOrchestrator {
    pub fn new(db: Arc<Database>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { db, rate_limiter }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// 对一批品种执行同一个拉取阶段
    ///
    /// `fetch` 为单个品种的上游调用，返回三态结果；批次内品种之间
    /// 没有顺序保证，汇总在全部品种结束后一次性给出。本方法不因
    /// 部分失败而报错，拿不到品种列表之类让整个批次失去意义的
    /// 情况应在进入本方法之前处理
    pub async fn run_batch<R, F, Fut>(
        &self,
        operation: &str,
        instruments: Vec<Instrument>,
        fetch: F,
    ) -> BatchSummary
    where
        R: PersistRecord + Send + 'static,
        F: Fn(Instrument) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FetchOutcome<R>>> + Send + 'static,
    {
        let total = instruments.len();
        info!(target: "orchestrator", "开始批次 {}: {} 个品种", operation, total);

        let fetch = Arc::new(fetch);
        let mut handles = Vec::with_capacity(total);

        for instrument in instruments {
            let db = self.db.clone();
            let rate_limiter = self.rate_limiter.clone();
            let fetch = fetch.clone();
            let operation = operation.to_string();

            handles.push(tokio::spawn(async move {
                process_instrument(db, rate_limiter, &operation, instrument, fetch.as_ref()).await
            }));
        }

        let mut summary = BatchSummary {
            processed: total,
            ..Default::default()
        };

        // 批次汇总在所有品种的独立工作单元结束后才定稿
        for joined in join_all(handles).await {
            let counts = match joined {
                Ok(counts) => counts,
                Err(e) => {
                    error!(target: "orchestrator", "品种处理任务 panic: {:?}", e);
                    InstrumentCounts::errored()
                }
            };

            if counts.succeeded {
                summary.succeeded += 1;
            }
            if counts.no_data {
                summary.no_data += 1;
            }
            if counts.errored {
                summary.errored += 1;
            }
            summary.total_records += counts.total_records;
            summary.inserted += counts.inserted;
            summary.skipped_existing += counts.skipped_existing;
            summary.filtered_invalid += counts.filtered_invalid;
        }

        info!(target: "orchestrator", "批次 {} 完成: {}", operation, summary.describe());
        summary
    }
}

/// 处理单个品种：许可 → 拉取 → 归还 → 校验 → 幂等写入
///
/// 任何错误都收敛在这里，调用方只拿到计数
async fn process_instrument<R, F, Fut>(
    db: Arc<Database>,
    rate_limiter: Arc<RateLimiter>,
    operation: &str,
    instrument: Instrument,
    fetch: &F,
) -> InstrumentCounts
where
    R: PersistRecord + Send + 'static,
    F: Fn(Instrument) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FetchOutcome<R>>> + Send,
{
    let figi = instrument.figi.clone();

    // 许可覆盖上游调用本身；落库不占许可
    let permit = match rate_limiter.acquire(operation).await {
        Ok(permit) => permit,
        Err(e) => {
            warn!(target: "orchestrator", "{}: 获取许可失败: {}", figi, e);
            return InstrumentCounts::errored();
        }
    };

    let outcome = fetch(instrument).await;
    drop(permit);

    let records = match outcome {
        Ok(FetchOutcome::Data(records)) if records.is_empty() => {
            debug!(target: "orchestrator", "{}: 无数据", figi);
            return InstrumentCounts::no_data();
        }
        Ok(FetchOutcome::Data(records)) => records,
        Ok(FetchOutcome::NoData) => {
            debug!(target: "orchestrator", "{}: 无数据", figi);
            return InstrumentCounts::no_data();
        }
        Err(e) => {
            error!(target: "orchestrator", "{}: 上游拉取失败: {}", figi, e);
            return InstrumentCounts::errored();
        }
    };

    let mut counts = InstrumentCounts {
        succeeded: true,
        no_data: false,
        errored: false,
        total_records: records.len(),
        inserted: 0,
        skipped_existing: 0,
        filtered_invalid: 0,
    };

    for record in &records {
        if !record.is_valid() {
            debug!(target: "orchestrator", "{}: 丢弃无效记录 {}", figi, record.natural_key());
            counts.filtered_invalid += 1;
            continue;
        }

        match db.put_if_absent(record) {
            Ok(InsertOutcome::Inserted) => counts.inserted += 1,
            Ok(InsertOutcome::SkippedExisting) => counts.skipped_existing += 1,
            Err(e) => {
                error!(target: "orchestrator", "{}: 写入 {} 失败: {}", figi, record.natural_key(), e);
                counts.succeeded = false;
                counts.errored = true;
                return counts;
            }
        }
    }

    counts
}
