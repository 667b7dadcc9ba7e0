use chrono::{DateTime, Duration, Utc};
use coordinator_core::CoordinatorResult;
use coordinator_domain::StoreTransaction;
use coordinator_infrastructure::observability::WORKERS_COLLECTED_TOTAL;
use metrics::counter;
use tracing::info;

/// 一次清扫的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub collected_worker_ids: Vec<i64>,
    pub entries_removed: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.collected_worker_ids.is_empty()
    }
}

/// 回收心跳超时的Worker
///
/// 没有后台定时器，每次轮询和注册时同步清扫；重复执行不会产生额外影响。
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    liveness_timeout: Duration,
}

impl GarbageCollector {
    pub fn new(liveness_timeout: Duration) -> Self {
        Self { liveness_timeout }
    }

    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    pub async fn sweep(
        &self,
        tx: &mut dyn StoreTransaction,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<SweepReport> {
        let cutoff = now - self.liveness_timeout;
        let collected = tx.delete_workers_seen_before(cutoff).await?;

        if !collected.worker_ids.is_empty() {
            counter!(WORKERS_COLLECTED_TOTAL).increment(collected.worker_ids.len() as u64);
            info!(
                workers = ?collected.worker_ids,
                entries_removed = collected.entries_removed,
                "回收心跳超时的Worker"
            );
        }

        Ok(SweepReport {
            collected_worker_ids: collected.worker_ids,
            entries_removed: collected.entries_removed,
        })
    }
}
