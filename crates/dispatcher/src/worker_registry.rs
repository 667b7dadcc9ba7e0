use chrono::{DateTime, Duration, Utc};
use coordinator_core::{CoordinatorConfig, CoordinatorError, CoordinatorResult};
use coordinator_domain::{
    parse_positive_id, NewWorker, StoreTransaction, UserAgent, WorkState, Worker, WorkerSummary,
};
use tracing::{debug, info};

/// Worker身份与心跳
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    liveness_timeout: Duration,
    max_client_address_chars: usize,
}

impl WorkerRegistry {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            liveness_timeout: config.liveness_timeout(),
            max_client_address_chars: config.max_client_address_chars,
        }
    }

    /// 创建一个尚未心跳的Worker
    pub async fn register(
        &self,
        tx: &mut dyn StoreTransaction,
        user_agent_hint: Option<&str>,
        client_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Worker> {
        let ip_address = client_address
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(|addr| addr.chars().take(self.max_client_address_chars).collect::<String>());

        if let Some(addr) = &ip_address {
            info!("Worker started at {}", addr);
        }

        let user_agent = user_agent_hint
            .map(UserAgent::parse)
            .unwrap_or_else(UserAgent::unknown);

        let worker = tx
            .insert_worker(&NewWorker {
                user_agent,
                ip_address,
                created_at: now,
            })
            .await?;

        info!(worker_id = worker.id, "注册Worker");
        Ok(worker)
    }

    /// 刷新心跳并更新User-Agent
    ///
    /// ID缺失、非数字、零或负数都按未知Worker处理。
    pub async fn touch(
        &self,
        tx: &mut dyn StoreTransaction,
        raw_worker_id: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Worker> {
        let worker_id = parse_positive_id(raw_worker_id)
            .ok_or_else(|| CoordinatorError::unknown_worker(raw_worker_id))?;

        let worker = tx
            .update_heartbeat(worker_id, &UserAgent::parse(user_agent), now)
            .await?
            .ok_or_else(|| CoordinatorError::unknown_worker(worker_id.to_string()))?;

        debug!(worker_id = worker.id, "Worker心跳");
        Ok(worker)
    }

    pub async fn list(
        &self,
        tx: &mut dyn StoreTransaction,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<WorkerSummary>> {
        let workers = tx.list_workers().await?;
        let mut summaries = Vec::with_capacity(workers.len());

        for worker in workers {
            let entries = tx.entries_for_worker(worker.id).await?;
            let count = |state: WorkState| entries.iter().filter(|e| e.state == state).count();

            summaries.push(WorkerSummary {
                alive: worker.is_alive(now, self.liveness_timeout),
                pending_entries: count(WorkState::Pending),
                dispatched_entries: count(WorkState::Dispatched),
                worker,
            });
        }

        Ok(summaries)
    }
}
