use chrono::{DateTime, Utc};
use coordinator_core::{CoordinatorError, CoordinatorResult};
use coordinator_domain::{
    CommandArgs, Dispatch, NewWorkQueueEntry, NormalizedResults, StoreTransaction,
    WorkQueueEntry, WorkState,
};
use serde_json::Value;
use tracing::debug;

/// 按Worker划分的FIFO命令队列
#[derive(Debug, Clone, Default)]
pub struct WorkQueue;

impl WorkQueue {
    pub fn new() -> Self {
        Self
    }

    /// 追加一条 `Pending` 条目；未指定描述时使用命令的默认描述
    pub async fn enqueue(
        &self,
        tx: &mut dyn StoreTransaction,
        worker_id: i64,
        args: &CommandArgs,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<WorkQueueEntry> {
        if tx.find_worker(worker_id).await?.is_none() {
            return Err(CoordinatorError::unknown_worker(worker_id.to_string()));
        }

        let entry = tx
            .insert_entry(&NewWorkQueueEntry {
                worker_id,
                command: args.command(),
                args: args.to_wire(),
                description: description
                    .unwrap_or_else(|| args.default_description())
                    .to_string(),
                created_at: now,
            })
            .await?;

        debug!(
            worker_id,
            work_queue_id = entry.id,
            cmd = %entry.command,
            "命令入队"
        );
        Ok(entry)
    }

    /// 取出最早的 `Pending` 条目并标记为 `Dispatched`
    ///
    /// 标记是条件更新，失败说明条目已被其他轮询取走，继续尝试下一条。
    pub async fn pop_next(
        &self,
        tx: &mut dyn StoreTransaction,
        worker_id: i64,
    ) -> CoordinatorResult<Option<Dispatch>> {
        while let Some(entry) = tx.oldest_pending_entry(worker_id).await? {
            if !tx
                .transition_entry(entry.id, WorkState::Pending, WorkState::Dispatched)
                .await?
            {
                debug!(work_queue_id = entry.id, "条目已被分发，跳过");
                continue;
            }

            let mut args = entry.args;
            if let Some(Value::Object(first)) = args.first_mut() {
                first.insert("work_queue_id".to_string(), Value::from(entry.id));
            }

            return Ok(Some(Dispatch {
                work_queue_id: entry.id,
                cmd: entry.command,
                desc: entry.description,
                args,
            }));
        }

        Ok(None)
    }

    /// 写入结果并标记为 `Finished`；已完成的条目再次提交时覆盖结果
    pub async fn mark_finished(
        &self,
        tx: &mut dyn StoreTransaction,
        entry_id: i64,
        results: &NormalizedResults,
    ) -> CoordinatorResult<WorkQueueEntry> {
        let mut entry = tx
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| CoordinatorError::unknown_entry(entry_id.to_string()))?;

        let invalid = |from: WorkState| CoordinatorError::InvalidStateTransition {
            id: entry_id,
            from: from.to_string(),
            to: WorkState::Finished.to_string(),
        };

        if !entry.state.can_transition_to(WorkState::Finished) {
            return Err(invalid(entry.state));
        }

        let value = results.to_value();
        if !tx.finish_entry(entry_id, entry.state, &value).await? {
            return Err(invalid(entry.state));
        }

        entry.state = WorkState::Finished;
        entry.results = Some(value);
        Ok(entry)
    }
}
