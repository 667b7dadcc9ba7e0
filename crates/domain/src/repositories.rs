//! 存储抽象
//!
//! 协调器的每个操作都在一个 [`StoreTransaction`] 内完成：提交前的修改对其他操作不可见，
//! 事务被丢弃而未提交时所有修改作废。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_core::CoordinatorResult;
use serde_json::Value;

use crate::entities::{
    LinkedEntry, NewTestSuite, NewWorkQueueEntry, NewWorker, TestRun, TestRunQueueLink,
    TestSuite, WorkQueueEntry, WorkState, Worker,
};
use crate::value_objects::UserAgent;

/// 一次回收删除的内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedWorkers {
    pub worker_ids: Vec<i64>,
    pub entries_removed: u64,
}

#[async_trait]
pub trait CoordinatorStore: Send + Sync {
    /// 开启一个工作单元
    async fn begin(&self) -> CoordinatorResult<Box<dyn StoreTransaction>>;

    async fn health_check(&self) -> CoordinatorResult<()>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_worker(&mut self, worker: &NewWorker) -> CoordinatorResult<Worker>;
    async fn find_worker(&mut self, id: i64) -> CoordinatorResult<Option<Worker>>;
    async fn list_workers(&mut self) -> CoordinatorResult<Vec<Worker>>;
    /// 刷新心跳；Worker不存在时返回 `None`
    async fn update_heartbeat(
        &mut self,
        id: i64,
        user_agent: &UserAgent,
        at: DateTime<Utc>,
    ) -> CoordinatorResult<Option<Worker>>;
    /// 删除最后心跳（或从未心跳时的创建时间）早于 `cutoff` 的Worker及其全部条目
    async fn delete_workers_seen_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> CoordinatorResult<CollectedWorkers>;

    async fn insert_entry(&mut self, entry: &NewWorkQueueEntry)
        -> CoordinatorResult<WorkQueueEntry>;
    async fn find_entry(&mut self, id: i64) -> CoordinatorResult<Option<WorkQueueEntry>>;
    /// 该Worker最早创建的 `Pending` 条目（创建时间相同按ID）
    async fn oldest_pending_entry(
        &mut self,
        worker_id: i64,
    ) -> CoordinatorResult<Option<WorkQueueEntry>>;
    async fn entries_for_worker(&mut self, worker_id: i64)
        -> CoordinatorResult<Vec<WorkQueueEntry>>;
    /// 条件更新：仅当条目当前处于 `from` 时改为 `to`，返回是否更新成功
    async fn transition_entry(
        &mut self,
        id: i64,
        from: WorkState,
        to: WorkState,
    ) -> CoordinatorResult<bool>;
    /// 条件更新：仅当条目当前处于 `from` 时写入结果并标记为 `Finished`
    async fn finish_entry(
        &mut self,
        id: i64,
        from: WorkState,
        results: &Value,
    ) -> CoordinatorResult<bool>;

    async fn insert_test_suite(&mut self, suite: &NewTestSuite) -> CoordinatorResult<TestSuite>;
    async fn find_test_suite(&mut self, id: i64) -> CoordinatorResult<Option<TestSuite>>;
    async fn insert_test_run(
        &mut self,
        test_suite_id: i64,
        at: DateTime<Utc>,
    ) -> CoordinatorResult<TestRun>;
    async fn find_test_run(&mut self, id: i64) -> CoordinatorResult<Option<TestRun>>;
    async fn insert_link(
        &mut self,
        test_run_id: i64,
        work_queue_entry_id: i64,
    ) -> CoordinatorResult<TestRunQueueLink>;
    /// 按关联ID排序；已被回收的条目对应 `entry: None`
    async fn links_for_test_run(&mut self, test_run_id: i64)
        -> CoordinatorResult<Vec<LinkedEntry>>;

    /// 提交事务；提交后该事务不可再使用
    async fn commit(&mut self) -> CoordinatorResult<()>;
}
