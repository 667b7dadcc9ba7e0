use std::sync::Arc;

use chrono::{DateTime, Utc};
use coordinator_core::{CoordinatorConfig, CoordinatorError, CoordinatorResult, ValidationError};
use coordinator_domain::{
    parse_positive_id, CommandArgs, CoordinatorStore, NewTestSuite, PollResponse,
    StoreTransaction, SubmitAck, TestRun, TestRunStarted, TestRunStatus, TestSuite,
    WorkQueueEntry, Worker, WorkerSummary,
};
use coordinator_infrastructure::observability::{
    DISPATCHED_TOTAL, POLLS_TOTAL, RESULTS_TOTAL, UNKNOWN_WORKER_TOTAL,
};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::garbage_collector::GarbageCollector;
use crate::result_validator::ResultValidator;
use crate::work_queue::WorkQueue;
use crate::worker_registry::WorkerRegistry;

/// 协调器
///
/// 每个操作在一个存储事务内完成：出错时事务被丢弃，不会留下部分修改。
pub struct Coordinator {
    store: Arc<dyn CoordinatorStore>,
    registry: WorkerRegistry,
    garbage_collector: GarbageCollector,
    work_queue: WorkQueue,
    validator: ResultValidator,
}

impl Coordinator {
    pub fn new(store: Arc<dyn CoordinatorStore>, config: &CoordinatorConfig) -> Self {
        Self {
            store,
            registry: WorkerRegistry::new(config),
            garbage_collector: GarbageCollector::new(config.liveness_timeout()),
            work_queue: WorkQueue::new(),
            validator: ResultValidator::new(),
        }
    }

    pub async fn health_check(&self) -> CoordinatorResult<()> {
        self.store.health_check().await
    }

    // ---- Worker端 ----

    pub async fn register(
        &self,
        user_agent_hint: Option<&str>,
        client_address: Option<&str>,
    ) -> CoordinatorResult<Worker> {
        self.register_at(user_agent_hint, client_address, Utc::now())
            .await
    }

    pub async fn register_at(
        &self,
        user_agent_hint: Option<&str>,
        client_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Worker> {
        let mut tx = self.store.begin().await?;
        self.garbage_collector.sweep(tx.as_mut(), now).await?;
        let worker = self
            .registry
            .register(tx.as_mut(), user_agent_hint, client_address, now)
            .await?;
        tx.commit().await?;
        Ok(worker)
    }

    /// 处理一次轮询：心跳、清扫、取出下一条命令
    ///
    /// 未知Worker不会报错，而是返回重启指令让浏览器重新注册。
    pub async fn poll(
        &self,
        raw_worker_id: &str,
        user_agent: &str,
    ) -> CoordinatorResult<PollResponse> {
        self.poll_at(raw_worker_id, user_agent, Utc::now()).await
    }

    pub async fn poll_at(
        &self,
        raw_worker_id: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<PollResponse> {
        counter!(POLLS_TOTAL).increment(1);
        let mut tx = self.store.begin().await?;

        let worker = match self
            .registry
            .touch(tx.as_mut(), raw_worker_id, user_agent, now)
            .await
        {
            Ok(worker) => worker,
            Err(CoordinatorError::UnknownWorker { id }) => {
                counter!(UNKNOWN_WORKER_TOTAL).increment(1);
                warn!(worker_id = %id, "未知Worker轮询，要求重启");
                return Ok(PollResponse::restart());
            }
            Err(e) => return Err(e),
        };

        self.garbage_collector.sweep(tx.as_mut(), now).await?;
        let dispatch = self.work_queue.pop_next(tx.as_mut(), worker.id).await?;
        tx.commit().await?;

        match dispatch {
            Some(dispatch) => {
                counter!(DISPATCHED_TOTAL).increment(1);
                info!(
                    worker_id = worker.id,
                    work_queue_id = dispatch.work_queue_id,
                    cmd = %dispatch.cmd,
                    "分发命令"
                );
                Ok(PollResponse::Dispatch(dispatch))
            }
            None => {
                debug!(worker_id = worker.id, "没有待分发的命令");
                Ok(PollResponse::idle())
            }
        }
    }

    pub async fn submit_results(
        &self,
        raw_work_queue_id: &str,
        raw_results: &str,
    ) -> CoordinatorResult<SubmitAck> {
        let entry_id = parse_positive_id(raw_work_queue_id)
            .ok_or_else(|| CoordinatorError::unknown_entry(raw_work_queue_id))?;

        let mut tx = self.store.begin().await?;
        if tx.find_entry(entry_id).await?.is_none() {
            warn!(work_queue_id = entry_id, "提交结果的条目不存在");
            return Err(CoordinatorError::unknown_entry(entry_id.to_string()));
        }

        let results = self
            .validator
            .parse_and_validate(raw_results)
            .inspect_err(|e| warn!(work_queue_id = entry_id, "拒绝测试结果: {}", e))?;

        let entry = self
            .work_queue
            .mark_finished(tx.as_mut(), entry_id, &results)
            .await?;
        tx.commit().await?;

        counter!(RESULTS_TOTAL).increment(1);
        info!(
            work_queue_id = entry.id,
            worker_id = entry.worker_id,
            passed = results.passed(),
            failed = results.failed(),
            "收到测试结果"
        );
        Ok(SubmitAck::received())
    }

    // ---- 管理端 ----

    /// 将一次TestRun推入指定Worker的队列
    pub async fn enqueue_job(
        &self,
        worker_id: i64,
        test_run_id: i64,
    ) -> CoordinatorResult<WorkQueueEntry> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let test_run = tx
            .find_test_run(test_run_id)
            .await?
            .ok_or(CoordinatorError::TestRunNotFound { id: test_run_id })?;
        let suite = self.find_suite(tx.as_mut(), test_run.test_suite_id).await?;

        let entry = self
            .enqueue_job_in(tx.as_mut(), worker_id, &test_run, &suite, now)
            .await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn enqueue_job_in(
        &self,
        tx: &mut dyn StoreTransaction,
        worker_id: i64,
        test_run: &TestRun,
        suite: &TestSuite,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<WorkQueueEntry> {
        let args = CommandArgs::RunTest {
            test_run_id: test_run.id,
            url: suite.url.clone(),
            name: suite.name.clone(),
        };
        let entry = self
            .work_queue
            .enqueue(tx, worker_id, &args, None, now)
            .await?;
        tx.insert_link(test_run.id, entry.id).await?;

        info!(
            worker_id,
            test_run_id = test_run.id,
            work_queue_id = entry.id,
            "TestRun入队"
        );
        Ok(entry)
    }

    async fn find_suite(
        &self,
        tx: &mut dyn StoreTransaction,
        test_suite_id: i64,
    ) -> CoordinatorResult<TestSuite> {
        tx.find_test_suite(test_suite_id)
            .await?
            .ok_or(CoordinatorError::TestSuiteNotFound { id: test_suite_id })
    }

    pub async fn create_test_suite(&self, suite: NewTestSuite) -> CoordinatorResult<TestSuite> {
        if suite.name.trim().is_empty() || suite.url.trim().is_empty() {
            return Err(ValidationError::Malformed(
                "test suite name and url are required".to_string(),
            )
            .into());
        }

        let mut tx = self.store.begin().await?;
        let suite = tx.insert_test_suite(&suite).await?;
        tx.commit().await?;

        info!(test_suite_id = suite.id, name = %suite.name, "创建测试套件");
        Ok(suite)
    }

    /// 创建TestRun并推送给所有存活的Worker
    pub async fn start_test_run(&self, test_suite_id: i64) -> CoordinatorResult<TestRunStarted> {
        self.start_test_run_at(test_suite_id, Utc::now()).await
    }

    pub async fn start_test_run_at(
        &self,
        test_suite_id: i64,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<TestRunStarted> {
        let mut tx = self.store.begin().await?;
        let suite = self.find_suite(tx.as_mut(), test_suite_id).await?;
        self.garbage_collector.sweep(tx.as_mut(), now).await?;

        let test_run = tx.insert_test_run(suite.id, now).await?;
        let timeout = self.garbage_collector.liveness_timeout();
        let workers = tx.list_workers().await?;

        let mut work_queue_ids = Vec::new();
        for worker in workers.iter().filter(|w| w.is_alive(now, timeout)) {
            let entry = self
                .enqueue_job_in(tx.as_mut(), worker.id, &test_run, &suite, now)
                .await?;
            work_queue_ids.push(entry.id);
        }
        tx.commit().await?;

        info!(
            test_run_id = test_run.id,
            workers = work_queue_ids.len(),
            "启动TestRun"
        );
        Ok(TestRunStarted {
            test_run,
            work_queue_ids,
        })
    }

    pub async fn restart_worker(&self, worker_id: i64) -> CoordinatorResult<WorkQueueEntry> {
        self.enqueue_command(worker_id, CommandArgs::Restart).await
    }

    pub async fn reload_worker(&self, worker_id: i64) -> CoordinatorResult<WorkQueueEntry> {
        self.enqueue_command(worker_id, CommandArgs::Reload).await
    }

    /// 调整Worker的轮询间隔（毫秒）
    pub async fn change_rate(
        &self,
        worker_id: i64,
        rate_ms: u64,
    ) -> CoordinatorResult<WorkQueueEntry> {
        if rate_ms == 0 {
            return Err(ValidationError::InvalidType {
                field: "rate_ms".to_string(),
                expected: "a positive number of milliseconds".to_string(),
            }
            .into());
        }
        self.enqueue_command(worker_id, CommandArgs::ChangeRate { rate: rate_ms })
            .await
    }

    async fn enqueue_command(
        &self,
        worker_id: i64,
        args: CommandArgs,
    ) -> CoordinatorResult<WorkQueueEntry> {
        let mut tx = self.store.begin().await?;
        let entry = self
            .work_queue
            .enqueue(tx.as_mut(), worker_id, &args, None, Utc::now())
            .await?;
        tx.commit().await?;

        info!(worker_id, cmd = %entry.command, "管理命令入队");
        Ok(entry)
    }

    pub async fn test_run_status(&self, test_run_id: i64) -> CoordinatorResult<TestRunStatus> {
        let mut tx = self.store.begin().await?;
        let test_run = tx
            .find_test_run(test_run_id)
            .await?
            .ok_or(CoordinatorError::TestRunNotFound { id: test_run_id })?;
        let links = tx.links_for_test_run(test_run_id).await?;
        Ok(TestRunStatus::from_links(test_run, links))
    }

    pub async fn list_workers(&self) -> CoordinatorResult<Vec<WorkerSummary>> {
        self.list_workers_at(Utc::now()).await
    }

    pub async fn list_workers_at(&self, now: DateTime<Utc>) -> CoordinatorResult<Vec<WorkerSummary>> {
        let mut tx = self.store.begin().await?;
        self.registry.list(tx.as_mut(), now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use coordinator_domain::{Command, WorkState};
    use coordinator_infrastructure::InMemoryStore;

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(InMemoryStore::new()), &CoordinatorConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_worker_gets_restart() {
        let coordinator = coordinator();
        for raw in ["", "0", "-5", "abc", "12345"] {
            let response = coordinator.poll(raw, "ua").await.unwrap();
            assert_eq!(response, PollResponse::restart(), "{raw}");
        }
    }

    #[tokio::test]
    async fn test_poll_idle_then_dispatch() {
        let coordinator = coordinator();
        let worker = coordinator.register(None, Some("127.0.0.1")).await.unwrap();
        let id = worker.id.to_string();

        assert_eq!(coordinator.poll(&id, "ua").await.unwrap(), PollResponse::idle());

        let entry = coordinator.reload_worker(worker.id).await.unwrap();
        let response = coordinator.poll(&id, "ua").await.unwrap();
        let dispatch = response.dispatched().unwrap();
        assert_eq!(dispatch.work_queue_id, entry.id);
        assert_eq!(dispatch.cmd, Command::Reload);
        assert_eq!(dispatch.desc, "Server said reload.");
    }

    #[tokio::test]
    async fn test_restart_command_description() {
        let coordinator = coordinator();
        let worker = coordinator.register(None, None).await.unwrap();
        let entry = coordinator.restart_worker(worker.id).await.unwrap();
        assert_eq!(entry.description, "Server said restart. Goodbye!");
        assert!(entry.args.is_empty());

        let entry = coordinator.change_rate(worker.id, 5000).await.unwrap();
        assert_eq!(entry.command, Command::ChangeRate);
        assert_eq!(entry.args, vec![serde_json::json!({"rate": 5000})]);
    }

    #[tokio::test]
    async fn test_poll_collects_expired_workers() {
        let coordinator = coordinator();
        let t0 = Utc::now();
        let stale = coordinator.register_at(None, None, t0).await.unwrap();
        coordinator.reload_worker(stale.id).await.unwrap();
        let live = coordinator
            .register_at(None, None, t0 + Duration::seconds(40))
            .await
            .unwrap();

        coordinator
            .poll_at(&live.id.to_string(), "ua", t0 + Duration::seconds(45))
            .await
            .unwrap();

        let workers = coordinator
            .list_workers_at(t0 + Duration::seconds(45))
            .await
            .unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].worker.id, live.id);

        let response = coordinator
            .poll_at(&stale.id.to_string(), "ua", t0 + Duration::seconds(46))
            .await
            .unwrap();
        assert_eq!(response, PollResponse::restart());
    }

    #[tokio::test]
    async fn test_submit_results_flow() {
        let coordinator = coordinator();
        let suite = coordinator
            .create_test_suite(NewTestSuite {
                name: "qunit".to_string(),
                url: "http://localhost/qunit/".to_string(),
            })
            .await
            .unwrap();
        let worker = coordinator.register(None, None).await.unwrap();
        let started = coordinator.start_test_run(suite.id).await.unwrap();
        assert_eq!(started.work_queue_ids.len(), 1);

        let response = coordinator.poll(&worker.id.to_string(), "ua").await.unwrap();
        let dispatch = response.dispatched().unwrap().clone();
        assert_eq!(dispatch.args[0]["test_run_id"], started.test_run.id);
        assert_eq!(dispatch.args[0]["work_queue_id"], dispatch.work_queue_id);

        let status = coordinator.test_run_status(started.test_run.id).await.unwrap();
        assert!(!status.finished);
        assert_eq!(status.entries[0].state, WorkState::Dispatched);

        let ack = coordinator
            .submit_results(
                &dispatch.work_queue_id.to_string(),
                r#"{"tests": [{"result": true, "module": "m", "test": "t", "message": "ok"}]}"#,
            )
            .await
            .unwrap();
        assert_eq!(ack, SubmitAck::received());

        let status = coordinator.test_run_status(started.test_run.id).await.unwrap();
        assert!(status.finished);
        assert_eq!(status.entries[0].results.as_ref().unwrap()["tests"][0]["test"], "t");
    }

    #[tokio::test]
    async fn test_invalid_submission_is_rolled_back() {
        let coordinator = coordinator();
        let worker = coordinator.register(None, None).await.unwrap();
        let entry = coordinator.reload_worker(worker.id).await.unwrap();
        coordinator.poll(&worker.id.to_string(), "ua").await.unwrap();

        let err = coordinator
            .submit_results(&entry.id.to_string(), r#"{"failures": 1}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        let workers = coordinator.list_workers().await.unwrap();
        assert_eq!(workers[0].dispatched_entries, 1);
    }

    #[tokio::test]
    async fn test_submit_for_unknown_entry() {
        let coordinator = coordinator();
        for raw in ["", "abc", "0", "77"] {
            let err = coordinator
                .submit_results(raw, r#"{"tests": []}"#)
                .await
                .unwrap_err();
            assert!(matches!(err, CoordinatorError::UnknownEntry { .. }), "{raw}");
        }
    }

    #[tokio::test]
    async fn test_start_test_run_without_workers() {
        let coordinator = coordinator();
        let suite = coordinator
            .create_test_suite(NewTestSuite {
                name: "empty".to_string(),
                url: "http://localhost/empty/".to_string(),
            })
            .await
            .unwrap();

        let started = coordinator.start_test_run(suite.id).await.unwrap();
        assert!(started.work_queue_ids.is_empty());
        let status = coordinator.test_run_status(started.test_run.id).await.unwrap();
        assert!(status.finished);

        let err = coordinator.start_test_run(999).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::TestSuiteNotFound { id: 999 }));
    }

    #[tokio::test]
    async fn test_enqueue_job_errors() {
        let coordinator = coordinator();
        let err = coordinator.enqueue_job(1, 1).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::TestRunNotFound { id: 1 }));

        let suite = coordinator
            .create_test_suite(NewTestSuite {
                name: "s".to_string(),
                url: "http://localhost/s/".to_string(),
            })
            .await
            .unwrap();
        let started = coordinator.start_test_run(suite.id).await.unwrap();
        let err = coordinator
            .enqueue_job(42, started.test_run.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownWorker { .. }));
    }
}
