use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_core::{CoordinatorError, CoordinatorResult};
use coordinator_domain::{
    CollectedWorkers, CoordinatorStore, LinkedEntry, NewTestSuite, NewWorkQueueEntry, NewWorker,
    StoreTransaction, TestRun, TestRunQueueLink, TestSuite, UserAgent, WorkQueueEntry, WorkState,
    Worker,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// 内存存储实现
///
/// 事务持有全局锁并在状态副本上修改，提交时整体替换，未提交即丢弃。
/// 语义与SQLite实现一致，适用于测试和零配置运行。
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    workers: BTreeMap<i64, Worker>,
    entries: BTreeMap<i64, WorkQueueEntry>,
    suites: BTreeMap<i64, TestSuite>,
    runs: BTreeMap<i64, TestRun>,
    links: BTreeMap<i64, TestRunQueueLink>,
    sequences: Sequences,
}

/// 与AUTOINCREMENT一致：ID只增不复用
#[derive(Debug, Clone, Default)]
struct Sequences {
    worker: i64,
    entry: i64,
    suite: i64,
    run: i64,
    link: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinatorStore for InMemoryStore {
    async fn begin(&self) -> CoordinatorResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard: Some(guard),
            working,
        }))
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        Ok(())
    }
}

pub struct InMemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    working: MemoryState,
}

impl InMemoryTransaction {
    fn state(&mut self) -> CoordinatorResult<&mut MemoryState> {
        if self.guard.is_none() {
            return Err(CoordinatorError::Internal("事务已提交".to_string()));
        }
        Ok(&mut self.working)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_worker(&mut self, worker: &NewWorker) -> CoordinatorResult<Worker> {
        let state = self.state()?;
        let worker = Worker {
            id: next_id(&mut state.sequences.worker),
            user_agent: worker.user_agent.clone(),
            ip_address: worker.ip_address.clone(),
            last_heartbeat: None,
            created_at: worker.created_at,
        };
        state.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn find_worker(&mut self, id: i64) -> CoordinatorResult<Option<Worker>> {
        Ok(self.state()?.workers.get(&id).cloned())
    }

    async fn list_workers(&mut self) -> CoordinatorResult<Vec<Worker>> {
        Ok(self.state()?.workers.values().cloned().collect())
    }

    async fn update_heartbeat(
        &mut self,
        id: i64,
        user_agent: &UserAgent,
        at: DateTime<Utc>,
    ) -> CoordinatorResult<Option<Worker>> {
        let state = self.state()?;
        Ok(state.workers.get_mut(&id).map(|worker| {
            worker.last_heartbeat = Some(at);
            worker.user_agent = user_agent.clone();
            worker.clone()
        }))
    }

    async fn delete_workers_seen_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> CoordinatorResult<CollectedWorkers> {
        let state = self.state()?;
        let worker_ids: Vec<i64> = state
            .workers
            .values()
            .filter(|w| w.liveness_reference() < cutoff)
            .map(|w| w.id)
            .collect();

        if worker_ids.is_empty() {
            return Ok(CollectedWorkers::default());
        }

        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| !worker_ids.contains(&entry.worker_id));
        let entries_removed = (before - state.entries.len()) as u64;

        for id in &worker_ids {
            state.workers.remove(id);
        }

        debug!("内存存储删除 {} 个Worker", worker_ids.len());
        Ok(CollectedWorkers {
            worker_ids,
            entries_removed,
        })
    }

    async fn insert_entry(
        &mut self,
        entry: &NewWorkQueueEntry,
    ) -> CoordinatorResult<WorkQueueEntry> {
        let state = self.state()?;
        if !state.workers.contains_key(&entry.worker_id) {
            return Err(CoordinatorError::database_error(format!(
                "外键约束失败: worker {} 不存在",
                entry.worker_id
            )));
        }
        let entry = WorkQueueEntry {
            id: next_id(&mut state.sequences.entry),
            worker_id: entry.worker_id,
            command: entry.command,
            args: entry.args.clone(),
            description: entry.description.clone(),
            state: WorkState::Pending,
            results: None,
            created_at: entry.created_at,
        };
        state.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn find_entry(&mut self, id: i64) -> CoordinatorResult<Option<WorkQueueEntry>> {
        Ok(self.state()?.entries.get(&id).cloned())
    }

    async fn oldest_pending_entry(
        &mut self,
        worker_id: i64,
    ) -> CoordinatorResult<Option<WorkQueueEntry>> {
        Ok(self
            .state()?
            .entries
            .values()
            .filter(|e| e.worker_id == worker_id && e.state == WorkState::Pending)
            .min_by_key(|e| (e.created_at, e.id))
            .cloned())
    }

    async fn entries_for_worker(
        &mut self,
        worker_id: i64,
    ) -> CoordinatorResult<Vec<WorkQueueEntry>> {
        Ok(self
            .state()?
            .entries
            .values()
            .filter(|e| e.worker_id == worker_id)
            .cloned()
            .collect())
    }

    async fn transition_entry(
        &mut self,
        id: i64,
        from: WorkState,
        to: WorkState,
    ) -> CoordinatorResult<bool> {
        match self.state()?.entries.get_mut(&id) {
            Some(entry) if entry.state == from => {
                entry.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_entry(
        &mut self,
        id: i64,
        from: WorkState,
        results: &Value,
    ) -> CoordinatorResult<bool> {
        match self.state()?.entries.get_mut(&id) {
            Some(entry) if entry.state == from => {
                entry.state = WorkState::Finished;
                entry.results = Some(results.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_test_suite(&mut self, suite: &NewTestSuite) -> CoordinatorResult<TestSuite> {
        let state = self.state()?;
        let suite = TestSuite {
            id: next_id(&mut state.sequences.suite),
            name: suite.name.clone(),
            url: suite.url.clone(),
            created_at: Utc::now(),
        };
        state.suites.insert(suite.id, suite.clone());
        Ok(suite)
    }

    async fn find_test_suite(&mut self, id: i64) -> CoordinatorResult<Option<TestSuite>> {
        Ok(self.state()?.suites.get(&id).cloned())
    }

    async fn insert_test_run(
        &mut self,
        test_suite_id: i64,
        at: DateTime<Utc>,
    ) -> CoordinatorResult<TestRun> {
        let state = self.state()?;
        if !state.suites.contains_key(&test_suite_id) {
            return Err(CoordinatorError::database_error(format!(
                "外键约束失败: test_suite {test_suite_id} 不存在"
            )));
        }
        let run = TestRun {
            id: next_id(&mut state.sequences.run),
            test_suite_id,
            created_at: at,
            last_modified: at,
        };
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn find_test_run(&mut self, id: i64) -> CoordinatorResult<Option<TestRun>> {
        Ok(self.state()?.runs.get(&id).cloned())
    }

    async fn insert_link(
        &mut self,
        test_run_id: i64,
        work_queue_entry_id: i64,
    ) -> CoordinatorResult<TestRunQueueLink> {
        let state = self.state()?;
        let link = TestRunQueueLink {
            id: next_id(&mut state.sequences.link),
            test_run_id,
            work_queue_entry_id,
        };
        state.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn links_for_test_run(
        &mut self,
        test_run_id: i64,
    ) -> CoordinatorResult<Vec<LinkedEntry>> {
        let state = self.state()?;
        Ok(state
            .links
            .values()
            .filter(|l| l.test_run_id == test_run_id)
            .map(|link| LinkedEntry {
                link: link.clone(),
                entry: state.entries.get(&link.work_queue_entry_id).cloned(),
            })
            .collect())
    }

    async fn commit(&mut self) -> CoordinatorResult<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| CoordinatorError::Internal("事务已提交".to_string()))?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
