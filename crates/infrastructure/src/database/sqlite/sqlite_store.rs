use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_core::{CoordinatorError, CoordinatorResult};
use coordinator_domain::{
    CollectedWorkers, CoordinatorStore, LinkedEntry, NewTestSuite, NewWorkQueueEntry, NewWorker,
    StoreTransaction, TestRun, TestRunQueueLink, TestSuite, UserAgent, WorkQueueEntry, WorkState,
    Worker,
};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::database::mapping::MappingHelpers;

const WORKER_COLUMNS: &str =
    "id, user_agent, engine, engine_version, ip_address, last_heartbeat, created_at";
const ENTRY_COLUMNS: &str =
    "id, worker_id, cmd, cmd_args, description, state, results, created_at";

/// 基于SQLite的存储
///
/// SQLite同一时刻只允许一个写事务，这里在进程内串行化事务，
/// 避免延迟事务升级写锁时的 `SQLITE_BUSY`。
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CoordinatorStore for SqliteStore {
    async fn begin(&self) -> CoordinatorResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let tx = self.pool.begin().await.map_err(CoordinatorError::Database)?;
        Ok(Box::new(SqliteTransaction {
            tx: Some(tx),
            _guard: guard,
        }))
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(CoordinatorError::Database)?;
        Ok(())
    }
}

/// 未提交即丢弃时由sqlx回滚
pub struct SqliteTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
    _guard: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    fn conn(&mut self) -> CoordinatorResult<&mut SqliteConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(CoordinatorError::Internal("事务已提交".to_string())),
        }
    }

    async fn fetch_entry(&mut self, id: i64) -> CoordinatorResult<Option<WorkQueueEntry>> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM work_queue WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(CoordinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_entry).transpose()
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn insert_worker(&mut self, worker: &NewWorker) -> CoordinatorResult<Worker> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO workers (user_agent, engine, engine_version, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {WORKER_COLUMNS}
            "#
        ))
        .bind(&worker.user_agent.raw)
        .bind(&worker.user_agent.engine)
        .bind(&worker.user_agent.version)
        .bind(&worker.ip_address)
        .bind(worker.created_at)
        .fetch_one(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        let worker = MappingHelpers::row_to_worker(&row)?;
        debug!("创建Worker记录: {}", worker.id);
        Ok(worker)
    }

    async fn find_worker(&mut self, id: i64) -> CoordinatorResult<Option<Worker>> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(CoordinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_worker).transpose()
    }

    async fn list_workers(&mut self) -> CoordinatorResult<Vec<Worker>> {
        let rows = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY id"))
            .fetch_all(self.conn()?)
            .await
            .map_err(CoordinatorError::Database)?;

        rows.iter().map(MappingHelpers::row_to_worker).collect()
    }

    async fn update_heartbeat(
        &mut self,
        id: i64,
        user_agent: &UserAgent,
        at: DateTime<Utc>,
    ) -> CoordinatorResult<Option<Worker>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE workers
            SET last_heartbeat = $2, user_agent = $3, engine = $4, engine_version = $5
            WHERE id = $1
            RETURNING {WORKER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .bind(&user_agent.raw)
        .bind(&user_agent.engine)
        .bind(&user_agent.version)
        .fetch_optional(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_worker).transpose()
    }

    async fn delete_workers_seen_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> CoordinatorResult<CollectedWorkers> {
        let rows = sqlx::query(
            "SELECT id FROM workers WHERE COALESCE(last_heartbeat, created_at) < $1 ORDER BY id",
        )
        .bind(cutoff)
        .fetch_all(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        let worker_ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        if worker_ids.is_empty() {
            return Ok(CollectedWorkers::default());
        }

        let mut entries_removed = 0;
        for worker_id in &worker_ids {
            // 显式删除条目，不依赖连接上的外键开关
            let result = sqlx::query("DELETE FROM work_queue WHERE worker_id = $1")
                .bind(worker_id)
                .execute(self.conn()?)
                .await
                .map_err(CoordinatorError::Database)?;
            entries_removed += result.rows_affected();

            sqlx::query("DELETE FROM workers WHERE id = $1")
                .bind(worker_id)
                .execute(self.conn()?)
                .await
                .map_err(CoordinatorError::Database)?;
        }

        debug!("删除 {} 个过期Worker", worker_ids.len());
        Ok(CollectedWorkers {
            worker_ids,
            entries_removed,
        })
    }

    async fn insert_entry(
        &mut self,
        entry: &NewWorkQueueEntry,
    ) -> CoordinatorResult<WorkQueueEntry> {
        let args_json = serde_json::to_string(&entry.args)
            .map_err(|e| CoordinatorError::Serialization(format!("序列化命令参数失败: {e}")))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO work_queue (worker_id, cmd, cmd_args, description, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.worker_id)
        .bind(entry.command.as_str())
        .bind(args_json)
        .bind(&entry.description)
        .bind(WorkState::Pending.as_str())
        .bind(entry.created_at)
        .fetch_one(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        MappingHelpers::row_to_entry(&row)
    }

    async fn find_entry(&mut self, id: i64) -> CoordinatorResult<Option<WorkQueueEntry>> {
        self.fetch_entry(id).await
    }

    async fn oldest_pending_entry(
        &mut self,
        worker_id: i64,
    ) -> CoordinatorResult<Option<WorkQueueEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM work_queue
            WHERE worker_id = $1 AND state = $2
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#
        ))
        .bind(worker_id)
        .bind(WorkState::Pending.as_str())
        .fetch_optional(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_entry).transpose()
    }

    async fn entries_for_worker(
        &mut self,
        worker_id: i64,
    ) -> CoordinatorResult<Vec<WorkQueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM work_queue WHERE worker_id = $1 ORDER BY created_at, id"
        ))
        .bind(worker_id)
        .fetch_all(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        rows.iter().map(MappingHelpers::row_to_entry).collect()
    }

    async fn transition_entry(
        &mut self,
        id: i64,
        from: WorkState,
        to: WorkState,
    ) -> CoordinatorResult<bool> {
        let result = sqlx::query("UPDATE work_queue SET state = $3 WHERE id = $1 AND state = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(self.conn()?)
            .await
            .map_err(CoordinatorError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_entry(
        &mut self,
        id: i64,
        from: WorkState,
        results: &Value,
    ) -> CoordinatorResult<bool> {
        let results_json = serde_json::to_string(results)
            .map_err(|e| CoordinatorError::Serialization(format!("序列化测试结果失败: {e}")))?;

        let result = sqlx::query(
            "UPDATE work_queue SET state = $3, results = $4 WHERE id = $1 AND state = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(WorkState::Finished.as_str())
        .bind(results_json)
        .execute(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_test_suite(&mut self, suite: &NewTestSuite) -> CoordinatorResult<TestSuite> {
        let row = sqlx::query(
            r#"
            INSERT INTO test_suites (name, url, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, url, created_at
            "#,
        )
        .bind(&suite.name)
        .bind(&suite.url)
        .bind(Utc::now())
        .fetch_one(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        MappingHelpers::row_to_test_suite(&row)
    }

    async fn find_test_suite(&mut self, id: i64) -> CoordinatorResult<Option<TestSuite>> {
        let row = sqlx::query("SELECT id, name, url, created_at FROM test_suites WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(CoordinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_test_suite).transpose()
    }

    async fn insert_test_run(
        &mut self,
        test_suite_id: i64,
        at: DateTime<Utc>,
    ) -> CoordinatorResult<TestRun> {
        let row = sqlx::query(
            r#"
            INSERT INTO test_runs (test_suite_id, created_at, last_modified)
            VALUES ($1, $2, $2)
            RETURNING id, test_suite_id, created_at, last_modified
            "#,
        )
        .bind(test_suite_id)
        .bind(at)
        .fetch_one(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        MappingHelpers::row_to_test_run(&row)
    }

    async fn find_test_run(&mut self, id: i64) -> CoordinatorResult<Option<TestRun>> {
        let row = sqlx::query(
            "SELECT id, test_suite_id, created_at, last_modified FROM test_runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_test_run).transpose()
    }

    async fn insert_link(
        &mut self,
        test_run_id: i64,
        work_queue_entry_id: i64,
    ) -> CoordinatorResult<TestRunQueueLink> {
        let row = sqlx::query(
            r#"
            INSERT INTO test_run_queue (test_run_id, work_queue_id)
            VALUES ($1, $2)
            RETURNING id AS link_id, test_run_id, work_queue_id
            "#,
        )
        .bind(test_run_id)
        .bind(work_queue_entry_id)
        .fetch_one(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        MappingHelpers::row_to_link(&row)
    }

    async fn links_for_test_run(
        &mut self,
        test_run_id: i64,
    ) -> CoordinatorResult<Vec<LinkedEntry>> {
        let rows = sqlx::query(
            "SELECT id AS link_id, test_run_id, work_queue_id FROM test_run_queue WHERE test_run_id = $1 ORDER BY id",
        )
        .bind(test_run_id)
        .fetch_all(self.conn()?)
        .await
        .map_err(CoordinatorError::Database)?;

        let links = rows
            .iter()
            .map(MappingHelpers::row_to_link)
            .collect::<CoordinatorResult<Vec<_>>>()?;

        let mut linked = Vec::with_capacity(links.len());
        for link in links {
            let entry = self.fetch_entry(link.work_queue_entry_id).await?;
            linked.push(LinkedEntry { link, entry });
        }
        Ok(linked)
    }

    async fn commit(&mut self) -> CoordinatorResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| CoordinatorError::Internal("事务已提交".to_string()))?;
        tx.commit().await.map_err(CoordinatorError::Database)?;
        Ok(())
    }
}
