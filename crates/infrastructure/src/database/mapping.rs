//! SQLite行到领域实体的映射
//!
//! JSON列以TEXT保存，枚举列保存线上名称。

use coordinator_core::{CoordinatorError, CoordinatorResult};
use coordinator_domain::{
    Command, TestRun, TestRunQueueLink, TestSuite, UserAgent, WorkQueueEntry, WorkState, Worker,
};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_json_column(row: &SqliteRow, field_name: &str) -> CoordinatorResult<Value> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str).map_err(|e| {
            CoordinatorError::Serialization(format!("解析{field_name}失败: {e}"))
        })
    }

    pub fn parse_optional_json_column(
        row: &SqliteRow,
        field_name: &str,
    ) -> CoordinatorResult<Option<Value>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => serde_json::from_str(&json_str).map(Some).map_err(|e| {
                CoordinatorError::Serialization(format!("解析{field_name}失败: {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn row_to_worker(row: &SqliteRow) -> CoordinatorResult<Worker> {
        Ok(Worker {
            id: row.try_get("id")?,
            user_agent: UserAgent {
                raw: row.try_get("user_agent")?,
                engine: row.try_get("engine")?,
                version: row.try_get("engine_version")?,
            },
            ip_address: row.try_get("ip_address")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn row_to_entry(row: &SqliteRow) -> CoordinatorResult<WorkQueueEntry> {
        let cmd: String = row.try_get("cmd")?;
        let state: String = row.try_get("state")?;
        let args = match Self::parse_json_column(row, "cmd_args")? {
            Value::Array(args) => args,
            other => vec![other],
        };

        Ok(WorkQueueEntry {
            id: row.try_get("id")?,
            worker_id: row.try_get("worker_id")?,
            command: cmd.parse::<Command>().map_err(CoordinatorError::DatabaseOperation)?,
            args,
            description: row.try_get("description")?,
            state: state
                .parse::<WorkState>()
                .map_err(CoordinatorError::DatabaseOperation)?,
            results: Self::parse_optional_json_column(row, "results")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn row_to_test_suite(row: &SqliteRow) -> CoordinatorResult<TestSuite> {
        Ok(TestSuite {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn row_to_test_run(row: &SqliteRow) -> CoordinatorResult<TestRun> {
        Ok(TestRun {
            id: row.try_get("id")?,
            test_suite_id: row.try_get("test_suite_id")?,
            created_at: row.try_get("created_at")?,
            last_modified: row.try_get("last_modified")?,
        })
    }

    pub fn row_to_link(row: &SqliteRow) -> CoordinatorResult<TestRunQueueLink> {
        Ok(TestRunQueueLink {
            id: row.try_get("link_id")?,
            test_run_id: row.try_get("test_run_id")?,
            work_queue_entry_id: row.try_get("work_queue_id")?,
        })
    }
}
