use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::value_objects::UserAgent;

/// 一个轮询中的浏览器Worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: i64,
    pub user_agent: UserAgent,
    pub ip_address: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// 计算存活状态所依据的时间点；尚未轮询过的Worker以创建时间为准
    pub fn liveness_reference(&self) -> DateTime<Utc> {
        self.last_heartbeat.unwrap_or(self.created_at)
    }

    /// 检查心跳是否超时
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.liveness_reference() > timeout
    }

    pub fn is_alive(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.is_expired(now, timeout)
    }
}

#[derive(Debug, Clone)]
pub struct NewWorker {
    pub user_agent: UserAgent,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Worker列表视图，附带派生的存活状态
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    #[serde(flatten)]
    pub worker: Worker,
    pub alive: bool,
    pub pending_entries: usize,
    pub dispatched_entries: usize,
}

/// Worker端可识别的命令，需与浏览器端的分发器保持一致
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    RunTest,
    Reload,
    ChangeRate,
    Restart,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::RunTest => "run_test",
            Command::Reload => "reload",
            Command::ChangeRate => "change_rate",
            Command::Restart => "restart",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run_test" => Ok(Command::RunTest),
            "reload" => Ok(Command::Reload),
            "change_rate" => Ok(Command::ChangeRate),
            "restart" => Ok(Command::Restart),
            _ => Err(format!("Invalid command: {s}")),
        }
    }
}

/// 工作队列条目的生命周期
///
/// `Pending → Dispatched → Finished`，已完成的条目允许重复提交结果（覆盖）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    Pending,
    Dispatched,
    Finished,
}

impl WorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::Pending => "pending",
            WorkState::Dispatched => "dispatched",
            WorkState::Finished => "finished",
        }
    }

    pub fn can_transition_to(&self, next: WorkState) -> bool {
        matches!(
            (self, next),
            (WorkState::Pending, WorkState::Dispatched)
                | (WorkState::Dispatched, WorkState::Finished)
                | (WorkState::Finished, WorkState::Finished)
        )
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkState::Pending),
            "dispatched" => Ok(WorkState::Dispatched),
            "finished" => Ok(WorkState::Finished),
            _ => Err(format!("Invalid work state: {s}")),
        }
    }
}

/// 一条可分发的命令及其最终结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkQueueEntry {
    pub id: i64,
    pub worker_id: i64,
    pub command: Command,
    /// 发给Worker的参数列表（线上格式）
    pub args: Vec<Value>,
    pub description: String,
    pub state: WorkState,
    pub results: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl WorkQueueEntry {
    pub fn work_received(&self) -> bool {
        self.state != WorkState::Pending
    }

    pub fn finished(&self) -> bool {
        self.state == WorkState::Finished
    }

    pub fn results_received(&self) -> bool {
        self.results.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewWorkQueueEntry {
    pub worker_id: i64,
    pub command: Command,
    pub args: Vec<Value>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// 测试套件定义（外部维护，这里只保留分发所需的名称和地址）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSuite {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTestSuite {
    pub name: String,
    pub url: String,
}

/// 测试套件的一次执行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    pub id: i64,
    pub test_suite_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// 记录为某次TestRun创建的工作队列条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRunQueueLink {
    pub id: i64,
    pub test_run_id: i64,
    pub work_queue_entry_id: i64,
}

/// 关联记录与其条目；条目随Worker被回收后为 `None`
#[derive(Debug, Clone)]
pub struct LinkedEntry {
    pub link: TestRunQueueLink,
    pub entry: Option<WorkQueueEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunEntryStatus {
    pub work_queue_id: i64,
    pub worker_id: i64,
    pub state: WorkState,
    pub results: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunStatus {
    pub test_run: TestRun,
    pub finished: bool,
    pub entries: Vec<TestRunEntryStatus>,
    /// 指向已被回收条目的关联数量
    pub dangling_links: usize,
}

impl TestRunStatus {
    /// 仅依据仍然存在的条目计算是否完成
    pub fn from_links(test_run: TestRun, links: Vec<LinkedEntry>) -> Self {
        let mut entries = Vec::new();
        let mut dangling_links = 0;

        for linked in links {
            match linked.entry {
                Some(entry) => entries.push(TestRunEntryStatus {
                    work_queue_id: entry.id,
                    worker_id: entry.worker_id,
                    state: entry.state,
                    results: entry.results,
                }),
                None => dangling_links += 1,
            }
        }

        let finished = entries.iter().all(|e| e.state == WorkState::Finished);

        Self {
            test_run,
            finished,
            entries,
            dangling_links,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunStarted {
    pub test_run: TestRun,
    pub work_queue_ids: Vec<i64>,
}
