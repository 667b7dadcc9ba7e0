//! Worker轮询协议的响应结构
//!
//! 浏览器端的代理直接解析这些JSON，字段名属于对外契约。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::Command;

pub const UNKNOWN_WORKER_DESCRIPTION: &str = "Unknown worker ID";
pub const NO_COMMANDS_DESCRIPTION: &str = "No commands from server.";
pub const RESULT_RECEIVED_DESCRIPTION: &str = "Test result received";

/// 弹出的一条待执行命令
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispatch {
    pub work_queue_id: i64,
    pub cmd: Command,
    pub desc: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PollResponse {
    /// Worker ID无法识别，要求浏览器端重新注册
    Restart {
        work_queue_id: i64,
        cmd: Command,
        description: String,
        args: Vec<Value>,
    },
    Dispatch(Dispatch),
    Idle {
        desc: String,
    },
}

impl PollResponse {
    pub fn restart() -> Self {
        PollResponse::Restart {
            work_queue_id: -1,
            cmd: Command::Restart,
            description: UNKNOWN_WORKER_DESCRIPTION.to_string(),
            args: Vec::new(),
        }
    }

    pub fn idle() -> Self {
        PollResponse::Idle {
            desc: NO_COMMANDS_DESCRIPTION.to_string(),
        }
    }

    pub fn dispatched(&self) -> Option<&Dispatch> {
        match self {
            PollResponse::Dispatch(dispatch) => Some(dispatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitAck {
    pub desc: String,
}

impl SubmitAck {
    pub fn received() -> Self {
        Self {
            desc: RESULT_RECEIVED_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub worker_id: i64,
}
