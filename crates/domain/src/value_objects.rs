use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entities::Command;

/// 原始User-Agent最多保留的字符数
pub const MAX_USER_AGENT_CHARS: usize = 255;

/// 解析后的浏览器描述
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAgent {
    pub raw: String,
    pub engine: Option<String>,
    pub version: Option<String>,
}

/// (识别标记, 引擎名称, 版本号所在的标记)，按顺序匹配
const BROWSER_MARKERS: [(&str, &str, &str); 7] = [
    ("Edg/", "edge", "Edg/"),
    ("OPR/", "opera", "OPR/"),
    ("Opera", "opera", "Version/"),
    ("Firefox/", "firefox", "Firefox/"),
    ("Chrome/", "chrome", "Chrome/"),
    ("Safari/", "safari", "Version/"),
    ("MSIE ", "msie", "MSIE "),
];

impl UserAgent {
    pub fn parse(raw: &str) -> Self {
        let raw: String = raw.trim().chars().take(MAX_USER_AGENT_CHARS).collect();

        for (marker, engine, version_marker) in BROWSER_MARKERS {
            if raw.contains(marker) {
                return Self {
                    engine: Some(engine.to_string()),
                    version: version_after(&raw, version_marker),
                    raw,
                };
            }
        }

        // IE11 不再带 MSIE 标记
        if raw.contains("Trident/") {
            return Self {
                engine: Some("msie".to_string()),
                version: version_after(&raw, "rv:"),
                raw,
            };
        }

        Self {
            raw,
            engine: None,
            version: None,
        }
    }

    /// 用于尚未轮询过的Worker
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.raw.is_empty()
    }
}

fn version_after(raw: &str, marker: &str) -> Option<String> {
    let start = raw.find(marker)? + marker.len();
    let version: String = raw[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let version = version.trim_end_matches('.');
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// 解析客户端传来的ID：只接受正整数，其余一律视为未知
pub fn parse_positive_id(raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        _ => None,
    }
}

/// 每种命令的参数，在进入队列前转换为线上的参数列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum CommandArgs {
    RunTest {
        test_run_id: i64,
        url: String,
        name: String,
    },
    Reload,
    ChangeRate {
        rate: u64,
    },
    Restart,
}

impl CommandArgs {
    pub fn command(&self) -> Command {
        match self {
            CommandArgs::RunTest { .. } => Command::RunTest,
            CommandArgs::Reload => Command::Reload,
            CommandArgs::ChangeRate { .. } => Command::ChangeRate,
            CommandArgs::Restart => Command::Restart,
        }
    }

    pub fn default_description(&self) -> &'static str {
        match self {
            CommandArgs::RunTest { .. } => "Running test suite.",
            CommandArgs::Reload => "Server said reload.",
            CommandArgs::ChangeRate { .. } => "Changing poll rate.",
            CommandArgs::Restart => "Server said restart. Goodbye!",
        }
    }

    /// Worker端期望的参数列表格式
    pub fn to_wire(&self) -> Vec<Value> {
        match self {
            CommandArgs::RunTest {
                test_run_id,
                url,
                name,
            } => vec![json!({
                "test_run_id": test_run_id,
                "url": url,
                "name": name,
            })],
            CommandArgs::ChangeRate { rate } => vec![json!({ "rate": rate })],
            CommandArgs::Reload | CommandArgs::Restart => Vec::new(),
        }
    }
}
