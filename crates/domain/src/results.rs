//! 已校验的测试结果结构

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 单个测试用例的结果；`module`/`test`/`message` 缺失时由校验器填入占位文本
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseResult {
    pub result: bool,
    pub module: String,
    pub test: String,
    pub message: String,
    /// Worker附带的其他字段原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResults {
    pub tests: Vec<TestCaseResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NormalizedResults {
    pub fn passed(&self) -> usize {
        self.tests.iter().filter(|t| t.result).count()
    }

    pub fn failed(&self) -> usize {
        self.tests.len() - self.passed()
    }

    pub fn to_value(&self) -> Value {
        // 结构体只包含字符串键和JSON值，序列化不会失败
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
