//! 测试结果校验
//!
//! 浏览器端提交的结果只做最小约束：必须有 `tests` 列表，每个用例必须带布尔 `result`。
//! 其余缺失的描述字段用占位文本补齐，未知字段原样保留。

use coordinator_core::{CoordinatorResult, ValidationError};
use coordinator_domain::NormalizedResults;
use serde_json::{json, Map, Value};

/// 测试运行本身出错时合成的用例所属模块
pub const INTERNAL_MODULE: &str = "__jstestnet__";

const DESCRIPTIVE_KEYS: [&str; 3] = ["module", "test", "message"];

#[derive(Debug, Clone, Default)]
pub struct ResultValidator;

impl ResultValidator {
    pub fn new() -> Self {
        Self
    }

    /// 解析原始JSON文本后再校验
    pub fn parse_and_validate(&self, raw: &str) -> CoordinatorResult<NormalizedResults> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.validate_and_normalize(payload)
    }

    pub fn validate_and_normalize(&self, payload: Value) -> CoordinatorResult<NormalizedResults> {
        let mut payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::Malformed(format!(
                    "expected a JSON object, got {}",
                    type_name(&other)
                ))
                .into())
            }
        };

        if payload.get("test_run_error").is_some_and(is_truthy) {
            append_run_error(&mut payload)?;
        }

        let tests = match payload.remove("tests") {
            Some(Value::Array(tests)) => tests,
            // 不是列表与缺失同样处理
            _ => return Err(ValidationError::MissingField("tests".to_string()).into()),
        };

        let tests = tests
            .into_iter()
            .enumerate()
            .map(|(i, test)| normalize_test(i, test))
            .collect::<Result<Vec<_>, _>>()?;

        payload.insert("tests".to_string(), Value::Array(tests));
        let normalized = serde_json::from_value(Value::Object(payload))?;
        Ok(normalized)
    }
}

fn append_run_error(payload: &mut Map<String, Value>) -> Result<(), ValidationError> {
    let message = match payload.get("test_run_error_msg") {
        Some(Value::String(msg)) => msg.clone(),
        Some(Value::Null) | None => placeholder("test_run_error_msg"),
        Some(other) => other.to_string(),
    };

    let synthesized = json!({
        "result": false,
        "module": INTERNAL_MODULE,
        "test": "test_run_error",
        "message": message,
    });

    match payload
        .entry("tests")
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(tests) => {
            tests.push(synthesized);
            Ok(())
        }
        _ => Err(ValidationError::MissingField("tests".to_string())),
    }
}

fn normalize_test(index: usize, test: Value) -> Result<Value, ValidationError> {
    let mut test = match test {
        Value::Object(map) => map,
        _ => {
            return Err(ValidationError::InvalidType {
                field: format!("tests[{index}]"),
                expected: "an object".to_string(),
            })
        }
    };

    match test.get("result") {
        Some(Value::Bool(_)) => {}
        Some(_) => {
            return Err(ValidationError::InvalidType {
                field: format!("tests[{index}].result"),
                expected: "true or false".to_string(),
            })
        }
        None => return Err(ValidationError::MissingField(format!("tests[{index}].result"))),
    }

    for key in DESCRIPTIVE_KEYS {
        let text = match test.get(key) {
            None | Some(Value::Null) => placeholder(key),
            Some(Value::String(_)) => continue,
            Some(other) => other.to_string(),
        };
        test.insert(key.to_string(), Value::String(text));
    }

    Ok(Value::Object(test))
}

fn placeholder(key: &str) -> String {
    format!("<'{key}' was empty>")
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
