use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coordinator_core::{CoordinatorError, ValidationError};
use serde_json::json;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("协调器错误: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            ApiError::Coordinator(err) => match err {
                CoordinatorError::UnknownEntry { id } => (
                    StatusCode::NOT_FOUND,
                    format!("Work queue entry {id} does not exist"),
                    "UNKNOWN_ENTRY",
                ),
                CoordinatorError::UnknownWorker { id } => (
                    StatusCode::NOT_FOUND,
                    format!("Worker {id} does not exist"),
                    "UNKNOWN_WORKER",
                ),
                CoordinatorError::TestRunNotFound { id } => (
                    StatusCode::NOT_FOUND,
                    format!("Test run {id} does not exist"),
                    "TEST_RUN_NOT_FOUND",
                ),
                CoordinatorError::TestSuiteNotFound { id } => (
                    StatusCode::NOT_FOUND,
                    format!("Test suite {id} does not exist"),
                    "TEST_SUITE_NOT_FOUND",
                ),
                CoordinatorError::Validation(validation) => {
                    let error_type = match validation {
                        ValidationError::MissingField(_) => "MISSING_FIELD",
                        ValidationError::InvalidType { .. } => "INVALID_TYPE",
                        ValidationError::Malformed(_) => "MALFORMED_RESULTS",
                    };
                    (StatusCode::BAD_REQUEST, validation.to_string(), error_type)
                }
                CoordinatorError::InvalidStateTransition { .. } => (
                    StatusCode::CONFLICT,
                    err.to_string(),
                    "INVALID_STATE_TRANSITION",
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "系统内部错误".to_string(),
                    "INTERNAL_ERROR",
                ),
            },
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "NOT_FOUND"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_type) = self.parts();

        match &self {
            ApiError::Coordinator(err) if err.is_client_error() => {
                debug!("请求被拒绝: {}", err);
            }
            _ if status.is_server_error() => error!("请求处理失败: {}", self),
            _ => {}
        }

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
