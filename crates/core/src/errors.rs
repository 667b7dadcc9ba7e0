use thiserror::Error;

/// 协调器错误类型定义
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移错误: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("Worker未找到: {id}")]
    UnknownWorker { id: String },

    #[error("工作队列条目未找到: {id}")]
    UnknownEntry { id: String },

    #[error("测试运行未找到: {id}")]
    TestRunNotFound { id: i64 },

    #[error("测试套件未找到: {id}")]
    TestSuiteNotFound { id: i64 },

    #[error("测试结果验证失败: {0}")]
    Validation(#[from] ValidationError),

    #[error("无效的状态转换: 条目 {id} 不能从 {from} 转换为 {to}")]
    InvalidStateTransition {
        id: i64,
        from: String,
        to: String,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 测试结果负载的校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Results JSON is missing key {0}")]
    MissingField(String),

    #[error("Results JSON key {field} must be {expected}")]
    InvalidType { field: String, expected: String },

    #[error("Results payload is not valid JSON: {0}")]
    Malformed(String),
}

impl CoordinatorError {
    pub fn unknown_worker<S: Into<String>>(id: S) -> Self {
        Self::UnknownWorker { id: id.into() }
    }

    pub fn unknown_entry<S: Into<String>>(id: S) -> Self {
        Self::UnknownEntry { id: id.into() }
    }

    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        Self::Validation(ValidationError::MissingField(field.into()))
    }

    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    /// 是否属于调用方可以修正的请求错误
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoordinatorError::UnknownWorker { .. }
                | CoordinatorError::UnknownEntry { .. }
                | CoordinatorError::TestRunNotFound { .. }
                | CoordinatorError::TestSuiteNotFound { .. }
                | CoordinatorError::Validation(_)
                | CoordinatorError::InvalidStateTransition { .. }
        )
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(err: anyhow::Error) -> Self {
        CoordinatorError::Internal(err.to_string())
    }
}

/// 统一的Result类型
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
