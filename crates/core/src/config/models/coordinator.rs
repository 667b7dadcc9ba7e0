use serde::{Deserialize, Serialize};

/// 默认Worker存活窗口（秒）
pub const DEFAULT_LIVENESS_TIMEOUT_SECONDS: i64 = 30;
/// 客户端地址最多保留的字符数
pub const MAX_CLIENT_ADDRESS_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// 超过该秒数没有心跳的Worker会在下次清扫时被删除
    pub liveness_timeout_seconds: i64,
    /// 客户端地址截断长度
    pub max_client_address_chars: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_seconds: DEFAULT_LIVENESS_TIMEOUT_SECONDS,
            max_client_address_chars: MAX_CLIENT_ADDRESS_CHARS,
        }
    }
}

impl CoordinatorConfig {
    pub fn liveness_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.liveness_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("Worker存活窗口必须大于0"));
        }

        if self.max_client_address_chars == 0 {
            return Err(anyhow::anyhow!("客户端地址截断长度必须大于0"));
        }

        Ok(())
    }
}
