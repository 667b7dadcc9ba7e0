//! 协调器指标
//!
//! 业务代码通过 `metrics` 宏记录；导出器由二进制在启动时安装。

use coordinator_core::{CoordinatorError, CoordinatorResult};
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub const POLLS_TOTAL: &str = "coordinator_polls_total";
pub const DISPATCHED_TOTAL: &str = "coordinator_dispatched_total";
pub const RESULTS_TOTAL: &str = "coordinator_results_total";
pub const WORKERS_COLLECTED_TOTAL: &str = "coordinator_workers_collected_total";
pub const UNKNOWN_WORKER_TOTAL: &str = "coordinator_unknown_worker_total";

pub fn describe_metrics() {
    describe_counter!(POLLS_TOTAL, Unit::Count, "Worker轮询次数");
    describe_counter!(DISPATCHED_TOTAL, Unit::Count, "分发给Worker的命令数");
    describe_counter!(RESULTS_TOTAL, Unit::Count, "接收的测试结果数");
    describe_counter!(WORKERS_COLLECTED_TOTAL, Unit::Count, "因心跳超时被回收的Worker数");
    describe_counter!(UNKNOWN_WORKER_TOTAL, Unit::Count, "来自未知Worker的轮询次数");
}

/// 安装全局Prometheus记录器，返回用于渲染 `/metrics` 的句柄
pub fn install_prometheus_recorder() -> CoordinatorResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CoordinatorError::Internal(format!("安装Prometheus记录器失败: {e}")))?;

    describe_metrics();
    info!("Prometheus指标记录器已安装");
    Ok(handle)
}
