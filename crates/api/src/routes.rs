use axum::{
    routing::{get, post},
    Router,
};
use coordinator_dispatcher::Coordinator;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::handlers::{
    health::health_check,
    metrics::render_metrics,
    not_found,
    test_runs::{create_test_suite, get_test_run_status, start_test_run},
    work::{poll, register, submit_results},
    workers::{change_rate, enqueue_job, list_workers, reload_worker, restart_worker},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    let mut router = Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // Worker端协议，两套路径等价
        .route("/work", get(register))
        .route("/register", get(register))
        .route("/work/query", post(poll))
        .route("/poll", post(poll))
        .route("/work/submit_results", post(submit_results))
        .route("/submit_results", post(submit_results))
        // Worker管理API
        .route("/api/workers", get(list_workers))
        .route("/api/workers/{id}/jobs", post(enqueue_job))
        .route("/api/workers/{id}/restart", post(restart_worker))
        .route("/api/workers/{id}/reload", post(reload_worker))
        .route("/api/workers/{id}/rate", post(change_rate))
        // 测试套件与测试运行
        .route("/api/test-suites", post(create_test_suite))
        .route("/api/test-runs", post(start_test_run))
        .route("/api/test-runs/{id}", get(get_test_run_status));

    if state.metrics.is_some() {
        router = router.route(metrics_endpoint, get(render_metrics));
    }

    router.fallback(not_found).with_state(state)
}
