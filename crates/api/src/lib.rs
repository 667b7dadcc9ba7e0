//! # Coordinator API
//!
//! 浏览器测试Worker协调器的HTTP接口，基于Axum构建。
//!
//! ## 概述
//!
//! - Worker端协议：注册、轮询、提交结果，表单请求体，直接返回协议JSON
//! - 管理端API：Worker列表与命令、测试套件、测试运行，JSON请求体，`ApiResponse` 包装
//! - 健康检查与Prometheus指标
//!
//! 所有业务操作都委托给 [`coordinator_dispatcher::Coordinator`]。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use coordinator_core::AppConfig;
use coordinator_dispatcher::Coordinator;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;

use crate::middleware::{cors_layer, request_logging, request_timeout, trace_layer};
use crate::routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(
    coordinator: Arc<Coordinator>,
    config: &AppConfig,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = AppState {
        coordinator,
        metrics,
    };
    let timeout = Duration::from_secs(config.api.request_timeout_seconds);

    let mut app = create_routes(state, &config.observability.metrics_endpoint).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging))
            .layer(axum::middleware::from_fn_with_state(timeout, request_timeout)),
    );

    if config.api.cors_enabled {
        app = app.layer(cors_layer());
    }

    app
}
