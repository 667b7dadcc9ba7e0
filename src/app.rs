use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use coordinator_api::create_app;
use coordinator_core::AppConfig;
use coordinator_dispatcher::Coordinator;
use coordinator_infrastructure::{
    observability::install_prometheus_recorder,
    DatabaseManager,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::info;

/// 协调服务：存储、调度核心与HTTP接口
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    coordinator: Arc<Coordinator>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("初始化存储失败: {}", config.database.url))?;

        let coordinator = Arc::new(Coordinator::new(database.store(), &config.coordinator));

        let metrics = if config.observability.metrics_enabled {
            Some(install_prometheus_recorder().context("初始化指标导出失败")?)
        } else {
            None
        };

        info!(
            "协调服务初始化完成，Worker存活超时 {} 秒",
            config.coordinator.liveness_timeout_seconds
        );

        Ok(Self {
            config,
            database,
            coordinator,
            metrics,
        })
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn router(&self) -> Router {
        create_app(
            Arc::clone(&self.coordinator),
            &self.config,
            self.metrics.clone(),
        )
    }

    /// 绑定配置的地址并运行到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        self.serve(listener, shutdown_rx).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        self.database
            .health_check()
            .await
            .context("存储健康检查失败")?;

        info!("HTTP服务启动于 {}", listener.local_addr()?);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP服务收到关闭信号");
        })
        .await
        .context("HTTP服务运行失败")?;

        info!("HTTP服务已停止");
        Ok(())
    }
}
