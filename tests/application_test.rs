use std::time::Duration;

use coordinator::app::Application;
use coordinator_core::AppConfig;
use serde_json::Value;
use tokio::{net::TcpListener, sync::broadcast};

fn test_config(database_url: &str, metrics_enabled: bool) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = database_url.to_string();
    config.api.bind_address = "127.0.0.1:0".to_string();
    config.observability.metrics_enabled = metrics_enabled;
    config
}

async fn spawn(app: Application) -> (String, broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move {
        app.serve(listener, shutdown_rx).await.unwrap();
    });
    (base, shutdown_tx, handle)
}

#[tokio::test]
async fn test_sqlite_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("coordinator.db").display());

    let app = Application::new(test_config(&url, false)).await.unwrap();
    let (base, shutdown_tx, handle) = spawn(app).await;

    let client = reqwest::Client::new();
    let registration: Value = client
        .get(format!("{base}/register"))
        .header("User-Agent", "Mozilla/5.0 Firefox/3.6.8")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let worker_id = registration["worker_id"].as_i64().unwrap();

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let reopened = Application::new(test_config(&url, false)).await.unwrap();
    let workers = reopened.coordinator().list_workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].worker.id, worker_id);
}

#[tokio::test]
async fn test_memory_store_serves_worker_protocol() {
    let app = Application::new(test_config("memory://", false)).await.unwrap();
    let (base, shutdown_tx, handle) = spawn(app).await;

    let client = reqwest::Client::new();
    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let poll: Value = client
        .post(format!("{base}/work/query"))
        .form(&[("worker_id", "12345"), ("user_agent", "Chrome/120.0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(poll["cmd"], "restart");
    assert_eq!(poll["work_queue_id"], -1);

    let metrics = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), reqwest::StatusCode::NOT_FOUND);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_metrics_endpoint_when_enabled() {
    let app = Application::new(test_config("memory://", true)).await.unwrap();
    let (base, shutdown_tx, handle) = spawn(app).await;

    let client = reqwest::Client::new();
    client
        .post(format!("{base}/poll"))
        .form(&[("worker_id", "7"), ("user_agent", "ua")])
        .send()
        .await
        .unwrap();

    let body = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("coordinator_unknown_worker_total"));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_invalid_database_url_fails_fast() {
    let mut config = test_config("memory://", false);
    config.database.url = "sqlite:///nonexistent-dir/sub/coordinator.db".to_string();
    assert!(Application::new(config).await.is_err());
}
