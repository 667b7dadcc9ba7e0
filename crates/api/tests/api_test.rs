use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use coordinator_api::create_app;
use coordinator_core::{AppConfig, CoordinatorConfig};
use coordinator_dispatcher::Coordinator;
use coordinator_infrastructure::InMemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn create_test_app() -> Router {
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(InMemoryStore::new()),
        &CoordinatorConfig::default(),
    ));
    create_app(coordinator, &AppConfig::default(), None)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn form(uri: &str, body: String) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn register(app: &Router) -> i64 {
    let (status, body) = send(app, get("/work")).await;
    assert_eq!(status, StatusCode::OK);
    body["worker_id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_register_on_both_paths() {
    let app = create_test_app();
    let (_, first) = send(&app, get("/work")).await;
    let (_, second) = send(&app, get("/register")).await;

    let first = first["worker_id"].as_i64().unwrap();
    let second = second["worker_id"].as_i64().unwrap();
    assert!(first > 0);
    assert!(second > first);
}

#[tokio::test]
async fn test_unknown_worker_poll_gets_restart() {
    let app = create_test_app();
    let (status, body) = send(&app, form("/work/query", "worker_id=999&user_agent=x".into())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"work_queue_id": -1, "cmd": "restart", "description": "Unknown worker ID", "args": []})
    );

    let (status, body) = send(&app, form("/poll", "user_agent=x".into())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cmd"], "restart");
}

#[tokio::test]
async fn test_poll_without_form_body_gets_restart() {
    let app = create_test_app();
    let (status, body) = send(&app, Request::post("/poll").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cmd"], "restart");
    assert_eq!(body["work_queue_id"], -1);

    let request = Request::post("/work/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"worker_id": 1}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cmd"], "restart");
}

#[tokio::test]
async fn test_idle_poll() {
    let app = create_test_app();
    let worker_id = register(&app).await;

    let (status, body) = send(
        &app,
        form("/poll", format!("worker_id={worker_id}&user_agent=Firefox%2F3.6")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"desc": "No commands from server."}));
}

#[tokio::test]
async fn test_full_test_run_over_http() {
    let app = create_test_app();
    let worker_id = register(&app).await;

    let (status, body) = send(
        &app,
        json_post(
            "/api/test-suites",
            json!({"name": "qunit", "url": "http://localhost/qunit/"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let suite_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        json_post("/api/test-runs", json!({"test_suite_id": suite_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let test_run_id = body["data"]["test_run"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["work_queue_ids"].as_array().unwrap().len(), 1);

    let (_, dispatch) = send(
        &app,
        form("/work/query", format!("worker_id={worker_id}&user_agent=ua")),
    )
    .await;
    assert_eq!(dispatch["cmd"], "run_test");
    assert_eq!(dispatch["desc"], "Running test suite.");
    let work_queue_id = dispatch["work_queue_id"].as_i64().unwrap();
    assert_eq!(dispatch["args"][0]["work_queue_id"], work_queue_id);
    assert_eq!(dispatch["args"][0]["test_run_id"], test_run_id);
    assert_eq!(dispatch["args"][0]["name"], "qunit");

    let results = json!({"tests": [{"result": true, "module": "core", "test": "adds"}]});
    let encoded = urlencoding::encode(&results.to_string()).into_owned();
    let (status, body) = send(
        &app,
        form(
            "/work/submit_results",
            format!("work_queue_id={work_queue_id}&results={encoded}"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"desc": "Test result received"}));

    let (status, body) = send(&app, get(&format!("/api/test-runs/{test_run_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["finished"], true);
    let stored = &body["data"]["entries"][0]["results"]["tests"][0];
    assert_eq!(stored["message"], "<'message' was empty>");
}

#[tokio::test]
async fn test_submit_errors() {
    let app = create_test_app();
    let worker_id = register(&app).await;

    let (status, _) = send(&app, form("/submit_results", "work_queue_id=4242&results=%7B%7D".into())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_post(&format!("/api/workers/{worker_id}/reload"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let entry_id = body["data"]["id"].as_i64().unwrap();

    // 尚未分发
    let (status, body) = send(
        &app,
        form("/submit_results", format!("work_queue_id={entry_id}&results=%7B%22tests%22%3A%5B%5D%7D")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "INVALID_STATE_TRANSITION");

    send(&app, form("/poll", format!("worker_id={worker_id}&user_agent=ua"))).await;

    let (status, body) = send(
        &app,
        form("/submit_results", format!("work_queue_id={entry_id}&results=%7B%7D")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Results JSON is missing key tests");

    let (status, body) = send(
        &app,
        form("/submit_results", format!("work_queue_id={entry_id}&results=not-json")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "MALFORMED_RESULTS");
}

#[tokio::test]
async fn test_admin_commands() {
    let app = create_test_app();
    let worker_id = register(&app).await;

    let (status, body) = send(
        &app,
        json_post(&format!("/api/workers/{worker_id}/rate"), json!({"rate_ms": 3000})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["command"], "change_rate");

    let (status, body) = send(
        &app,
        json_post(&format!("/api/workers/{worker_id}/restart"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["description"], "Server said restart. Goodbye!");

    let (status, body) = send(&app, get("/api/workers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], worker_id);
    assert_eq!(body["data"][0]["pending_entries"], 2);
    assert_eq!(body["data"][0]["alive"], true);

    let (_, dispatch) = send(&app, form("/poll", format!("worker_id={worker_id}&user_agent=ua"))).await;
    assert_eq!(dispatch["cmd"], "change_rate");
    assert_eq!(dispatch["args"][0]["rate"], 3000);

    let (status, _) = send(&app, json_post("/api/workers/777/reload", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_post("/api/workers/1/jobs", json!({"test_run_id": 55})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/test-runs/55")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_end_to_end_over_tcp() {
    let app = create_test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let registration: Value = client
        .get(format!("{base}/register"))
        .header(header::USER_AGENT, "Mozilla/5.0 Firefox/3.6.8")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let worker_id = registration["worker_id"].as_i64().unwrap().to_string();

    let workers: Value = client
        .get(format!("{base}/api/workers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(workers["data"][0]["ip_address"], "127.0.0.1");
    assert_eq!(workers["data"][0]["user_agent"]["engine"], "firefox");

    let poll: Value = client
        .post(format!("{base}/poll"))
        .form(&[("worker_id", worker_id.as_str()), ("user_agent", "Mozilla/5.0 Chrome/120.0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(poll, json!({"desc": "No commands from server."}));
}
