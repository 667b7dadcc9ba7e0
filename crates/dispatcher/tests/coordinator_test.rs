use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use coordinator_core::{CoordinatorConfig, CoordinatorError, DatabaseConfig};
use coordinator_dispatcher::Coordinator;
use coordinator_domain::{NewTestSuite, PollResponse, WorkState};
use coordinator_infrastructure::{DatabaseManager, InMemoryStore};
use futures::future::join_all;

async fn sqlite_coordinator() -> Coordinator {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    Coordinator::new(manager.store(), &CoordinatorConfig::default())
}

fn memory_coordinator() -> Coordinator {
    Coordinator::new(Arc::new(InMemoryStore::new()), &CoordinatorConfig::default())
}

async fn assert_at_most_once_dispatch(coordinator: Arc<Coordinator>) {
    let worker = coordinator.register(None, None).await.unwrap();
    let mut enqueued = HashSet::new();
    for _ in 0..5 {
        enqueued.insert(coordinator.reload_worker(worker.id).await.unwrap().id);
    }

    let worker_id = worker.id.to_string();
    let polls = (0..20).map(|_| {
        let coordinator = Arc::clone(&coordinator);
        let worker_id = worker_id.clone();
        tokio::spawn(async move { coordinator.poll(&worker_id, "ua").await.unwrap() })
    });

    let dispatched: Vec<i64> = join_all(polls)
        .await
        .into_iter()
        .filter_map(|response| response.unwrap().dispatched().map(|d| d.work_queue_id))
        .collect();

    let unique: HashSet<i64> = dispatched.iter().copied().collect();
    assert_eq!(dispatched.len(), 5);
    assert_eq!(unique, enqueued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_polls_dispatch_each_entry_once_in_memory() {
    assert_at_most_once_dispatch(Arc::new(memory_coordinator())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_polls_dispatch_each_entry_once_sqlite() {
    assert_at_most_once_dispatch(Arc::new(sqlite_coordinator().await)).await;
}

#[tokio::test]
async fn test_fifo_order_sqlite() {
    let coordinator = sqlite_coordinator().await;
    let worker = coordinator.register(None, None).await.unwrap();
    let first = coordinator.reload_worker(worker.id).await.unwrap();
    let second = coordinator.change_rate(worker.id, 1500).await.unwrap();
    let third = coordinator.restart_worker(worker.id).await.unwrap();

    let id = worker.id.to_string();
    let mut order = Vec::new();
    while let PollResponse::Dispatch(dispatch) = coordinator.poll(&id, "ua").await.unwrap() {
        order.push(dispatch.work_queue_id);
    }
    assert_eq!(order, vec![first.id, second.id, third.id]);
}

#[tokio::test]
async fn test_expired_worker_loses_in_flight_work_sqlite() {
    let coordinator = sqlite_coordinator().await;
    let suite = coordinator
        .create_test_suite(NewTestSuite {
            name: "qunit".to_string(),
            url: "http://localhost/qunit/".to_string(),
        })
        .await
        .unwrap();

    let t0 = Utc::now();
    let doomed = coordinator.register_at(None, None, t0).await.unwrap();
    let survivor = coordinator.register_at(None, None, t0).await.unwrap();
    let started = coordinator.start_test_run_at(suite.id, t0).await.unwrap();
    assert_eq!(started.work_queue_ids.len(), 2);

    // 两个Worker都领取任务，只有一个之后继续心跳
    coordinator
        .poll_at(&doomed.id.to_string(), "ua", t0)
        .await
        .unwrap();
    let dispatch = coordinator
        .poll_at(&survivor.id.to_string(), "ua", t0)
        .await
        .unwrap();
    let survivor_entry = dispatch.dispatched().unwrap().work_queue_id;

    coordinator
        .poll_at(&survivor.id.to_string(), "ua", t0 + Duration::seconds(31))
        .await
        .unwrap();

    let status = coordinator.test_run_status(started.test_run.id).await.unwrap();
    assert_eq!(status.entries.len(), 1);
    assert_eq!(status.dangling_links, 1);
    assert_eq!(status.entries[0].state, WorkState::Dispatched);
    assert!(!status.finished);

    coordinator
        .submit_results(&survivor_entry.to_string(), r#"{"tests": []}"#)
        .await
        .unwrap();
    let status = coordinator.test_run_status(started.test_run.id).await.unwrap();
    assert!(status.finished);

    let response = coordinator
        .poll_at(&doomed.id.to_string(), "ua", t0 + Duration::seconds(32))
        .await
        .unwrap();
    assert_eq!(response, PollResponse::restart());
}

#[tokio::test]
async fn test_submit_before_dispatch_is_rejected_sqlite() {
    let coordinator = sqlite_coordinator().await;
    let worker = coordinator.register(None, None).await.unwrap();
    let entry = coordinator.reload_worker(worker.id).await.unwrap();

    let err = coordinator
        .submit_results(&entry.id.to_string(), r#"{"tests": []}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidStateTransition { .. }));

    // 拒绝后条目仍可正常分发
    let response = coordinator.poll(&worker.id.to_string(), "ua").await.unwrap();
    assert_eq!(response.dispatched().unwrap().work_queue_id, entry.id);
}
