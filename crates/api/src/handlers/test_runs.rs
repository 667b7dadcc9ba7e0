use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use coordinator_domain::NewTestSuite;
use serde::Deserialize;

use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

pub async fn create_test_suite(
    State(state): State<AppState>,
    Json(request): Json<NewTestSuite>,
) -> ApiResult<impl IntoResponse> {
    let suite = state.coordinator.create_test_suite(request).await?;
    Ok(created(suite))
}

#[derive(Debug, Deserialize)]
pub struct StartTestRunRequest {
    pub test_suite_id: i64,
}

/// 创建TestRun并推送给所有存活的Worker
pub async fn start_test_run(
    State(state): State<AppState>,
    Json(request): Json<StartTestRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let started = state
        .coordinator
        .start_test_run(request.test_suite_id)
        .await?;
    Ok(created(started))
}

pub async fn get_test_run_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let status = state.coordinator.test_run_status(id).await?;
    Ok(success(status))
}
