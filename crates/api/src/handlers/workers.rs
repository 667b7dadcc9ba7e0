use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

/// 获取Worker列表（含派生的存活状态）
pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let workers = state.coordinator.list_workers().await?;
    Ok(success(workers))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub test_run_id: i64,
}

/// 把已有的TestRun推给指定Worker
pub async fn enqueue_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<EnqueueJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let entry = state
        .coordinator
        .enqueue_job(id, request.test_run_id)
        .await?;
    Ok(created(entry))
}

pub async fn restart_worker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let entry = state.coordinator.restart_worker(id).await?;
    Ok(created(entry))
}

pub async fn reload_worker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let entry = state.coordinator.reload_worker(id).await?;
    Ok(created(entry))
}

#[derive(Debug, Deserialize)]
pub struct ChangeRateRequest {
    pub rate_ms: u64,
}

/// 调整Worker的轮询间隔
pub async fn change_rate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ChangeRateRequest>,
) -> ApiResult<impl IntoResponse> {
    let entry = state.coordinator.change_rate(id, request.rate_ms).await?;
    Ok(created(entry))
}
