//! 浏览器Worker使用的轮询协议
//!
//! 请求体为表单编码，响应直接返回协议JSON，不使用 `ApiResponse` 包装。

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{rejection::FormRejection, ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    Form, Json,
};
use coordinator_domain::{PollResponse, Registration, SubmitAck};
use serde::Deserialize;
use tracing::debug;

use crate::{error::ApiResult, routes::AppState};

/// 对端地址；未通过 `into_make_service_with_connect_info` 启动时为空
pub struct ClientAddress(pub Option<String>);

impl<S> FromRequestParts<S> for ClientAddress
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddress(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string()),
        ))
    }
}

fn header_user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
}

/// 注册新Worker
pub async fn register(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    headers: HeaderMap,
) -> ApiResult<Json<Registration>> {
    let worker = state
        .coordinator
        .register(header_user_agent(&headers), address.as_deref())
        .await?;

    Ok(Json(Registration {
        worker_id: worker.id,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PollForm {
    pub worker_id: Option<String>,
    pub user_agent: Option<String>,
}

/// Worker轮询
///
/// 表单缺失或无法解析时按未知Worker处理，返回重启指令而不是HTTP错误。
pub async fn poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<PollForm>, FormRejection>,
) -> ApiResult<Json<PollResponse>> {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            debug!("轮询表单无效: {}", rejection);
            PollForm::default()
        }
    };
    let worker_id = form.worker_id.unwrap_or_default();
    let user_agent = form
        .user_agent
        .as_deref()
        .or_else(|| header_user_agent(&headers))
        .unwrap_or_default();

    let response = state.coordinator.poll(&worker_id, user_agent).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SubmitResultsForm {
    pub work_queue_id: Option<String>,
    pub results: Option<String>,
}

/// 提交测试结果
pub async fn submit_results(
    State(state): State<AppState>,
    Form(form): Form<SubmitResultsForm>,
) -> ApiResult<Json<SubmitAck>> {
    let work_queue_id = form.work_queue_id.unwrap_or_default();
    // 缺少results时按无效JSON处理，条目不存在的判断优先
    let results = form.results.unwrap_or_default();

    let ack = state
        .coordinator
        .submit_results(&work_queue_id, &results)
        .await?;
    Ok(Json(ack))
}
