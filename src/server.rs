// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/server.rs - HTTP 入口
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, State},
  http::{HeaderMap, StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde_json::json;
use tracing::{error, warn};

use crate::task::{Dispatcher, ImageRequest, RequestOutcome, ServiceError};

pub struct AppState {
  pub dispatcher: Arc<Dispatcher>,
}

/// 组装路由。
///
/// 传输层以 2 倍载荷上限作缓冲兜底；契约内的 `TooLarge → 400`
/// 由解码器裁决。
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
  let body_cap = dispatcher.config().limits.max_bytes.saturating_mul(2);
  Router::new()
    .route("/process", post(process))
    .route("/healthz", get(healthz))
    .layer(DefaultBodyLimit::max(body_cap))
    .with_state(Arc::new(AppState { dispatcher }))
}

fn status_for(err: &ServiceError) -> StatusCode {
  match err {
    ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
    ServiceError::Overloaded { .. } | ServiceError::ResourceExhausted { .. } => {
      StatusCode::SERVICE_UNAVAILABLE
    }
    ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    ServiceError::Processing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

fn declared_type(headers: &HeaderMap) -> String {
  headers
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.split(';').next())
    .map(|v| v.trim().to_string())
    .unwrap_or_default()
}

async fn process(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
  let request = ImageRequest::new(declared_type(&headers), body.to_vec());
  let id = request.id;

  // 同步的核心在阻塞线程上执行, 不占用 HTTP 运行时
  let dispatcher = state.dispatcher.clone();
  let outcome = tokio::task::spawn_blocking(move || dispatcher.handle(request)).await;

  match outcome {
    Ok(RequestOutcome::Success(result)) => (StatusCode::OK, Json(result)).into_response(),
    Ok(RequestOutcome::Failure(e)) => {
      warn!("请求 {} 失败: {}", id, e);
      (
        status_for(&e),
        Json(json!({ "kind": e.kind(), "message": e.to_string() })),
      )
        .into_response()
    }
    Err(e) => {
      error!("请求 {} 的执行任务异常: {}", id, e);
      (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "kind": "processing", "message": "内部错误" })),
      )
        .into_response()
    }
  }
}

async fn healthz() -> &'static str {
  "ok"
}
