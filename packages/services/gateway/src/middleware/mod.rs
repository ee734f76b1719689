//! Gateway 미들웨어
//!
//! 요청 ID, 출처 분류, 내부 전용 라우트 보호를 정의합니다.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use kg_core::origin::{ClientOrigin, Origin};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Clone, Debug)]
pub struct RequestId(#[allow(dead_code)] pub String);

tokio::task_local! {
    static REQUEST_ID: String;
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(id.clone()));
    let mut resp = REQUEST_ID.scope(id.clone(), async move { next.run(req).await }).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

/// 요청 출처를 한 번 분류해 extension으로 넣습니다.
pub async fn classify_origin(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let headers = req.headers();
    let forwarded_for = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    let client = state.guard.classify(peer, forwarded_for, real_ip);
    req.extensions_mut().insert(client);
    next.run(req).await
}

/// 내부 전용 라우트 보호
///
/// 외부 출처는 핸들러나 저장소에 닿기 전에 `OriginForbidden`으로 종료됩니다.
pub async fn internal_only(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let client = req
        .extensions()
        .get::<ClientOrigin>()
        .copied()
        .unwrap_or(ClientOrigin {
            origin: Origin::External,
            client_ip: None,
        });

    if let Err(e) = state.guard.require_internal(client.origin) {
        tracing::warn!(
            client_ip = ?client.client_ip,
            path = %req.uri().path(),
            "Rejected external request to internal route"
        );
        return GatewayError::from(e).into_response();
    }

    next.run(req).await
}
