//! 상태 확인 핸들러

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "keygate",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let healthy = state.store.health_check().await;
    Json(json!({
        "ok": healthy,
        "storage": if healthy { "ok" } else { "unavailable" },
    }))
}
