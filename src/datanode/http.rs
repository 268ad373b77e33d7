//! Status HTTP API for a data node

use crate::common::timestamp_now;
use crate::datanode::engine::DataNodeEngine;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Router;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct DataNodeState {
    pub engine: Arc<DataNodeEngine>,
}

pub fn create_router(state: DataNodeState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/admin/status", axum::routing::get(admin_status))
        .with_state(state)
}

async fn health(State(state): State<DataNodeState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "role": "datanode",
        "shard": state.engine.shard(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp_now(),
    }))
}

/// Log position, key count, backups and replication policy
async fn admin_status(State(state): State<DataNodeState>) -> impl IntoResponse {
    axum::Json(state.engine.status())
}
