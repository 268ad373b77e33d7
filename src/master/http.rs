//! Status HTTP API for the master

use crate::common::timestamp_now;
use crate::master::routing::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct MasterState {
    pub router: Arc<Router>,
}

pub fn create_router(state: MasterState) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(health))
        .route("/admin/status", axum::routing::get(admin_status))
        .with_state(state)
}

async fn health(State(state): State<MasterState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "role": "master",
        "shards": state.router.table().len(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp_now(),
    }))
}

/// Routing table, members and effective shard count
async fn admin_status(State(state): State<MasterState>) -> impl IntoResponse {
    let status = state.router.status();
    axum::Json(json!({
        "primaries": status.primaries,
        "nb_members": status.members.len(),
        "members": status.members,
        "shard_count": status.shard_count,
    }))
}
