//! HTTP API for the discovery registry

use crate::common::types::{ServiceDescriptor, StatusResponse};
use crate::discovery::registry::Registry;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct DiscoveryState {
    pub registry: Arc<Registry>,
}

pub fn create_router(state: DiscoveryState) -> Router {
    Router::new()
        .route("/register", axum::routing::post(register))
        .route("/nodes", axum::routing::get(get_nodes))
        .route("/nodes/:id", axum::routing::get(get_node))
        .route("/master", axum::routing::get(get_master))
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

async fn register(
    State(state): State<DiscoveryState>,
    Json(descriptor): Json<ServiceDescriptor>,
) -> impl IntoResponse {
    state.registry.register(descriptor);
    Json(StatusResponse::ok("registered"))
}

async fn get_node(
    State(state): State<DiscoveryState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    match state.registry.node(id) {
        Some(descriptor) => (StatusCode::OK, Json(Some(descriptor))),
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}

async fn get_nodes(State(state): State<DiscoveryState>) -> Json<HashMap<u32, ServiceDescriptor>> {
    Json(state.registry.nodes())
}

async fn get_master(State(state): State<DiscoveryState>) -> impl IntoResponse {
    match state.registry.master() {
        Some(descriptor) => (StatusCode::OK, Json(Some(descriptor))),
        None => (StatusCode::NOT_FOUND, Json(None)),
    }
}

async fn health() -> impl IntoResponse {
    Json(StatusResponse::ok("ok"))
}
