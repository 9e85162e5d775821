//! HTTP API for the master

use crate::common::types::{HeartbeatRequest, HeartbeatResponse, NodeState, StatusResponse};
use crate::common::util::timestamp_now_millis;
use crate::master::node_client::HttpNodeControl;
use crate::master::topology::Topology;
use crate::Result;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Json, Router};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone)]
pub struct MasterState {
    pub topology: Arc<Topology<HttpNodeControl>>,
}

pub fn create_router(state: MasterState) -> Router {
    Router::new()
        .route("/servers/:id", axum::routing::post(add_server))
        .route("/servers/:id", axum::routing::delete(delete_server))
        .route("/shard-count/:n", axum::routing::post(change_shard_count))
        .route("/topology/servers", axum::routing::get(topology_servers))
        .route("/topology/shards", axum::routing::get(topology_shards))
        .route("/topology/states", axum::routing::get(topology_states))
        .route("/heartbeat", axum::routing::post(heartbeat))
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

fn respond(result: Result<()>) -> impl IntoResponse {
    match result {
        Ok(()) => (
            axum::http::StatusCode::OK,
            Json(StatusResponse::ok("OK")),
        ),
        Err(e) => (e.to_http_status(), Json(StatusResponse::fail(e.to_string()))),
    }
}

async fn add_server(
    State(state): State<MasterState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    respond(state.topology.add_server(id).await)
}

async fn delete_server(
    State(state): State<MasterState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    respond(state.topology.delete_server(id).await)
}

async fn change_shard_count(
    State(state): State<MasterState>,
    Path(n): Path<u32>,
) -> impl IntoResponse {
    respond(state.topology.change_shard_count(n).await)
}

async fn topology_servers(State(state): State<MasterState>) -> Json<HashMap<u32, Vec<u32>>> {
    Json(state.topology.server_to_shards().await)
}

async fn topology_shards(State(state): State<MasterState>) -> Json<BTreeMap<u32, i64>> {
    Json(state.topology.shard_to_hash().await)
}

async fn topology_states(State(state): State<MasterState>) -> Json<HashMap<u32, NodeState>> {
    Json(state.topology.node_states().await)
}

async fn heartbeat(Json(_req): Json<HeartbeatRequest>) -> Json<HeartbeatResponse> {
    Json(HeartbeatResponse {
        healthy: true,
        server_timestamp: timestamp_now_millis(),
        message: "master alive".to_string(),
    })
}

async fn health() -> impl IntoResponse {
    Json(StatusResponse::ok("ok"))
}
