//! HTTP API for a storage node: client, management, and peer surfaces.

use crate::common::types::{
    ActionRequest, GetResponse, HeartbeatRequest, HeartbeatResponse, NodeStatus,
    PrepareMoveRequest, PrepareRearrangeRequest, SetKeyRequest, SetResponse, ShardPayload,
    StatusResponse,
};
use crate::common::util::timestamp_now_millis;
use crate::node::management::NodeManager;
use crate::node::peer_client::HttpPeerTransport;
use crate::Result;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeHttpState {
    pub manager: Arc<NodeManager<HttpPeerTransport>>,
}

pub fn create_router(state: NodeHttpState) -> Router {
    Router::new()
        // client surface
        .route("/kv/:key", axum::routing::put(set_key))
        .route("/kv/:key", axum::routing::get(get_key))
        .route("/status", axum::routing::get(status))
        .route("/heartbeat", axum::routing::post(heartbeat))
        // master management surface
        .route("/manage/prepare-move", axum::routing::post(prepare_move))
        .route(
            "/manage/prepare-rearrange",
            axum::routing::post(prepare_rearrange),
        )
        .route("/manage/process", axum::routing::post(process))
        .route("/manage/apply", axum::routing::post(apply))
        .route("/manage/rollback", axum::routing::post(rollback))
        // peer surface
        .route("/peer/shard", axum::routing::post(receive_shard))
        .route("/peer/fragment", axum::routing::post(receive_fragment))
        .with_state(state)
}

fn respond(result: Result<()>) -> impl IntoResponse {
    match result {
        Ok(()) => (axum::http::StatusCode::OK, Json(StatusResponse::ok("OK"))),
        Err(e) => (e.to_http_status(), Json(StatusResponse::fail(e.to_string()))),
    }
}

async fn set_key(
    State(state): State<NodeHttpState>,
    Path(key): Path<String>,
    Json(req): Json<SetKeyRequest>,
) -> Json<SetResponse> {
    Json(state.manager.store().set(&key, &req.value, req.timestamp))
}

async fn get_key(State(state): State<NodeHttpState>, Path(key): Path<String>) -> Json<GetResponse> {
    Json(state.manager.store().get(&key))
}

async fn status(State(state): State<NodeHttpState>) -> Json<NodeStatus> {
    Json(state.manager.store().status())
}

async fn heartbeat(
    State(state): State<NodeHttpState>,
    Json(_req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    Json(HeartbeatResponse {
        healthy: true,
        server_timestamp: timestamp_now_millis(),
        message: format!("node state {}", state.manager.store().state()),
    })
}

async fn prepare_move(
    State(state): State<NodeHttpState>,
    Json(req): Json<PrepareMoveRequest>,
) -> impl IntoResponse {
    respond(state.manager.prepare_move(req))
}

async fn prepare_rearrange(
    State(state): State<NodeHttpState>,
    Json(req): Json<PrepareRearrangeRequest>,
) -> impl IntoResponse {
    respond(state.manager.prepare_rearrange(req))
}

async fn process(
    State(state): State<NodeHttpState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    respond(state.manager.process(req.action).await)
}

async fn apply(
    State(state): State<NodeHttpState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    respond(state.manager.apply(req.action))
}

async fn rollback(
    State(state): State<NodeHttpState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    respond(state.manager.rollback(req.action))
}

async fn receive_shard(
    State(state): State<NodeHttpState>,
    Json(payload): Json<ShardPayload>,
) -> impl IntoResponse {
    state.manager.store().receive_into_staged(payload);
    Json(StatusResponse::ok("received"))
}

async fn receive_fragment(
    State(state): State<NodeHttpState>,
    Json(payload): Json<ShardPayload>,
) -> impl IntoResponse {
    state.manager.store().receive_into_staged(payload);
    Json(StatusResponse::ok("received"))
}
