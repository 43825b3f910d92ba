use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{event, instrument, Level};

use crate::error::Result;
use crate::node::{PeerNode, PeersResponse, ResourceResponse, StatusResponse};

#[instrument(skip(state), level = "debug")]
pub async fn peers(State(state): State<Arc<PeerNode>>) -> Result<Json<PeersResponse>> {
    state.peers().map(Json)
}

#[instrument(skip(state), level = "debug")]
pub async fn status(State(state): State<Arc<PeerNode>>) -> Result<Json<StatusResponse>> {
    state.status().map(Json)
}

#[instrument(skip(state), level = "debug")]
pub async fn acquire(
    State(state): State<Arc<PeerNode>>,
) -> Result<(StatusCode, Json<ResourceResponse>)> {
    let response = state.acquire().map_err(|err| {
        event!(
            Level::INFO,
            message = "Acquire refused",
            err = format!("{}", err)
        );
        err
    })?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[instrument(skip(state), level = "debug")]
pub async fn release(State(state): State<Arc<PeerNode>>) -> Result<Json<ResourceResponse>> {
    state.release().await.map(Json)
}

#[instrument(skip(state), level = "debug")]
pub async fn leave(State(state): State<Arc<PeerNode>>) -> Result<Json<ResourceResponse>> {
    state.leave().await.map(Json)
}
