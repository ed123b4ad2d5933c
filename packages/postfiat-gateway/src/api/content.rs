//! Content-addressed blob handlers.
//!
//! Bytes travel as base64; descriptors travel as JSON exactly as the core
//! serializes them, so a descriptor returned by `POST /v1/content` can be
//! posted back unchanged to retrieve or delete.

use axum::extract::{Query, State};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use postfiat_core::storage::BackendKind;
use postfiat_core::ContentDescriptor;
use serde::{Deserialize, Serialize};

use super::{decode_base64, ApiResponse, ApiResult};
use crate::state::GatewayState;

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
pub struct StoreContentRequest {
    /// Raw bytes, base64
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub preferred_storage: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub uri: String,
    pub content_type: String,
    pub content_length: usize,
    /// Raw bytes, base64
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteContentResponse {
    pub uri: String,
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct CanHandleParams {
    pub uri: String,
}

#[derive(Debug, Serialize)]
pub struct CanHandleResponse {
    pub uri: String,
    pub can_handle: bool,
    pub storage_provider: Option<String>,
}

/// POST /v1/content
pub async fn store_content(
    State(state): State<GatewayState>,
    Json(req): Json<StoreContentRequest>,
) -> ApiResult<ContentDescriptor> {
    let preferred = req
        .preferred_storage
        .as_deref()
        .map(str::parse::<BackendKind>)
        .transpose()?;
    let content = decode_base64("content", &req.content)?;

    let descriptor = state.content.store(&content, &req.content_type, preferred).await?;
    Ok(ApiResponse::success(descriptor))
}

/// POST /v1/content/retrieve
pub async fn retrieve_content(
    State(state): State<GatewayState>,
    Json(descriptor): Json<ContentDescriptor>,
) -> ApiResult<ContentResponse> {
    let content = state.content.retrieve(&descriptor).await?;
    Ok(ApiResponse::success(ContentResponse {
        uri: descriptor.uri,
        content_type: descriptor.content_type,
        content_length: content.len(),
        content: BASE64.encode(&content),
    }))
}

/// POST /v1/content/delete
pub async fn delete_content(
    State(state): State<GatewayState>,
    Json(descriptor): Json<ContentDescriptor>,
) -> ApiResult<DeleteContentResponse> {
    state.content.delete(&descriptor).await?;
    Ok(ApiResponse::success(DeleteContentResponse {
        uri: descriptor.uri,
        deleted: true,
    }))
}

/// GET /v1/content/can-handle?uri=
pub async fn can_handle(
    State(state): State<GatewayState>,
    Query(params): Query<CanHandleParams>,
) -> ApiResult<CanHandleResponse> {
    let handler = state.content.handler_for(&params.uri);
    Ok(ApiResponse::success(CanHandleResponse {
        can_handle: handler.is_some(),
        storage_provider: handler.map(|kind| kind.name().to_string()),
        uri: params.uri,
    }))
}
