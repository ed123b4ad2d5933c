//! Envelope storage and lookup handlers.
//!
//! - `POST   /v1/envelopes`                    store (base64 envelope bytes)
//! - `GET    /v1/envelopes/:id`                fetch
//! - `HEAD   /v1/envelopes/:id`                exists
//! - `DELETE /v1/envelopes/:id`                delete
//! - `POST   /v1/envelopes/search`             filter by sender/hash/context/metadata
//! - `GET    /v1/envelopes/by-content/:hash`
//! - `GET    /v1/envelopes/by-context/:hash`
//! - `GET    /v1/envelopes/by-sender/:sender`
//!
//! A part envelope is buffered until its siblings arrive; the reassembled
//! envelope is what gets stored.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use postfiat_core::chunking::Assembly;
use postfiat_core::envelope::{
    check_transport_limit, decode, decode_part, encode, envelope_id, verify_integrity,
};
use postfiat_core::storage::{BackendKind, ContentDescriptor, EnvelopeQuery, DEFAULT_QUERY_LIMIT};
use postfiat_core::{Envelope, Error};
use serde::{Deserialize, Serialize};

use super::{decode_base64, decode_hex, ApiError, ApiResponse, ApiResult};
use crate::state::GatewayState;

/// MIME type recorded for envelope bytes in content storage
pub const ENVELOPE_CONTENT_TYPE: &str = "application/x-postfiat-envelope";

// ── Request / Response Types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StoreEnvelopeRequest {
    /// Encoded envelope, base64
    pub envelope: String,
    #[serde(default)]
    pub preferred_storage: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StoreEnvelopeResponse {
    Stored {
        id: String,
        descriptor: ContentDescriptor,
    },
    Pending {
        message_id: String,
        received: u32,
        expected: u32,
    },
}

#[derive(Debug, Serialize)]
pub struct EnvelopeResponse {
    pub id: String,
    /// Encoded bytes, base64
    pub encoded: String,
    pub envelope: Envelope,
}

impl EnvelopeResponse {
    fn from_envelope(envelope: Envelope) -> Result<Self, ApiError> {
        let bytes = encode(&envelope)?;
        Ok(Self {
            id: envelope_id(&bytes),
            encoded: BASE64.encode(&bytes),
            envelope,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

fn describe_all(envelopes: Vec<Envelope>) -> Result<Vec<EnvelopeResponse>, ApiError> {
    envelopes.into_iter().map(EnvelopeResponse::from_envelope).collect()
}

fn missing(id: &str) -> ApiError {
    ApiError(Error::NotFound {
        backend: "envelopes".into(),
        uri: id.to_string(),
    })
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /v1/envelopes
pub async fn store_envelope(
    State(state): State<GatewayState>,
    Json(req): Json<StoreEnvelopeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StoreEnvelopeResponse>>), ApiError> {
    let preferred = req
        .preferred_storage
        .as_deref()
        .map(str::parse::<BackendKind>)
        .transpose()?;

    let mut bytes = decode_base64("envelope", &req.envelope)?;
    let mut envelope = decode(&bytes)?;
    verify_integrity(&envelope)?;

    if envelope.is_multipart() {
        check_transport_limit(&bytes, state.config.max_envelope_size)?;
        let part = decode_part(&envelope.message)?;
        match state.assembler.accept(part)? {
            Assembly::Pending {
                message_id,
                received,
                expected,
            } => {
                tracing::debug!(
                    message_id = message_id.as_str(),
                    received,
                    expected,
                    "Buffered envelope part"
                );
                let body = StoreEnvelopeResponse::Pending {
                    message_id,
                    received,
                    expected,
                };
                return Ok((StatusCode::ACCEPTED, ApiResponse::success(body)));
            }
            Assembly::Complete { message_id, payload } => {
                let inner = decode(&payload)?;
                verify_integrity(&inner)?;
                if inner.is_multipart() {
                    return Err(ApiError(Error::MalformedEnvelope(format!(
                        "message {} reassembles to another part envelope",
                        message_id
                    ))));
                }
                tracing::info!(message_id = message_id.as_str(), "Reassembled envelope");
                envelope = inner;
                bytes = payload;
            }
        }
    }

    // Blob first, so a content failure never leaves an indexed envelope
    // without bytes. Content is deduped, so a retry reuses an orphaned blob.
    let descriptor = state
        .content
        .store(&bytes, ENVELOPE_CONTENT_TYPE, preferred)
        .await?;
    let id = state.envelopes.store(&envelope).await?;

    tracing::info!(
        id = id.as_str(),
        uri = descriptor.uri.as_str(),
        size = bytes.len(),
        "Stored envelope"
    );
    Ok((
        StatusCode::CREATED,
        ApiResponse::success(StoreEnvelopeResponse::Stored { id, descriptor }),
    ))
}

/// GET /v1/envelopes/:id
pub async fn get_envelope(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<EnvelopeResponse> {
    let envelope = state.envelopes.retrieve(&id).await?.ok_or_else(|| missing(&id))?;
    Ok(ApiResponse::success(EnvelopeResponse::from_envelope(envelope)?))
}

/// HEAD /v1/envelopes/:id
pub async fn envelope_exists(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.envelopes.exists(&id).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// DELETE /v1/envelopes/:id
pub async fn delete_envelope(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    if !state.envelopes.delete(&id).await? {
        return Err(missing(&id));
    }
    tracing::info!(id = id.as_str(), "Deleted envelope");
    Ok(ApiResponse::success(DeleteResponse { id, deleted: true }))
}

/// POST /v1/envelopes/search
pub async fn search_envelopes(
    State(state): State<GatewayState>,
    Json(query): Json<EnvelopeQuery>,
) -> ApiResult<Vec<EnvelopeResponse>> {
    let found = state.envelopes.search(&query).await?;
    Ok(ApiResponse::success(describe_all(found)?))
}

/// GET /v1/envelopes/by-content/:hash
pub async fn by_content(
    State(state): State<GatewayState>,
    Path(hash): Path<String>,
) -> ApiResult<Vec<EnvelopeResponse>> {
    let hash = decode_hex("hash", &hash)?;
    let found = state.envelopes.find_by_content_hash(&hash).await?;
    Ok(ApiResponse::success(describe_all(found)?))
}

/// GET /v1/envelopes/by-context/:hash
pub async fn by_context(
    State(state): State<GatewayState>,
    Path(hash): Path<String>,
) -> ApiResult<Vec<EnvelopeResponse>> {
    let hash = decode_hex("hash", &hash)?;
    let found = state.envelopes.find_by_context(&hash).await?;
    Ok(ApiResponse::success(describe_all(found)?))
}

/// GET /v1/envelopes/by-sender/:sender?limit=
pub async fn by_sender(
    State(state): State<GatewayState>,
    Path(sender): Path<String>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<EnvelopeResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    let found = state.envelopes.list_by_sender(&sender, limit).await?;
    Ok(ApiResponse::success(describe_all(found)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{app, send};
    use axum::body::Body;
    use axum::http::Request;
    use postfiat_core::envelope::{EnvelopeFactory, EnvelopeOptions, Metadata, Outbound};
    use postfiat_core::{AccessPolicy, CoreMessage, ProtocolConfig};
    use serde_json::{json, Value};

    fn outbound(body: &str, sender: &str) -> Outbound {
        let options = EnvelopeOptions {
            metadata: Metadata::new().with("sender", sender),
            ..Default::default()
        };
        EnvelopeFactory::new(ProtocolConfig::default())
            .create(&CoreMessage::new(body), &AccessPolicy::Public, options)
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_content_failure_leaves_no_indexed_envelope() {
        let mut state = GatewayState::open(crate::state::GatewayConfig::default()).await.unwrap();
        state.content = std::sync::Arc::new(postfiat_core::ContentRouter::new());
        let app = crate::build_app(state.clone());
        let bytes = outbound("nowhere to put this", "alice").frames()[0].to_vec();

        let (status, body) = send(
            &app,
            post_json("/v1/envelopes", json!({ "envelope": BASE64.encode(&bytes) })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(!state.envelopes.exists(&envelope_id(&bytes)).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_fetch_delete() {
        let app = app().await;
        let frames = outbound("hello gateway", "alice");
        let bytes = frames.frames()[0].to_vec();

        let (status, body) = send(
            &app,
            post_json("/v1/envelopes", json!({ "envelope": BASE64.encode(&bytes) })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "stored");
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(id, envelope_id(&bytes));

        let (status, body) = send(&app, get(&format!("/v1/envelopes/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["encoded"], BASE64.encode(&bytes));

        let head = Request::builder()
            .method("HEAD")
            .uri(format!("/v1/envelopes/{}", id))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, head).await.0, StatusCode::OK);

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/v1/envelopes/{}", id))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, delete).await.0, StatusCode::OK);

        let (status, body) = send(&app, get(&format!("/v1/envelopes/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let app = app().await;

        let (status, _) =
            send(&app, post_json("/v1/envelopes", json!({ "envelope": "%%%" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            post_json("/v1/envelopes", json!({ "envelope": BASE64.encode(b"not protobuf at all") })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Valid structure, wrong content hash
        let Outbound::Single(mut envelope, _) = outbound("tamper", "mallory") else {
            panic!("expected a single envelope");
        };
        envelope.message.push(0);
        let tampered = encode(&envelope).unwrap();
        let (status, _) = send(
            &app,
            post_json("/v1/envelopes", json!({ "envelope": BASE64.encode(&tampered) })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_parts_are_reassembled_before_storage() {
        let app = app().await;
        let frames = outbound(&"x".repeat(3000), "bob");
        let Outbound::Multipart { parts, .. } = &frames else {
            panic!("expected a multipart message");
        };
        let total = parts.len();
        assert!(total > 1);

        let mut last = Value::Null;
        for (n, (_, bytes)) in parts.iter().enumerate() {
            let (status, body) = send(
                &app,
                post_json("/v1/envelopes", json!({ "envelope": BASE64.encode(bytes) })),
            )
            .await;
            if n + 1 < total {
                assert_eq!(status, StatusCode::ACCEPTED);
                assert_eq!(body["data"]["status"], "pending");
            } else {
                assert_eq!(status, StatusCode::CREATED);
            }
            last = body;
        }
        assert_eq!(last["data"]["status"], "stored");

        let (status, body) = send(&app, get("/v1/envelopes/by-sender/bob")).await;
        assert_eq!(status, StatusCode::OK);
        let found = body["data"].as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], last["data"]["id"]);
    }

    #[tokio::test]
    async fn test_lookups_and_search() {
        let app = app().await;
        let Outbound::Single(envelope, bytes) = outbound("find me", "carol") else {
            panic!("expected a single envelope");
        };
        send(
            &app,
            post_json("/v1/envelopes", json!({ "envelope": BASE64.encode(&bytes) })),
        )
        .await;

        let uri = format!("/v1/envelopes/by-content/{}", envelope.content_hash_hex());
        let (status, body) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get("/v1/envelopes/by-context/zz")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            post_json("/v1/envelopes/search", json!({ "sender": "carol", "limit": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], envelope_id(&bytes));

        let (_, body) = send(
            &app,
            post_json("/v1/envelopes/search", json!({ "sender": "nobody" })),
        )
        .await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }
}
