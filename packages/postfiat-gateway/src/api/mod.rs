//! HTTP API.
//!
//! - `/v1/envelopes/...`: envelope storage and lookup
//! - `/v1/content/...`: content-addressed blobs
//!
//! Every response is an [`ApiResponse`]. Core errors are mapped to status
//! codes by [`ApiError`].

mod content;
mod envelopes;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use postfiat_core::Error;
use serde::Serialize;

use crate::state::GatewayState;

// ── Response Types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
        })
    }
}

/// A core error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Integrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Unimplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Error::Schema(_)
            | Error::MalformedEnvelope(_)
            | Error::EnvelopeTooLarge { .. }
            | Error::InvalidPartSize(_)
            | Error::Reassembly(_)
            | Error::UnsupportedStorage(_)
            | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }
        let body = ApiResponse::<()> {
            ok: false,
            data: None,
            error: Some(self.0.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

pub(crate) fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    BASE64
        .decode(value)
        .map_err(|e| ApiError(Error::InvalidInput(format!("{} is not valid base64: {}", field, e))))
}

pub(crate) fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    hex::decode(value)
        .map_err(|e| ApiError(Error::InvalidInput(format!("{} is not valid hex: {}", field, e))))
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Versioned API routes, without the service-level endpoints.
pub fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/v1/envelopes", post(envelopes::store_envelope))
        .route(
            "/v1/envelopes/:id",
            get(envelopes::get_envelope)
                .head(envelopes::envelope_exists)
                .delete(envelopes::delete_envelope),
        )
        .route("/v1/envelopes/search", post(envelopes::search_envelopes))
        .route("/v1/envelopes/by-content/:hash", get(envelopes::by_content))
        .route("/v1/envelopes/by-context/:hash", get(envelopes::by_context))
        .route("/v1/envelopes/by-sender/:sender", get(envelopes::by_sender))
        .route("/v1/content", post(content::store_content))
        .route("/v1/content/retrieve", post(content::retrieve_content))
        .route("/v1/content/delete", post(content::delete_content))
        .route("/v1/content/can-handle", get(content::can_handle))
}


#[cfg(test)]
mod tests {
    use super::*;
    use postfiat_core::error::ReassemblyError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                Error::NotFound {
                    backend: "cache".into(),
                    uri: "cache://00".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (Error::Integrity("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::MalformedEnvelope("x".into()), StatusCode::BAD_REQUEST),
            (Error::UnsupportedStorage("s3://x".into()), StatusCode::BAD_REQUEST),
            (
                Error::Reassembly(ReassemblyError::TooManyPending(1)),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Unimplemented {
                    backend: "ipfs".into(),
                    operation: "delete".into(),
                },
                StatusCode::NOT_IMPLEMENTED,
            ),
            (Error::DatabaseError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
