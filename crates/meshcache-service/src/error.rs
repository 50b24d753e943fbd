//! The service error surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::wire::ErrorResponse;

/// An error crossing the RPC or gateway boundary.
///
/// Engines never raise; they return misses. Everything above them reduces to
/// one of these kinds, which the RPC server and the gateway translate into
/// status codes. Background components (watchers, keep-alive) do not surface
/// errors at all; they log and continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The named cache group is not registered on this node.
    #[error("cache group not found: {0}")]
    MissingGroup(String),
    /// The key is not present locally, no peer returned it, and the loader
    /// produced no value.
    #[error("key not found")]
    MissingKey,
    /// Transport failure talking to a selected peer.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),
    /// A coordinator list/watch/keep-alive call failed.
    #[error("coordinator error: {0}")]
    Coordinator(String),
    /// A request body or value payload could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl CacheError {
    /// The status code this error maps to on the HTTP surfaces.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CacheError::MissingGroup(_) | CacheError::MissingKey => StatusCode::NOT_FOUND,
            CacheError::Malformed(_) => StatusCode::BAD_REQUEST,
            CacheError::PeerUnavailable(_) | CacheError::Coordinator(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Wrapper turning a [`CacheError`] into an HTTP response with a JSON error
/// body.
#[derive(Debug)]
pub struct ApiError(pub CacheError);

impl From<CacheError> for ApiError {
    fn from(error: CacheError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}
