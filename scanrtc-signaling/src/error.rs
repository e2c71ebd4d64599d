//! Signaling errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scanrtc_core::ScanRtcError;
use thiserror::Error;

/// Errors raised by the signaling server
#[derive(Error, Debug)]
pub enum SignalingError {
    /// A session operation failed
    #[error(transparent)]
    Session(#[from] ScanRtcError),

    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("Server error: {source}")]
    Serve {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl SignalingError {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            SignalingError::Session(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            SignalingError::Session(ScanRtcError::RegistryClosed) => StatusCode::SERVICE_UNAVAILABLE,
            SignalingError::Session(ScanRtcError::SessionNotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
