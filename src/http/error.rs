//! Proxy failures and the status codes clients see for them.
//!
//! Failures are handled where they occur: anything detected before a
//! response is on the wire becomes a status response here. Failures after
//! that point are only logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The outbound request could not be derived from the inbound one.
    #[error("failed to create outbound request: {0}")]
    InvalidRequest(String),

    /// The request target names no destination the client can reach.
    #[error("unusable request target: {0}")]
    UnusableTarget(String),

    /// The forwarded request failed before a response arrived.
    #[error("failed to reach target: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// TCP connect to a CONNECT destination failed.
    #[error("connection to {target} failed: {source}")]
    DestinationUnreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The client connection cannot be taken over for tunneling.
    #[error("connection upgrade unsupported")]
    UpgradeUnavailable,

    /// A CONNECT request named no host, so there is nothing to dial.
    #[error("CONNECT request has no target authority")]
    MissingConnectTarget,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UnusableTarget(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::DestinationUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpgradeUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::MissingConnectTarget => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "Failed to create request",
            ProxyError::UnusableTarget(_) | ProxyError::Upstream(_) => "Failed to reach target",
            ProxyError::DestinationUnreachable { .. } => "Connection failed",
            ProxyError::UpgradeUnavailable => "Connection upgrade unsupported",
            ProxyError::MissingConnectTarget => "Connection failed",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.client_message()).into_response()
    }
}
