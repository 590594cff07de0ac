use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

use crate::mcp::rpc::{
    json_rpc_error, json_rpc_error_with_data, INTERNAL_ERROR, PARSE_ERROR, SERVER_ERROR,
};

/// Transport-level failures. These are raised before a protocol handler can
/// answer and are always rendered as a JSON-RPC envelope with a null id.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("parse error: {detail}")]
    Parse { detail: String },
    #[error("no active session")]
    NoActiveSession,
    #[error("session limit of {max} reached")]
    SessionLimitReached { max: usize },
    #[error("internal error")]
    Internal { message: String },
}

impl AppError {
    pub fn parse(detail: impl Into<String>) -> Self {
        Self::Parse {
            detail: detail.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse { .. } => StatusCode::BAD_REQUEST,
            Self::NoActiveSession | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SessionLimitReached { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn to_json_rpc(&self) -> Value {
        match self {
            Self::Parse { detail } => json_rpc_error_with_data(
                None,
                PARSE_ERROR,
                "Parse error",
                Some(Value::String(detail.clone())),
            ),
            Self::NoActiveSession => {
                json_rpc_error(None, SERVER_ERROR, "Server transport not initialized")
            }
            Self::SessionLimitReached { .. } => {
                json_rpc_error(None, SERVER_ERROR, "Session limit reached")
            }
            Self::Internal { .. } => json_rpc_error(None, INTERNAL_ERROR, "Internal error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal { message } => {
                tracing::error!(error = %message, "request failed with internal error");
            }
            Self::SessionLimitReached { max } => {
                tracing::warn!(max_sessions = max, "rejecting new session at capacity");
            }
            Self::Parse { .. } | Self::NoActiveSession => {}
        }

        (self.status(), Json(self.to_json_rpc())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_carries_detail_and_null_id() {
        let error = AppError::parse("expected value at line 1 column 1");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let body = error.to_json_rpc();
        assert_eq!(body["jsonrpc"], "2.0");
        assert!(body["id"].is_null());
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["error"]["message"], "Parse error");
        assert_eq!(body["error"]["data"], "expected value at line 1 column 1");
    }

    #[test]
    fn no_active_session_is_server_error() {
        let error = AppError::NoActiveSession;
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = error.to_json_rpc();
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Server transport not initialized");
        assert!(body["id"].is_null());
    }

    #[test]
    fn internal_error_hides_message() {
        let body = AppError::internal("lock poisoned").to_json_rpc();
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["error"]["message"], "Internal error");
        assert!(body["error"].get("data").is_none());
    }
}
