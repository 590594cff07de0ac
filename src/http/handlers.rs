//! Axum HTTP handlers for the web server
//!
//! `/mcp` accepts POST (send messages), GET (open a server-push stream) and
//! DELETE (terminate a session); everything session related is decided by the
//! request router.

use std::{convert::Infallible, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tracing::warn;

use crate::errors::AppError;
use crate::mcp::router::StreamLease;
use crate::mcp::session::MCP_SESSION_ID_HEADER;
use crate::AppState;

const SSE_MESSAGE_EVENT: &str = "message";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
    pub session_mode: &'static str,
    pub active_sessions: usize,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: "/mcp",
        session_mode: state.router.mode().as_str(),
        active_sessions: state.router.sessions().len().await,
    })
}

pub async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let reply = state
        .router
        .handle_post(session_header(&headers), &body)
        .await?;

    let mut response = match reply.body {
        Some(payload) => (StatusCode::OK, Json(payload)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    if let Some(session_id) = reply.issued_session {
        let value = HeaderValue::from_str(session_id.as_str())
            .map_err(|err| AppError::internal(format!("unusable session id header: {err}")))?;
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }

    Ok(response)
}

pub async fn mcp_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let lease = state.router.open_stream(session_header(&headers)).await?;

    Ok(Sse::new(notification_stream(lease))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping")))
}

pub async fn mcp_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    state.router.terminate(session_header(&headers)).await?;
    Ok(StatusCode::OK)
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Forwards the handler's notifications until the handler closes or the
/// client goes away. The lease lives inside the stream, so a disconnect drops it.
fn notification_stream(mut lease: StreamLease) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            let message = tokio::select! {
                _ = lease.subscription.closed.wait_for(|closed| *closed) => break,
                message = lease.subscription.notifications.recv() => message,
            };

            match message {
                Ok(payload) => yield Ok(Event::default().event(SSE_MESSAGE_EVENT).data(payload)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "stream subscriber lagged, notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
