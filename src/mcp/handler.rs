//! Per-session protocol handler
//!
//! Owns the handshake state of one session (or one request in stateless
//! mode), dispatches JSON-RPC methods to the tool registry and publishes
//! server-initiated notifications to attached streams.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, Utc};
use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolRequestParams, CallToolResult, Implementation, InitializeRequest,
    InitializeResult, JsonrpcMessage, JsonrpcRequest, ListToolsRequest, ListToolsResult,
    PingRequest, ServerCapabilities, ServerCapabilitiesTools,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info};

use crate::mcp::message::{JsonRpcBody, INITIALIZE_METHOD};
use crate::mcp::rpc::{
    is_json_rpc_error, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
    request_id_to_value, tool_error_to_json_rpc, value_to_request_id, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::mcp::session::SessionId;
use crate::tools::{ToolContent, ToolError, ToolRegistry};

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Uninitialized,
    Initialized,
}

/// Receiving half of a handler's server-initiated traffic.
pub struct Subscription {
    pub notifications: broadcast::Receiver<String>,
    pub closed: watch::Receiver<bool>,
}

pub struct ProtocolHandler {
    session_id: Option<SessionId>,
    registry: Arc<dyn ToolRegistry>,
    // Held for a whole body so requests of one session never interleave.
    state: Mutex<HandlerState>,
    notifications: broadcast::Sender<String>,
    closed: watch::Sender<bool>,
    created_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
}

impl ProtocolHandler {
    pub fn new(registry: Arc<dyn ToolRegistry>, session_id: Option<SessionId>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (closed, _) = watch::channel(false);
        let created_at = Utc::now();

        Self {
            session_id,
            registry,
            state: Mutex::new(HandlerState::Uninitialized),
            notifications,
            closed,
            created_at,
            last_activity_ms: AtomicI64::new(created_at.timestamp_millis()),
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub async fn state(&self) -> HandlerState {
        *self.state.lock().await
    }

    /// Marks a handler that will never see a handshake as ready.
    pub async fn mark_initialized(&self) {
        let mut state = self.state.lock().await;
        self.transition_to_initialized(&mut state, "forced");
    }

    fn transition_to_initialized(&self, state: &mut HandlerState, reason: &'static str) {
        if *state == HandlerState::Uninitialized {
            *state = HandlerState::Initialized;
            debug!(session_id = ?self.session_id, reason, "handler initialized");
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::milliseconds(now.timestamp_millis().saturating_sub(last))
    }

    /// True while at least one stream is subscribed to this handler.
    pub fn has_streams(&self) -> bool {
        self.notifications.receiver_count() > 0
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Ends every attached stream. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(
                session_id = ?self.session_id,
                age_ms = (Utc::now() - self.created_at).num_milliseconds(),
                "handler closed"
            );
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            notifications: self.notifications.subscribe(),
            closed: self.closed.subscribe(),
        }
    }

    /// Publishes a JSON-RPC notification to attached streams, if any.
    pub fn notify(&self, method: &str, params: Value) {
        if !self.has_streams() {
            return;
        }

        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let _ = self.notifications.send(message.to_string());
    }

    /// Answers a body. `None` means nothing to send back (notifications only).
    pub async fn handle_body(&self, body: JsonRpcBody) -> Option<Value> {
        let mut state = self.state.lock().await;
        self.touch();

        match body {
            JsonRpcBody::Single(payload) => self.handle_json_rpc_value(&mut state, payload).await,
            JsonRpcBody::Batch(batch) => {
                if batch.is_empty() {
                    return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
                }

                let mut responses = Vec::new();
                for item in batch {
                    if let Some(response) = self.handle_json_rpc_value(&mut state, item).await {
                        responses.push(response);
                    }
                }

                (!responses.is_empty()).then_some(Value::Array(responses))
            }
        }
    }

    async fn handle_json_rpc_value(
        &self,
        state: &mut HandlerState,
        payload: Value,
    ) -> Option<Value> {
        if !payload.is_object() {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let request_id = payload.get("id").cloned();
        // An id that is neither a string nor an integer cannot be echoed back.
        if request_id
            .as_ref()
            .is_some_and(|id| !id.is_null() && value_to_request_id(id).is_none())
        {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
        };

        match parsed {
            JsonrpcMessage::Request(request) => {
                if let Err(error_response) = validate_request_shape(&request) {
                    return Some(error_response);
                }

                let request_id = request_id_to_value(request.id);
                if request.method.trim().is_empty() {
                    return Some(json_rpc_error(Some(request_id), INVALID_REQUEST, "Invalid Request"));
                }

                Some(
                    self.handle_json_rpc_request(
                        state,
                        Some(request_id),
                        request.method,
                        request.params.map(Value::Object),
                    )
                    .await,
                )
            }
            JsonrpcMessage::Notification(notification) => {
                debug!(
                    session_id = ?self.session_id,
                    method = %notification.method,
                    "notification received"
                );
                None
            }
            // Replies to server-initiated requests; nothing is ever pending here.
            JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => None,
        }
    }

    async fn handle_json_rpc_request(
        &self,
        state: &mut HandlerState,
        id: Option<Value>,
        method: String,
        params: Option<Value>,
    ) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let response = match method.as_str() {
            INITIALIZE_METHOD => self.handle_initialize(state, id, params.as_ref()),
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => to_result(
                id,
                &ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: self.registry.list(),
                },
            ),
            "tools/call" => self.handle_tools_call(id, params).await,
            _ => json_rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
        };

        info!(
            session_id = ?self.session_id,
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    fn handle_initialize(
        &self,
        state: &mut HandlerState,
        id: Option<Value>,
        params: Option<&Value>,
    ) -> Value {
        if *state == HandlerState::Initialized {
            return json_rpc_error(id, INVALID_REQUEST, "Server already initialized");
        }

        let protocol_version = match negotiate_protocol_version(params) {
            Some(version) => version,
            None => {
                return json_rpc_error_with_data(
                    id,
                    INVALID_PARAMS,
                    "Invalid params",
                    Some(json!({ "reason": "initialize params.protocolVersion is required" })),
                )
            }
        };

        let initialize_result = InitializeResult {
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                description: None,
                icons: vec![],
                website_url: None,
            },
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            protocol_version: protocol_version.to_string(),
            instructions: None,
            meta: None,
        };

        let response = to_result(id, &initialize_result);
        if !is_json_rpc_error(&response) {
            self.transition_to_initialized(state, "handshake");
        }
        response
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
        };

        let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
        };

        let name = tool_call.name;
        let outcome = self
            .registry
            .invoke(&name, tool_call.arguments.unwrap_or_default())
            .await
            .and_then(|content| into_call_tool_result(&name, content));

        match outcome {
            Ok(result) => {
                self.notify(
                    "notifications/message",
                    json!({ "level": "info", "logger": "tools", "data": { "tool": name, "outcome": "success" } }),
                );
                to_result(id, &result)
            }
            Err(err) => {
                self.notify(
                    "notifications/message",
                    json!({ "level": "error", "logger": "tools", "data": { "tool": name, "error": err.to_string() } }),
                );
                tool_error_to_json_rpc(id, err)
            }
        }
    }
}

fn into_call_tool_result(tool: &str, content: Vec<ToolContent>) -> Result<CallToolResult, ToolError> {
    let content = content
        .into_iter()
        .map(ToolContent::into_content_block)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ToolError::Failed {
            tool: tool.to_string(),
            message: format!("tool produced unrepresentable content: {err}"),
        })?;

    Ok(CallToolResult {
        content,
        is_error: None,
        meta: None,
        structured_content: None,
    })
}

fn to_result<T: Serialize>(id: Option<Value>, result: &T) -> Value {
    match serde_json::to_value(result) {
        Ok(value) => json_rpc_result(id, value),
        Err(err) => {
            tracing::error!(error = %err, "result serialization failed");
            json_rpc_error(id, INTERNAL_ERROR, "Internal error")
        }
    }
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let request_id = Some(request_id_to_value(request.id.clone()));
    let Ok(payload) = serde_json::to_value(request) else {
        return Err(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request"));
    };

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        INITIALIZE_METHOD => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(json_rpc_error(request_id, INVALID_PARAMS, "Invalid params"))
    }
}

/// Echoes a supported offered version, otherwise answers with the latest one.
/// `None` when the client offered nothing.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Option<&'static str> {
    let offered = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())?;

    Some(
        SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .copied()
            .find(|supported| *supported == offered)
            .unwrap_or(LATEST_PROTOCOL_VERSION),
    )
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "credentials" | "credential" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
}
