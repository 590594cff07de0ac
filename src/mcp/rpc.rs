//! JSON-RPC protocol representations and formatting utilities
//!
//! Builds response envelopes through the SDK schema types and maps tool
//! failures to JSON-RPC error objects.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

use crate::tools::ToolError;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const SERVER_ERROR: i32 = -32000;

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn tool_error_to_json_rpc(id: Option<Value>, err: ToolError) -> Value {
    match err {
        ToolError::UnknownTool(name) => json_rpc_error_with_data(
            id,
            INTERNAL_ERROR,
            &format!("Unknown tool: {name}"),
            Some(json!({ "name": name })),
        ),
        ToolError::InvalidArguments { tool, reason } => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            "Invalid params",
            Some(json!({ "tool": tool, "reason": reason })),
        ),
        ToolError::Failed { tool, message } => json_rpc_error_with_data(
            id,
            INTERNAL_ERROR,
            &message,
            Some(json!({ "tool": tool })),
        ),
    }
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let Some(request_id) = id.as_ref().and_then(value_to_request_id) else {
        // Errors that cannot be correlated to a request carry an explicit null id.
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        return json!({ "jsonrpc": "2.0", "id": Value::Null, "error": error });
    };

    let response = JsonrpcErrorResponse::new(
        RpcError {
            code: i64::from(code),
            data,
            message: message.to_string(),
        },
        Some(request_id),
    );
    serde_json::to_value(response).unwrap_or_else(|_| {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        })
    })
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        if let Ok(value) = serde_json::to_value(response) {
            return value;
        }
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_names_the_tool() {
        let response = tool_error_to_json_rpc(
            Some(json!(7)),
            ToolError::UnknownTool("multiply".to_string()),
        );

        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        let message = response["error"]["message"].as_str().expect("message");
        assert!(message.contains("Unknown tool"));
        assert!(message.contains("multiply"));
    }

    #[test]
    fn uncorrelated_error_has_null_id_and_no_data() {
        let response = json_rpc_error(None, INVALID_REQUEST, "Invalid Request");

        assert_eq!(response["jsonrpc"], "2.0");
        assert!(response["id"].is_null());
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert!(response["error"].get("data").is_none());
    }

    #[test]
    fn result_keeps_string_ids() {
        let response = json_rpc_result(Some(json!("req-1")), json!({ "tools": [] }));

        assert_eq!(response["id"], "req-1");
        assert!(response["result"]["tools"].is_array());
    }
}
