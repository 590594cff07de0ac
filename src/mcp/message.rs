//! Inbound JSON-RPC bodies: a single envelope or an ordered batch.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;

pub const INITIALIZE_METHOD: &str = "initialize";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcBody {
    Batch(Vec<Value>),
    Single(Value),
}

impl JsonRpcBody {
    /// Only malformed JSON fails here. Shape problems of individual envelopes
    /// are answered by the protocol handler as `Invalid Request`.
    pub fn parse(bytes: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(bytes).map_err(|err| AppError::parse(err.to_string()))
    }

    /// True when any envelope asks for the handshake, wherever it sits in a batch.
    pub fn is_initialize(&self) -> bool {
        self.envelopes().any(is_initialize_envelope)
    }

    pub fn envelopes(&self) -> impl Iterator<Item = &Value> {
        match self {
            Self::Batch(items) => items.iter(),
            Self::Single(item) => std::slice::from_ref(item).iter(),
        }
    }
}

fn is_initialize_envelope(envelope: &Value) -> bool {
    envelope
        .get("method")
        .and_then(Value::as_str)
        .is_some_and(|method| method == INITIALIZE_METHOD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_envelope_parses_as_single() {
        let body = JsonRpcBody::parse(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .expect("valid json");
        assert!(matches!(body, JsonRpcBody::Single(_)));
        assert!(!body.is_initialize());
    }

    #[test]
    fn initialize_anywhere_in_batch_classifies_batch() {
        let body = JsonRpcBody::parse(
            br#"[{"jsonrpc":"2.0","id":1,"method":"tools/list"},{"jsonrpc":"2.0","id":2,"method":"initialize","params":{}}]"#,
        )
        .expect("valid json");
        assert!(matches!(body, JsonRpcBody::Batch(ref items) if items.len() == 2));
        assert!(body.is_initialize());
    }

    #[test]
    fn classification_tolerates_odd_shapes() {
        for raw in [&b"42"[..], b"\"initialize\"", b"null", b"[]", b"[1, {\"method\": 5}]"] {
            let body = JsonRpcBody::parse(raw).expect("valid json");
            assert!(!body.is_initialize());
        }
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = JsonRpcBody::parse(b"{").expect_err("truncated object");
        assert!(matches!(err, AppError::Parse { .. }));
    }
}
