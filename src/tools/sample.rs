//! Sample tools served by the binary: `echo` and `add`.

use async_trait::async_trait;
use rust_mcp_sdk::{macros, schema::Tool};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ToolContent, ToolError, ToolRegistry};

#[macros::mcp_tool(name = "echo", description = "Echoes back the input")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EchoTool {
    /// Message to echo
    pub message: String,
}

#[macros::mcp_tool(name = "add", description = "Adds two numbers")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddTool {
    /// First number
    pub a: f64,
    /// Second number
    pub b: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SampleTools;

impl SampleTools {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRegistry for SampleTools {
    fn list(&self) -> Vec<Tool> {
        vec![EchoTool::tool(), AddTool::tool()]
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Vec<ToolContent>, ToolError> {
        match name {
            "echo" => {
                let EchoTool { message } = parse_arguments(name, arguments)?;
                Ok(vec![ToolContent::text(format!("Echo: {message}"))])
            }
            "add" => {
                let AddTool { a, b } = parse_arguments(name, arguments)?;
                Ok(vec![ToolContent::text(format!(
                    "The sum of {} and {} is {}.",
                    format_number(a),
                    format_number(b),
                    format_number(a + b)
                ))])
            }
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

fn parse_arguments<T>(tool: &str, arguments: Map<String, Value>) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(arguments)).map_err(|err| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}

/// Shortest round-trip formatting; integral values print without a fraction
/// and negative zero prints as `0`.
fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}
