//! Tool registry seam
//!
//! The protocol handler only knows tools through [`ToolRegistry`]; the sample
//! `echo`/`add` registry lives in [`sample`].

pub mod sample;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{ContentBlock, TextContent, Tool};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub use sample::SampleTools;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("tool {tool} failed: {message}")]
    Failed { tool: String, message: String },
}

/// A single item of tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolContent {
    Text(String),
    /// Base64 encoded image data.
    Image { data: String, mime_type: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn into_content_block(self) -> Result<ContentBlock, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(ContentBlock::from(TextContent::new(text, None, None))),
            Self::Image { data, mime_type } => serde_json::from_value(json!({
                "type": "image",
                "data": data,
                "mimeType": mime_type,
            })),
        }
    }
}

#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Descriptors in registry order.
    fn list(&self) -> Vec<Tool>;

    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Vec<ToolContent>, ToolError>;
}
