//! HTTP Transport layer for the Model Context Protocol
//!
//! Maps POST/GET/DELETE on `/mcp` onto the request router, plus metadata endpoints.

pub mod handlers;
