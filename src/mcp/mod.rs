//! Model Context Protocol (MCP) session routing and JSON-RPC handling
//!
//! Provides envelope parsing and classification, the per-session protocol
//! handler, the session table and the request router that ties them together.

pub mod handler;
pub mod message;
pub mod router;
pub mod rpc;
pub mod session;
