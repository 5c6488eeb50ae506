//! MCP (Model Context Protocol) Server Implementation
//!
//! Exposes the question answering engine to MCP clients over JSON-RPC 2.0
//! on stdio.


pub mod errors;
pub mod protocol;
pub mod server;
pub mod tools;

pub use errors::{McpError, McpResult};
pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::AskHandler;
