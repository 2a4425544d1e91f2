//! MCP tool gateway
//!
//! This module exposes the delivery channels as MCP tools over
//! line-delimited JSON-RPC on stdio.

pub mod error;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::{McpError, ToolError};
pub use protocol::{CallToolResult, ToolDescriptor};
pub use server::McpServer;
pub use tools::{ToolGateway, ToolProfile};
