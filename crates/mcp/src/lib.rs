//! MCP (Model Context Protocol) front end for the gateway.
//!
//! Exposes the tool dispatcher over JSON-RPC 2.0 so MCP clients can list
//! and call the same tools the HTTP API serves.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: Newline-delimited framing (stdio, in-memory channels)
//! - **server**: One authenticated session over a `Dispatcher`
//! - **error**: Protocol error types
//!
//! # Usage
//!
//! ```no_run
//! use hostgate_core::AuthGate;
//! use hostgate_mcp::{McpServer, StdioTransport};
//! use hostgate_tool_runtime::{Dispatcher, ToolRegistry};
//!
//! # async fn example() {
//! let dispatcher = Dispatcher::new(ToolRegistry::new());
//! let gate = AuthGate::new("secret").unwrap();
//! let mut server = McpServer::new(dispatcher, gate);
//! let mut transport = StdioTransport::stdio();
//! server.run(&mut transport).await.unwrap();
//! # }
//! ```

pub mod error;
pub mod server;
pub mod transport;
pub mod types;

pub use error::McpError;
pub use server::McpServer;
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use types::*;
