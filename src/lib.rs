//! # toolgate-mcp
//!
//! MCP (Model Context Protocol) server that exposes HTTP tool backends to AI
//! agents and holds back tools that act on a user's third-party account until
//! that user has granted consent.
//!
//! ## Features
//!
//! - **MCP-compliant**: JSON-RPC 2.0 over HTTP (`GET`/`POST /mcp`) or stdio
//! - **Tool registry**: tools declared in a JSON manifest, names normalized
//!   per source prefix
//! - **Argument cleaning**: per-tool policies fill schema defaults and repair
//!   sloppy arguments before the backend sees them
//! - **Consent gate**: gated tools answer `-32003 interaction_required` with
//!   an authorization URL until the grant is completed
//!
//! ## Call path
//!
//! `tools/call` → [`ToolRegistry`] lookup → [`AuthorizationGate`] →
//! [`ArgumentNormalizer`] → [`ToolInvoker`]
//!
//! ## Usage with VS Code
//!
//! Add to your `.vscode/mcp.json`:
//!
//! ```json
//! {
//!   "servers": {
//!     "toolgate": {
//!       "command": "toolgate-mcp",
//!       "args": ["--stdio", "--manifest", "tools.json"],
//!       "env": {}
//!     }
//!   }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arguments;
pub mod authorization;
pub mod backend;
pub mod config;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod invoker;
pub mod manifest;
pub mod oauth;
pub mod protocol;
pub mod server;
pub mod tools;

pub use arguments::{ArgumentNormalizer, ArgumentPolicy, PolicyKind};
pub use authorization::{AuthorizationGate, AuthorizationProvider, GateDecision};
pub use error::{Error, Result};
pub use invoker::ToolInvoker;
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use server::{CallerContext, McpServer, Reply};
pub use tools::{Tool, ToolRegistry};
