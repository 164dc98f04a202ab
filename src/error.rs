//! Error types for the MCP server.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// MCP server errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request envelope.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown JSON-RPC method.
    #[error("Method {0} not supported")]
    MethodNotFound(String),

    /// Tool not found.
    #[error("Tool {0} not found")]
    ToolNotFound(String),

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// A tool argument could not be normalized.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArguments {
        /// Offending argument name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The tool backend failed.
    #[error("{message}")]
    ToolExecution {
        /// Tool that failed.
        tool: String,
        /// Original failure message.
        message: String,
    },

    /// The authorization provider failed or answered nonsense.
    #[error("authorization provider error: {0}")]
    Provider(String),

    /// Request-level authentication failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Tool manifest could not be loaded.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) => codes::INVALID_REQUEST,
            Error::MethodNotFound(_) | Error::ToolNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) | Error::InvalidArguments { .. } => codes::INVALID_PARAMS,
            Error::Unauthorized(_) => codes::UNAUTHORIZED,
            Error::Serialization(_)
            | Error::ToolExecution { .. }
            | Error::Provider(_)
            | Error::Manifest(_)
            | Error::Io(_)
            | Error::Http(_)
            | Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Convert to JSON-RPC error object.
    pub fn to_json_rpc_error(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// JSON-RPC error codes used on the wire.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Request-level authentication rejected.
    pub const UNAUTHORIZED: i32 = -32001;
    /// The tool needs a user to complete a consent flow first.
    pub const INTERACTION_REQUIRED: i32 = -32003;
}
