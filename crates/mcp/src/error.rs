//! Protocol-level errors. Tool failures are not errors here: they travel
//! inside a successful `tools/call` response with `isError` set.

use crate::types::{error_codes, JsonRpcError};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Incoming line exceeded the transport's size bound.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Session has not authenticated. The message never includes the credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl McpError {
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            McpError::MessageTooLarge(_) => error_codes::INVALID_REQUEST,
            McpError::Unauthorized(_) => error_codes::UNAUTHORIZED,
            McpError::Transport(_) => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }
}
