use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification every failure is normalized into before it leaves the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input. Never reaches a handler's side effects.
    Validation,
    /// Missing or wrong credential.
    Auth,
    /// Named tool, container, image, or file does not exist.
    NotFound,
    /// A bounded operation exceeded its deadline.
    Timeout,
    /// The container runtime or an OS tool reported a failure.
    Upstream,
    /// Unclassified failure inside the gateway itself.
    Internal,
    /// Startup or registration misconfiguration.
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Internal => "internal",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure: one kind plus a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify an I/O error raised while touching host resources.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(format!("{context}: {err}")),
            std::io::ErrorKind::PermissionDenied => {
                Self::upstream(format!("{context}: permission denied"))
            }
            std::io::ErrorKind::TimedOut => Self::timeout(format!("{context}: {err}")),
            _ => Self::internal(format!("{context}: {err}")),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised while building configuration at process start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("HOSTGATE_API_KEY is not set; refusing to start without a credential")]
    MissingApiKey,

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse command allowlist {path}: {reason}")]
    Allowlist { path: String, reason: String },
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::config(err.to_string())
    }
}
