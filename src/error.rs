use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for peerlock
#[derive(Debug)]
pub enum PeerlockError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Remote peer unreachable, timed out or refused the connection
    Transport(String),

    /// Malformed or unexpected control message
    Protocol(String),

    /// Peer directory lookup errors
    Registry(String),

    /// Operation not allowed in the current mutex state
    State(StateError),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// Internal lock poisoning or concurrency errors
    Concurrency(String),
}

/// Local state machine refusals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Release asked for while this peer does not hold the resource
    NotHolding,

    /// Acquire asked for while a request is already outstanding or held
    AlreadyActive(String),

    /// No request is outstanding (it was cancelled or already granted)
    NotWanting,

    /// Node has not observed the cluster long enough to request safely
    NotReady,

    /// Node has left the group and accepts no new requests
    Departed,
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors
    Json(serde_json::Error),

    /// Binary wire encoding errors
    Encode(bincode::error::EncodeError),

    /// Binary wire decoding errors
    Decode(bincode::error::DecodeError),
}

impl fmt::Display for PeerlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerlockError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PeerlockError::Transport(msg) => write!(f, "Transport error: {}", msg),
            PeerlockError::Protocol(msg) => write!(f, "Protocol violation: {}", msg),
            PeerlockError::Registry(msg) => write!(f, "Registry error: {}", msg),
            PeerlockError::State(err) => write!(f, "State error: {}", err),
            PeerlockError::Io(err) => write!(f, "I/O error: {}", err),
            PeerlockError::Serialization(err) => write!(f, "Serialization error: {}", err),
            PeerlockError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NotHolding => write!(f, "resource is not held by this peer"),
            StateError::AlreadyActive(status) => {
                write!(f, "a request is already active (status {})", status)
            }
            StateError::NotWanting => write!(f, "no request is outstanding"),
            StateError::NotReady => write!(f, "peer is still discovering the cluster"),
            StateError::Departed => write!(f, "peer has left the group"),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
            SerializationError::Encode(err) => write!(f, "Binary encode: {}", err),
            SerializationError::Decode(err) => write!(f, "Binary decode: {}", err),
        }
    }
}

impl std::error::Error for PeerlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerlockError::Io(err) => Some(err),
            PeerlockError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for StateError {}
impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
            SerializationError::Encode(err) => Some(err),
            SerializationError::Decode(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, PeerlockError>;

impl PeerlockError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            PeerlockError::Config(_) => StatusCode::BAD_REQUEST,
            PeerlockError::Transport(_) => StatusCode::BAD_GATEWAY,
            PeerlockError::Protocol(_) => StatusCode::BAD_REQUEST,
            PeerlockError::Registry(_) => StatusCode::SERVICE_UNAVAILABLE,
            PeerlockError::State(StateError::NotReady | StateError::Departed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PeerlockError::State(_) => StatusCode::CONFLICT,
            PeerlockError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PeerlockError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PeerlockError::Concurrency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            PeerlockError::Config(_) => "configuration_error",
            PeerlockError::Transport(_) => "transport_error",
            PeerlockError::Protocol(_) => "protocol_violation",
            PeerlockError::Registry(_) => "registry_error",
            PeerlockError::State(_) => "state_error",
            PeerlockError::Io(_) => "io_error",
            PeerlockError::Serialization(_) => "serialization_error",
            PeerlockError::Concurrency(_) => "concurrency_error",
        }
    }

    /// True for failures that mean "the peer is gone for now"
    pub fn is_transport(&self) -> bool {
        matches!(self, PeerlockError::Transport(_) | PeerlockError::Io(_))
    }
}

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for PeerlockError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for PeerlockError {
    fn from(err: std::io::Error) -> Self {
        PeerlockError::Io(err)
    }
}

impl From<serde_json::Error> for PeerlockError {
    fn from(err: serde_json::Error) -> Self {
        PeerlockError::Serialization(SerializationError::Json(err))
    }
}

impl From<bincode::error::EncodeError> for PeerlockError {
    fn from(err: bincode::error::EncodeError) -> Self {
        PeerlockError::Serialization(SerializationError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for PeerlockError {
    fn from(err: bincode::error::DecodeError) -> Self {
        PeerlockError::Serialization(SerializationError::Decode(err))
    }
}

impl From<StateError> for PeerlockError {
    fn from(err: StateError) -> Self {
        PeerlockError::State(err)
    }
}

impl From<tokio::time::error::Elapsed> for PeerlockError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        PeerlockError::Transport(format!("timed out: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::PeerlockError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PeerlockError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::PeerlockError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PeerlockError::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::error::PeerlockError::Protocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PeerlockError::Protocol(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! registry_error {
    ($msg:expr) => {
        $crate::error::PeerlockError::Registry($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PeerlockError::Registry(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! concurrency_error {
    ($msg:expr) => {
        $crate::error::PeerlockError::Concurrency($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::PeerlockError::Concurrency(format!($fmt, $($arg)*))
    };
}
