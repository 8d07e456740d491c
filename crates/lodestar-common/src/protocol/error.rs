use thiserror::Error;

/// Stable error codes carried in the `error_code` field of a response envelope.
///
/// The numeric values are part of the wire protocol and must not change.
/// `Success` is only ever seen with `success = true`; every failure response
/// carries one of the nonzero codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    /// Malformed frame or envelope.
    Protocol = 1,
    ServiceNotFound = 2,
    MethodNotFound = 3,
    /// Request payload bytes did not parse into the method's request type.
    ParseFailed = 4,
    /// Response message failed to serialize.
    SerializeFailed = 5,
    /// Socket read/write failure.
    Transport = 6,
    RegistryUnavailable = 7,
    /// Load balancer had no instance to select.
    NoInstances = 8,
    Timeout = 9,
    /// Service handler returned an application-level error.
    Handler = 10,
}

impl ErrorCode {
    /// Maps a wire value back to a code, defaulting unknown values to
    /// `Protocol` so a response from a newer peer still surfaces as an error.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ErrorCode::Success,
            1 => ErrorCode::Protocol,
            2 => ErrorCode::ServiceNotFound,
            3 => ErrorCode::MethodNotFound,
            4 => ErrorCode::ParseFailed,
            5 => ErrorCode::SerializeFailed,
            6 => ErrorCode::Transport,
            7 => ErrorCode::RegistryUnavailable,
            8 => ErrorCode::NoInstances,
            9 => ErrorCode::Timeout,
            10 => ErrorCode::Handler,
            _ => ErrorCode::Protocol,
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Failed to parse payload: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize payload: {0}")]
    SerializeFailed(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("No instances available: {0}")]
    NoInstances(String),

    #[error("Call failed with code {code}: {message}")]
    Call { code: i32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// The wire code a failure response carries for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::Protocol(_) => ErrorCode::Protocol,
            RpcError::Serialization(_) | RpcError::JsonSerialization(_) => {
                ErrorCode::SerializeFailed
            }
            RpcError::Transport(_) | RpcError::Connection(_) | RpcError::Io(_) => {
                ErrorCode::Transport
            }
            RpcError::Timeout(_) => ErrorCode::Timeout,
            RpcError::ServiceNotFound(_) => ErrorCode::ServiceNotFound,
            RpcError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            RpcError::ParseFailed(_) => ErrorCode::ParseFailed,
            RpcError::SerializeFailed(_) => ErrorCode::SerializeFailed,
            RpcError::Handler(_) => ErrorCode::Handler,
            RpcError::RegistryUnavailable(_) => ErrorCode::RegistryUnavailable,
            RpcError::NoInstances(_) => ErrorCode::NoInstances,
            RpcError::Call { code, .. } => ErrorCode::from_i32(*code),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
