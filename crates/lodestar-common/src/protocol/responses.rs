use serde::{Deserialize, Serialize};

use super::error::ErrorCode;
use super::RequestId;

/// The envelope a server sends back for one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcResponse {
    /// Echoed from the request
    pub request_id: RequestId,
    pub success: bool,
    /// Stable wire value of [`ErrorCode`]; 0 on success
    pub error_code: i32,
    /// Human-readable failure description; empty on success
    pub error: String,
    /// Serialized method response message; may be empty on failure
    pub payload: Vec<u8>,
}

impl RpcResponse {
    pub fn success(request_id: RequestId, payload: Vec<u8>) -> Self {
        RpcResponse {
            request_id,
            success: true,
            error_code: ErrorCode::Success as i32,
            error: String::new(),
            payload,
        }
    }

    /// Builds a failure response. A failure always carries a nonzero code;
    /// `Success` is coerced to `Protocol` so the invariant holds even for
    /// careless callers.
    pub fn failure(request_id: RequestId, code: ErrorCode, error: impl Into<String>) -> Self {
        let code = if code == ErrorCode::Success {
            ErrorCode::Protocol
        } else {
            code
        };
        RpcResponse {
            request_id,
            success: false,
            error_code: code as i32,
            error: error.into(),
            payload: Vec::new(),
        }
    }

    /// A response is well-formed when failures carry a nonzero code and a
    /// message.
    pub fn is_valid(&self) -> bool {
        if self.success {
            self.error_code == ErrorCode::Success as i32
        } else {
            self.error_code != ErrorCode::Success as i32 && !self.error.is_empty()
        }
    }
}
