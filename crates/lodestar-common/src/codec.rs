//! Wire serializers for the RPC envelope.
//!
//! The envelope can travel in one of two encodings, selected by name in the
//! server and client configuration:
//!
//! - **binary**: compact structured binary via `postcard`; the default
//! - **json**: human-readable, handy when poking at the wire with tooling
//!
//! Both sides of a connection must agree on the encoding; nothing in the
//! frame identifies it.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{Result, RpcError, RpcRequest, RpcResponse};

/// Codec for encoding/decoding the RPC envelope.
///
/// # Example
///
/// ```
/// use lodestar_common::codec::WireCodec;
/// use lodestar_common::protocol::RpcRequest;
///
/// let codec = WireCodec::by_name("json").unwrap();
/// let request = RpcRequest::new("Calculator", "Add", vec![]);
///
/// let encoded = codec.encode_request(&request).unwrap();
/// let decoded = codec.decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    /// Structured binary codec (postcard)
    Binary,
    /// JSON codec
    Json,
}

impl WireCodec {
    /// Resolves a codec by configuration name. Accepted spellings are
    /// case-insensitive: "binary" and "json".
    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "binary" => Ok(WireCodec::Binary),
            "json" => Ok(WireCodec::Json),
            other => Err(RpcError::Protocol(format!(
                "unknown wire codec '{}' (expected 'binary' or 'json')",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireCodec::Binary => "binary",
            WireCodec::Json => "json",
        }
    }

    /// Encodes a request envelope to bytes.
    pub fn encode_request(&self, request: &RpcRequest) -> Result<Vec<u8>> {
        if !request.is_valid() {
            return Err(RpcError::Protocol(
                "request must name a service and a method".into(),
            ));
        }
        self.to_bytes(request)
    }

    /// Decodes and validates a request envelope.
    pub fn decode_request(&self, data: &[u8]) -> Result<RpcRequest> {
        let request: RpcRequest = self.from_bytes(data)?;
        if !request.is_valid() {
            return Err(RpcError::Protocol(
                "request envelope has empty service or method name".into(),
            ));
        }
        Ok(request)
    }

    /// Encodes a response envelope to bytes.
    pub fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>> {
        self.to_bytes(response)
    }

    /// Decodes and validates a response envelope.
    pub fn decode_response(&self, data: &[u8]) -> Result<RpcResponse> {
        let response: RpcResponse = self.from_bytes(data)?;
        if !response.is_valid() {
            return Err(RpcError::Protocol(
                "response envelope fails the success/error-code invariant".into(),
            ));
        }
        Ok(response)
    }

    /// True when `data` decodes to a well-formed request envelope.
    pub fn is_valid_request(&self, data: &[u8]) -> bool {
        self.decode_request(data).is_ok()
    }

    /// True when `data` decodes to a well-formed response envelope.
    pub fn is_valid_response(&self, data: &[u8]) -> bool {
        self.decode_response(data).is_ok()
    }

    /// Serializes a typed payload message with this codec.
    pub fn encode_payload<T: Serialize>(&self, message: &T) -> Result<Vec<u8>> {
        self.to_bytes(message)
    }

    /// Parses a typed payload message with this codec.
    pub fn decode_payload<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        self.from_bytes(data)
    }

    fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireCodec::Binary => Ok(postcard::to_allocvec(value)?),
            WireCodec::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    fn from_bytes<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            WireCodec::Binary => Ok(postcard::from_bytes(data)?),
            WireCodec::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        WireCodec::Binary
    }
}
