//! Lodestar Request Envelope
//!
//! This module defines the RPC request envelope and unique ID generation.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Unique identifier for an RPC request.
///
/// Each request is assigned a unique 64-bit ID that combines a timestamp
/// with a counter to ensure uniqueness across the process.
pub type RequestId = u64;

/// Global counter for ensuring unique request IDs
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The envelope a client sends for one call.
///
/// # Request Flow
///
/// 1. The client stub serializes the method's request message into `payload`
/// 2. The envelope is serialized by the wire codec and framed
/// 3. The server extracts the frame, decodes the envelope, and dispatches on
///    `service` + `method`
/// 4. The service handler parses `payload` and produces a [`RpcResponse`]
///    echoing `request_id`
///
/// The `request_id` is used for logging and debugging; a stub keeps a single
/// call in flight per connection, so correlation never depends on it.
///
/// # Example
///
/// ```
/// use lodestar_common::protocol::RpcRequest;
///
/// let request = RpcRequest::new("Calculator", "Add", vec![0x01, 0x02]);
/// assert_eq!(request.service, "Calculator");
/// assert_eq!(request.method, "Add");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcRequest {
    /// Unique request identifier
    pub request_id: RequestId,
    /// Target service name
    pub service: String,
    /// Method name within the service
    pub method: String,
    /// Serialized method request message
    pub payload: Vec<u8>,
}

impl RpcRequest {
    /// Creates a new request envelope with a freshly generated id.
    pub fn new(service: impl Into<String>, method: impl Into<String>, payload: Vec<u8>) -> Self {
        RpcRequest {
            request_id: generate_request_id(),
            service: service.into(),
            method: method.into(),
            payload,
        }
    }

    /// Creates a request with an explicit id, for tests and replay tooling.
    pub fn with_id(
        request_id: RequestId,
        service: impl Into<String>,
        method: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        RpcRequest {
            request_id,
            service: service.into(),
            method: method.into(),
            payload,
        }
    }

    /// A request is well-formed when it names both a service and a method.
    pub fn is_valid(&self) -> bool {
        !self.service.is_empty() && !self.method.is_empty()
    }
}

/// Generates a unique request ID.
///
/// The ID combines:
/// - Upper 32 bits: timestamp (seconds since UNIX epoch, valid until 2106)
/// - Lower 32 bits: atomic counter
///
/// This keeps ids unique within a process and roughly ordered across restarts.
fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    // Relaxed ordering is sufficient since we only need uniqueness.
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    (timestamp << 32) | (counter & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let req = RpcRequest::new("Calculator", "Add", vec![1, 2, 3]);
        assert_eq!(req.service, "Calculator");
        assert_eq!(req.method, "Add");
        assert_eq!(req.payload, vec![1, 2, 3]);
        assert!(req.is_valid());
    }

    #[test]
    fn test_request_with_explicit_id() {
        let req = RpcRequest::with_id(42, "Calculator", "Add", vec![]);
        assert_eq!(req.request_id, 42);
    }

    #[test]
    fn test_empty_names_are_invalid() {
        assert!(!RpcRequest::new("", "Add", vec![]).is_valid());
        assert!(!RpcRequest::new("Calculator", "", vec![]).is_valid());
        assert!(!RpcRequest::new("", "", vec![]).is_valid());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let req1 = RpcRequest::new("a", "b", vec![]);
        let req2 = RpcRequest::new("a", "b", vec![]);
        assert_ne!(req1.request_id, req2.request_id);
    }

    #[test]
    fn test_request_id_no_collisions_under_concurrency() {
        use std::collections::HashSet;
        use std::thread;

        let num_threads = 10;
        let ids_per_thread = 1000;
        let mut handles = vec![];

        for _ in 0..num_threads {
            let handle = thread::spawn(move || {
                let mut ids = HashSet::new();
                for _ in 0..ids_per_thread {
                    let id = generate_request_id();
                    assert!(ids.insert(id), "Duplicate request ID detected: {}", id);
                }
                ids
            });
            handles.push(handle);
        }

        let mut all_ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(
                    all_ids.insert(id),
                    "Duplicate request ID detected across threads: {}",
                    id
                );
            }
        }

        assert_eq!(all_ids.len(), num_threads * ids_per_thread);
    }

    #[test]
    fn test_request_id_structure() {
        let id = generate_request_id();
        let timestamp = id >> 32;

        // Timestamp should be between 2020 and the 32-bit horizon (2106).
        assert!(timestamp > 1_577_836_800, "timestamp should be after 2020");
        assert!(timestamp < 4_294_967_296, "timestamp should fit in 32 bits");
    }
}
