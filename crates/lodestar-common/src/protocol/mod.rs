//! Lodestar Protocol Definitions
//!
//! This module defines the core protocol types for Lodestar: the request and
//! response envelope carried inside every frame, and the error types used
//! throughout the system.
//!
//! # Protocol Types
//!
//! - **[`RpcRequest`]**: a call envelope naming a service, a method, and an
//!   opaque payload
//! - **[`RpcResponse`]**: the reply envelope echoing the request id, with a
//!   success flag, a stable error code, and an opaque payload
//! - **[`RpcError`]**: the error taxonomy, with [`ErrorCode`] giving each kind
//!   a stable wire value
//!
//! # Error Handling
//!
//! Errors raised while *dispatching* a request (unknown service, unknown
//! method, payload parse failure) travel back inside the response envelope and
//! leave the connection open. Errors raised at the *wire* level (malformed
//! frame, oversize length, socket failure) tear the connection down.
//!
//! # Example
//!
//! ```
//! use lodestar_common::protocol::{ErrorCode, RpcRequest, RpcResponse};
//!
//! let request = RpcRequest::new("Calculator", "Add", vec![]);
//! let response = RpcResponse::failure(
//!     request.request_id,
//!     ErrorCode::MethodNotFound,
//!     "method 'Add' is not registered",
//! );
//! assert!(!response.success);
//! assert_eq!(response.error_code, ErrorCode::MethodNotFound as i32);
//! ```

pub mod error;
pub mod requests;
pub mod responses;


pub use error::{ErrorCode, Result, RpcError};
pub use requests::{RequestId, RpcRequest};
pub use responses::RpcResponse;
