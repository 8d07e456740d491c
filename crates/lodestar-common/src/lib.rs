//! Lodestar Common Types and Transport
//!
//! This crate provides the protocol definitions and wire-level plumbing shared
//! by every component of the Lodestar RPC runtime.
//!
//! # Overview
//!
//! Lodestar is a small TCP RPC runtime: clients invoke named methods on named
//! services hosted by remote servers, with discovery and load balancing layered
//! on top. This crate contains the pieces both sides agree on:
//!
//! - **Protocol layer**: the request/response envelope, error taxonomy, and
//!   stable wire error codes
//! - **Wire codecs**: a compact structured-binary serializer (the default) and
//!   a human-readable JSON serializer, selectable by name
//! - **Framing**: every message travels as `[u32 big-endian length][body]`
//! - **Byte buffer**: the growable read/write buffer the server feeds socket
//!   data through while extracting frames
//! - **Client transport**: blocking connect/send/receive with timeouts
//!
//! # Example
//!
//! ```
//! use lodestar_common::protocol::RpcRequest;
//! use lodestar_common::codec::WireCodec;
//!
//! let codec = WireCodec::by_name("binary").unwrap();
//! let request = RpcRequest::new("Calculator", "Add", vec![1, 2, 3]);
//!
//! let bytes = codec.encode_request(&request).unwrap();
//! let decoded = codec.decode_request(&bytes).unwrap();
//! assert_eq!(request, decoded);
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod protocol;
pub mod transport;

pub use buffer::ByteBuffer;
pub use codec::WireCodec;
pub use config::ServerConfig;
pub use protocol::*;
