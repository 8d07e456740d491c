//! Lodestar RPC Client
//!
//! The client stub: it owns one connection, keeps exactly one call in flight,
//! and resolves its target either directly (a fixed `host:port`) or through
//! service discovery plus a load balancer.
//!
//! # Example
//!
//! ```no_run
//! use lodestar_client::RpcClient;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct AddRequest { a: i32, b: i32 }
//! #[derive(Deserialize)]
//! struct AddResponse { result: i32 }
//!
//! # fn main() -> lodestar_common::protocol::Result<()> {
//! let client = RpcClient::direct("127.0.0.1:9000");
//! let response: AddResponse =
//!     client.call_typed("Calculator", "Add", &AddRequest { a: 10, b: 20 })?;
//! assert_eq!(response.result, 30);
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::RpcClient;
