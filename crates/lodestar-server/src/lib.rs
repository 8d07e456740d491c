//! Lodestar RPC Server
//!
//! The server half of the runtime: a tokio accept loop feeds length-prefixed
//! frames to a fixed worker pool, where requests are decoded and dispatched
//! to registered services; responses are framed and written back on the same
//! connection in whatever order the workers finish.
//!
//! # Components
//!
//! - [`service`]: service and method descriptors; handlers are closures
//!   registered at construction, each owning parse, invoke, and serialize
//!   for its typed messages
//! - [`dispatcher`]: name to service lookup and request dispatch; dispatch
//!   failures become failure responses, never disconnects
//! - [`worker`]: the fixed thread pool dispatch runs on
//! - [`server`]: the orchestrator wiring transport, pool, dispatcher,
//!   registry registration, and heartbeats together
//!
//! # Example
//!
//! ```no_run
//! use lodestar_common::ServerConfig;
//! use lodestar_server::{RpcServer, ServiceBuilder};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> lodestar_common::protocol::Result<()> {
//! let service = ServiceBuilder::new("Echo")
//!     .method("Ping", |payload| Ok(payload.to_vec()))
//!     .build();
//!
//! let server = RpcServer::new(ServerConfig::default().with_bind("127.0.0.1", 9000))?;
//! server.register_service(Arc::new(service))?;
//! let addr = server.start().await?;
//! println!("serving on {}", addr);
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod server;
pub mod service;
pub mod worker;

pub use dispatcher::ServiceDispatcher;
pub use server::RpcServer;
pub use service::{MethodDescriptor, ServiceBuilder, ServiceDescriptor};
pub use worker::WorkerPool;
