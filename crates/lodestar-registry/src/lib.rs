//! Lodestar Service Registry and Load Balancing
//!
//! This crate holds the discovery half of the runtime: the registry contract
//! servers publish themselves through and clients resolve instances from, an
//! ephemeral-node backend implementing it, and the load-balancing policies a
//! client picks an instance with.
//!
//! # Registry
//!
//! A [`Registry`](registry::Registry) supports registration, deregistration,
//! discovery, change subscription, heartbeats, and service listing. Instances
//! live under a two-level namespace:
//!
//! ```text
//! /rpc/services/<service>/<host:port>-<seq>
//! ```
//!
//! Instance nodes are *ephemeral*: their lifetime is bound to the session of
//! the publishing server, so a crashed or partitioned server deregisters
//! itself by missing heartbeats.
//!
//! # Load balancing
//!
//! Four policies behind [`balance::LoadBalancer`]: round-robin, smooth
//! weighted round-robin, least-connection, and consistent hashing. A
//! [`balance::BalancerFactory`] resolves policies by configuration name.

pub mod balance;
pub mod ephemeral;
pub mod instance;
pub mod registry;

pub use balance::{BalancerFactory, LoadBalancer};
pub use ephemeral::EphemeralRegistry;
pub use instance::ServiceInstance;
pub use registry::{Registry, RegistryFactory};
