//! Wire transport: framing plus the blocking client-side connection.
//!
//! The server side lives in `lodestar-server` and is async; the client side
//! is deliberately synchronous. A stub keeps one call in flight at a time,
//! so a blocking socket with timeouts is the simplest correct thing.

pub mod framing;
pub mod tcp;

pub use tcp::ClientConnection;
