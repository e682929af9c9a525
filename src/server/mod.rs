//! The KeyServer network service.
//!
//! A single I/O thread runs the [`EventLoop`] which owns all sockets and
//! connection state. Issuance happens on the [`WorkerPool`]; its results
//! are memoized per identity in the [`IssuanceCache`] and travel back to
//! the I/O thread as [`eventloop::IoTask`]s.

pub mod cache;
pub mod conn;
pub mod context;
pub mod eventloop;
pub mod pool;
pub mod protocol;

pub use self::cache::{IssuanceCache, IssuanceHandle, Outcome};
pub use self::context::ServerContext;
pub use self::eventloop::{EventLoop, ServerHandle};
pub use self::pool::WorkerPool;
