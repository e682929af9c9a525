//! The _KeyServer_ library crate.
//!
//! KeyServer accepts short-lived TCP connections, each naming an identity,
//! and answers with a freshly generated private key and an X.509
//! certificate for that identity, signed by a local certificate authority.

pub mod client;
pub mod commons;
pub mod config;
pub mod constants;
pub mod server;
pub mod signing;
