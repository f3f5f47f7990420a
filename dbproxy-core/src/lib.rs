//! Shared building blocks for the cluster database proxy.
//!
//! This crate is used both by the proxy daemon (`dbproxy-daemon`) and by
//! client processes that talk to it: the addressable endpoint type, the
//! blocking plain/TLS stream transport, the order/result wire codec, the
//! client-side proxy facade, the message bus client, the process-wide
//! schema cache and the per-connection cursor registry.
//!
//! It does not implement the wide-column store, does not interpret CQL,
//! and does not cache row data - only schema metadata.

#![deny(missing_debug_implementations)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate log;

pub mod bus;
pub mod cache;
pub mod client;
pub mod codec;
pub mod cursor;
pub mod endpoint;
pub mod error;
pub mod transport;

pub use endpoint::{Endpoint, EndpointClass, Protocol};
pub use error::{ProxyError, ProxyResult};
