//! Networking: address resolution and the non-blocking client transport.

pub mod dns;
#[cfg(unix)]
pub mod transport;

pub use dns::{DnsError, Resolver, StaticResolver, SystemResolver};
#[cfg(unix)]
pub use transport::{Received, Transport};
