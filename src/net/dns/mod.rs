//! Address resolution.
//!
//! Lookups never run on the event loop thread. [`SystemResolver`] performs
//! each `getaddrinfo` call on its own short-lived thread and delivers the
//! answer back through a [`Notifier`](crate::runtime::Notifier).
//! [`StaticResolver`] answers from a fixed table.

mod error;
mod resolver;

pub use error::DnsError;
pub use resolver::{MAX_HOST_LEN, Resolver, StaticResolver, SystemResolver, validate_host};
