//! DNS error types.
//!
//! This module defines errors that can occur during address resolution.

use std::fmt;
use std::io;

/// Error type for DNS operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// No addresses found for the host.
    NoRecords(String),
    /// I/O error during the lookup.
    Io(String),
    /// Invalid hostname.
    InvalidHost(String),
    /// The lookup could not be started.
    Spawn(String),
    /// The lookup was abandoned before it produced a result.
    Cancelled,
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecords(host) => write!(f, "no DNS records found for: {host}"),
            Self::Io(msg) => write!(f, "DNS I/O error: {msg}"),
            Self::InvalidHost(host) => write!(f, "invalid hostname: {host}"),
            Self::Spawn(msg) => write!(f, "failed to start DNS lookup: {msg}"),
            Self::Cancelled => write!(f, "DNS operation cancelled"),
        }
    }
}

impl std::error::Error for DnsError {}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
