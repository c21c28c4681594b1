//! Address resolvers.
//!
//! A [`Resolver`] starts a lookup and hands the answer back through a
//! [`Notifier`], which queues it for the owning handler's
//! [`on_resolved`](crate::runtime::Handler::on_resolved) and wakes the loop.
//! The loop thread never blocks on a lookup.

use super::DnsError;
use crate::runtime::Notifier;
use crate::tracing_compat::{debug, trace};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::thread;

/// Longest host name accepted for lookup.
pub const MAX_HOST_LEN: usize = 253;

/// Starts address lookups on behalf of the event loop.
pub trait Resolver: Send + Sync {
    /// Resolves `host` and delivers the addresses, each carrying `port`,
    /// through `notifier`.
    ///
    /// Must not block the caller. The result is always delivered through
    /// the notifier, never returned inline.
    fn resolve(&self, host: &str, port: u16, notifier: Notifier);
}

/// Parses an IP literal, accepting bracketed IPv6.
fn ip_literal(host: &str) -> Option<IpAddr> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse().ok()
}

/// Checks the host name shape before handing it to the system resolver.
pub fn validate_host(host: &str) -> Result<(), DnsError> {
    let valid = !host.is_empty()
        && host.len() <= MAX_HOST_LEN
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'));
    if valid {
        Ok(())
    } else {
        Err(DnsError::InvalidHost(host.to_owned()))
    }
}

/// Resolves through the operating system (`getaddrinfo`), one thread per
/// lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    /// Creates a system resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn lookup(host: &str, port: u16) -> Result<Vec<SocketAddr>, DnsError> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(DnsError::NoRecords(host.to_owned()));
        }
        Ok(addrs)
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16, notifier: Notifier) {
        if let Some(ip) = ip_literal(host) {
            notifier.resolved(Ok(vec![SocketAddr::new(ip, port)]));
            return;
        }
        if let Err(err) = validate_host(host) {
            notifier.resolved(Err(err));
            return;
        }

        let host = host.to_owned();
        let token = notifier.token();
        let failed = notifier.clone();
        let spawned = thread::Builder::new()
            .name(format!("evfetch-dns-{}", token.0))
            .spawn(move || {
                trace!(host = %host, port, "system lookup started");
                let result = Self::lookup(&host, port);
                debug!(host = %host, ok = result.is_ok(), "system lookup finished");
                notifier.resolved(result);
            });
        if let Err(err) = spawned {
            failed.resolved(Err(DnsError::Spawn(err.to_string())));
        }
    }
}

/// Answers from a fixed table. IP literals always pass through.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `host` (case-insensitive) to `addrs`, replacing earlier entries.
    #[must_use]
    pub fn with_host(mut self, host: &str, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.insert(host, addrs);
        self
    }

    /// Maps `host` (case-insensitive) to `addrs`, replacing earlier entries.
    pub fn insert(&mut self, host: &str, addrs: impl IntoIterator<Item = IpAddr>) {
        self.hosts
            .insert(host.to_ascii_lowercase(), addrs.into_iter().collect());
    }

    fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, DnsError> {
        if let Some(ip) = ip_literal(host) {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        match self.hosts.get(&host.to_ascii_lowercase()) {
            Some(ips) if !ips.is_empty() => {
                Ok(ips.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            }
            _ => Err(DnsError::NoRecords(host.to_owned())),
        }
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str, port: u16, notifier: Notifier) {
        notifier.resolved(self.lookup(host, port));
    }
}
