//! evfetch: a single-threaded, readiness-driven HTTP/1.1 client core.
//!
//! # Overview
//!
//! One thread runs an [`EventLoop`] over a [`Reactor`]. Each request is a
//! [`Session`](client::Session) handler that resolves its host off-thread,
//! connects a non-blocking socket, optionally completes a TLS handshake,
//! writes a `GET`, and decodes the response incrementally as bytes arrive.
//! The finished body goes to a [`Sink`]; the outcome goes to a completion
//! callback exactly once.
//!
//! # Core Guarantees
//!
//! - **No blocking on the loop**: lookups run elsewhere; sockets are non-blocking
//! - **Exactly-once completion**: every request ends in one success or one [`Failure`]
//! - **Resumable parsing**: the [`ResponseDecoder`] accepts arbitrary fragmentation
//! - **Deterministic testing**: [`LabReactor`] drives timers on virtual time
//!
//! # Module Structure
//!
//! - [`runtime`]: reactor backends, timers, and the event loop
//! - [`net`]: resolvers and the plain/TLS [`Transport`](net::Transport)
//! - [`http`]: request encoding and the response decoder
//! - [`tls`]: rustls connector (requires `tls` feature)
//! - [`client`]: [`Client`] and the per-request state machine
//! - [`sink`]: body destinations
//! - [`config`]: [`ClientConfig`] with env and TOML layering
//! - [`error`](mod@error): error types
//! - [`tracing_compat`]: optional tracing integration (requires `tracing-integration` feature)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(unix)]
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod runtime;
pub mod sink;
pub mod tls;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

#[cfg(unix)]
pub use client::{Client, ClientBuilder, Fetched, Phase};
pub use config::{ClientConfig, ConfigError};
pub use error::{Error, ErrorKind, Failure, Result, TimeoutKind};
pub use http::{ParsedUrl, Request, Response, ResponseDecoder, ResponseHead};
pub use net::{DnsError, Resolver, StaticResolver, SystemResolver};
#[cfg(unix)]
pub use runtime::EpollReactor;
pub use runtime::{EventLoop, Handler, Interest, LabReactor, Reactor, Token};
pub use sink::{FileSink, MemorySink, Sink};
pub use tls::{TlsConnector, TlsConnectorBuilder, TlsError};
pub use types::Time;
