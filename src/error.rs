//! Error types for evfetch.
//!
//! Every failure is terminal for its request: there is no retry inside the
//! client. A failed request yields exactly one [`Failure`], which carries the
//! [`Error`] plus diagnostic context (URL, peer address, bytes received).
//! Buffer contents never appear in error messages.
//!
//! # Error Categories
//!
//! [`Error::kind`] classifies every error:
//!
//! - **Dns**: the host did not resolve
//! - **Connect**: the TCP connect was refused or unreachable
//! - **Tls**: handshake or certificate failure, including the handshake deadline
//! - **Transport**: read or write failure after the connection was up
//! - **Timeout**: connect or idle-read deadline exceeded
//! - **Parse**: the response was malformed
//! - **Sink**: the body could not be stored
//! - **Cancelled**: the caller cancelled the request
//! - **InvalidUrl**: the request target was rejected before any I/O

use crate::http::h1::{ParseError, UrlError};
use crate::net::dns::DnsError;
use crate::tls::TlsError;
use std::fmt;
use std::io;
use std::net::SocketAddr;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Name resolution failed.
    Dns,
    /// TCP connect failed.
    Connect,
    /// TLS handshake or verification failed.
    Tls,
    /// The established connection failed.
    Transport,
    /// A deadline expired.
    Timeout,
    /// The response was malformed.
    Parse,
    /// Storing the body failed.
    Sink,
    /// The request was cancelled.
    Cancelled,
    /// The URL was rejected.
    InvalidUrl,
}

impl ErrorKind {
    /// Returns true for failures a fresh attempt might not repeat.
    ///
    /// The client itself never retries; this is advice for callers.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Dns | Self::Connect | Self::Transport | Self::Timeout
        )
    }
}

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// Resolution plus TCP connect took too long.
    Connect,
    /// No response bytes arrived within the idle window.
    Idle,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Idle => f.write_str("idle read"),
        }
    }
}

/// Why a request failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name resolution failed.
    #[error("DNS resolution failed: {0}")]
    Dns(#[from] DnsError),
    /// TCP connect failed.
    #[error("connect failed: {source}")]
    Connect {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// TLS failure.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// Read or write failure on an established connection.
    #[error("transport error: {source}")]
    Transport {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// A deadline expired.
    #[error("{0} timeout exceeded")]
    Timeout(TimeoutKind),
    /// Malformed response.
    #[error("malformed response: {0}")]
    Parse(#[from] ParseError),
    /// The sink rejected the body.
    #[error("failed to store body as {id:?}: {source}")]
    Sink {
        /// Sink identifier of the request.
        id: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
    /// The URL was rejected.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Dns(_) => ErrorKind::Dns,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Tls(_) => ErrorKind::Tls,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Sink { .. } => ErrorKind::Sink,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
        }
    }

    /// Wraps a connect-phase socket error.
    #[must_use]
    pub fn connect(source: io::Error) -> Self {
        Self::Connect { source }
    }

    /// Wraps a post-connect socket error.
    #[must_use]
    pub fn transport(source: io::Error) -> Self {
        Self::Transport { source }
    }
}

/// A failed request, delivered once to the completion callback.
#[derive(Debug)]
pub struct Failure {
    /// What went wrong.
    pub error: Error,
    /// The request URL.
    pub url: String,
    /// The address connected to, if one was chosen.
    pub peer_addr: Option<SocketAddr>,
    /// Response bytes received before the failure.
    pub bytes_received: u64,
}

impl Failure {
    /// Classifies the underlying error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GET {} failed", self.url)?;
        if let Some(peer) = self.peer_addr {
            write!(f, " (peer {peer}")?;
            write!(f, ", {} bytes received)", self.bytes_received)?;
        }
        write!(f, ": {}", self.error)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result type for evfetch operations.
pub type Result<T> = std::result::Result<T, Error>;
