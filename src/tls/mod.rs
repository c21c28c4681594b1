//! TLS client support via rustls.
//!
//! # Features
//!
//! - `tls` - Enable TLS support via rustls (ring provider)
//! - `tls-webpki-roots` - Use Mozilla root certificates
//!
//! Without `tls` the types still exist so callers compile unchanged;
//! [`TlsConnectorBuilder::build`] then fails with [`TlsError::Unsupported`]
//! and `https` requests fail the same way.
//!
//! # Client Example
//!
//! ```ignore
//! use evfetch::tls::TlsConnectorBuilder;
//!
//! let connector = TlsConnectorBuilder::new()
//!     .with_webpki_roots()
//!     .build()?;
//! ```

mod connector;
mod error;

pub use connector::{TlsConnector, TlsConnectorBuilder};
pub use error::TlsError;
