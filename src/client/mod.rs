//! The fetch client.
//!
//! A [`Client`] bundles what every request shares: the [`ClientConfig`],
//! a [`Resolver`], an optional [`TlsConnector`] and the [`Sink`] bodies are
//! stored in. [`Client::fetch`] turns a [`Request`] into a [`Session`] and
//! inserts it into an [`EventLoop`]; the caller drives the loop.
//!
//! ```ignore
//! use evfetch::{Client, EpollReactor, EventLoop, FileSink, Request};
//! use std::sync::Arc;
//!
//! let client = Client::builder().sink(FileSink::new("out")).build()?;
//! let mut event_loop = EventLoop::new(Arc::new(EpollReactor::new()?));
//! let request = Request::get("http://example.com/", "index.html")?;
//! client.fetch(&mut event_loop, request, |outcome| match outcome {
//!     Ok(fetched) => println!("{} -> {} bytes", fetched.head.status, fetched.body_len),
//!     Err(failure) => eprintln!("{failure}"),
//! });
//! event_loop.run()?;
//! ```

mod session;

pub use session::{Completion, Fetched, Phase, Session};

use crate::config::{ClientConfig, ConfigError};
use crate::error::Failure;
use crate::http::h1::Request;
use crate::net::dns::{Resolver, SystemResolver};
use crate::runtime::{EventLoop, Token};
use crate::sink::Sink;
use crate::tls::{TlsConnector, TlsConnectorBuilder, TlsError};
use crate::tracing_compat::debug;
use std::fmt;
use std::sync::Arc;

/// State shared by every session a client starts.
pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) tls: Option<TlsConnector>,
    pub(crate) sink: Arc<dyn Sink>,
}

impl ClientShared {
    pub(crate) fn supports_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Starts requests on an event loop.
///
/// Cloning is cheap; clones share configuration, resolver, connector and
/// sink.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The client's configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Returns true if `https` requests can be served.
    #[must_use]
    pub fn supports_tls(&self) -> bool {
        self.shared.supports_tls()
    }

    /// Starts `request` on `event_loop`.
    ///
    /// `on_complete` runs on the loop thread exactly once, with the stored
    /// response or the failure. It may already have run when this returns,
    /// for example when the request is rejected before any I/O. The returned
    /// token can be passed to [`EventLoop::cancel`].
    pub fn fetch<F>(&self, event_loop: &mut EventLoop, request: Request, on_complete: F) -> Token
    where
        F: FnOnce(Result<Fetched, Failure>) + 'static,
    {
        let session = Session::new(request, Arc::clone(&self.shared), Box::new(on_complete));
        let token = event_loop.insert(Box::new(session));
        debug!(token = token.0, "fetch scheduled");
        token
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.shared.config)
            .field("tls", &self.shared.tls.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn Resolver>>,
    tls: Option<TlsConnector>,
    sink: Option<Arc<dyn Sink>>,
}

impl ClientBuilder {
    /// Creates a builder with default configuration and no sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `resolver` instead of the system resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Uses a shared resolver.
    #[must_use]
    pub fn shared_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Uses `connector` for `https` requests.
    #[must_use]
    pub fn tls_connector(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// Stores bodies in `sink`. Required.
    #[must_use]
    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Stores bodies in a shared sink.
    #[must_use]
    pub fn shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the client.
    ///
    /// Without an explicit connector one is built from the configuration;
    /// when TLS support is compiled out the client serves `http` only.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, no sink was given, or the
    /// default TLS connector cannot be built.
    pub fn build(self) -> Result<Client, ConfigError> {
        self.config.validate()?;
        let sink = self.sink.ok_or(ConfigError::MissingSink)?;
        let resolver: Arc<dyn Resolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(SystemResolver::new()),
        };
        let tls = match self.tls {
            Some(connector) => Some(connector),
            None => default_connector(&self.config)?,
        };
        Ok(Client {
            shared: Arc::new(ClientShared {
                config: self.config,
                resolver,
                tls,
                sink,
            }),
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("resolver", &self.resolver.is_some())
            .field("tls", &self.tls.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

fn default_connector(config: &ClientConfig) -> Result<Option<TlsConnector>, ConfigError> {
    match TlsConnectorBuilder::new()
        .with_webpki_roots()
        .verify_peer(config.verify_peer)
        .alpn_http()
        .build()
    {
        Ok(connector) => Ok(Some(connector)),
        Err(TlsError::Unsupported) => Ok(None),
        Err(err) => Err(ConfigError::Invalid(err.to_string())),
    }
}
