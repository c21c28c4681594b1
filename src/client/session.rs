//! The per-request state machine.
//!
//! ```text
//! Resolving ─▶ Connecting ─▶ [TlsHandshaking] ─▶ Sending ─▶ ReceivingHeaders ─▶ ReceivingBody ─▶ Finished
//!      └────────────┴──────────────┴─────────────────┴──────────────┴──────────────────┴──────▶ Failed
//! ```
//!
//! A [`Session`] is an event loop [`Handler`]. It owns its [`Transport`] and
//! its decoder, and arms three timers:
//!
//! - connect: from start until TCP is connected (covers resolution),
//! - handshake: from TCP connect until the TLS handshake completes,
//! - idle: from entering `Sending`, re-armed whenever response bytes arrive.
//!
//! Entering `Finished` or `Failed` closes the transport, discards the timers
//! and invokes the completion callback, exactly once whichever event got
//! there first.

use crate::client::ClientShared;
use crate::error::{Error, Failure, TimeoutKind};
use crate::http::h1::{Decode, Request, Response, ResponseDecoder, ResponseHead};
use crate::net::dns::DnsError;
use crate::net::transport::Transport;
use crate::runtime::{Context, Handler, Resolution, TimerId};
use crate::tls::TlsError;
use crate::tracing_compat::{debug, info, trace, warn};
use crate::types::Time;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const CONNECT_TIMER: TimerId = TimerId(0);
pub(crate) const HANDSHAKE_TIMER: TimerId = TimerId(1);
pub(crate) const IDLE_TIMER: TimerId = TimerId(2);

/// Lifecycle phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for the resolver.
    Resolving,
    /// TCP connect in flight.
    Connecting,
    /// TLS handshake in flight.
    TlsHandshaking,
    /// Request bytes queued, not yet fully written.
    Sending,
    /// Request written; response head not complete.
    ReceivingHeaders,
    /// Response head parsed; body in progress.
    ReceivingBody,
    /// Body decoded and stored.
    Finished,
    /// Terminated with an error.
    Failed,
}

impl Phase {
    /// Returns true for `Finished` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Short name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::TlsHandshaking => "tls-handshaking",
            Self::Sending => "sending",
            Self::ReceivingHeaders => "receiving-headers",
            Self::ReceivingBody => "receiving-body",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Status line and headers.
    pub head: ResponseHead,
    /// The id the body was stored under.
    pub sink_id: String,
    /// Length of the stored body.
    pub body_len: usize,
    /// The address the response came from.
    pub peer_addr: SocketAddr,
    /// Response bytes received from the transport.
    pub bytes_received: u64,
    /// Time from start to completion on the reactor clock.
    pub elapsed: Duration,
}

/// Callback receiving the outcome of one request.
pub type Completion = Box<dyn FnOnce(Result<Fetched, Failure>)>;

/// One request's lifecycle, driven by the event loop.
pub struct Session {
    request: Request,
    shared: Arc<ClientShared>,
    phase: Phase,
    transport: Option<Transport>,
    decoder: ResponseDecoder,
    peer: Option<SocketAddr>,
    started: Time,
    on_complete: Option<Completion>,
}

impl Session {
    pub(crate) fn new(request: Request, shared: Arc<ClientShared>, on_complete: Completion) -> Self {
        let decoder = ResponseDecoder::with_limits(shared.config.decoder_limits());
        Self {
            request,
            shared,
            phase: Phase::Resolving,
            transport: None,
            decoder,
            peer: None,
            started: Time::ZERO,
            on_complete: Some(on_complete),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn set_phase(&mut self, cx: &Context<'_>, phase: Phase) {
        let _ = cx;
        debug!(
            token = cx.token().0,
            url = %self.request.url(),
            from = %self.phase,
            phase = %phase,
            "session phase"
        );
        self.phase = phase;
    }

    fn bytes_received(&self) -> u64 {
        self.transport.as_ref().map_or(0, Transport::bytes_received)
    }

    fn release(&mut self, cx: &mut Context<'_>) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        cx.finish();
    }

    fn fail(&mut self, cx: &mut Context<'_>, error: Error) {
        if self.phase.is_terminal() {
            return;
        }
        warn!(
            token = cx.token().0,
            url = %self.request.url(),
            phase = %self.phase,
            peer = ?self.peer,
            bytes = self.bytes_received(),
            error = %error,
            "request failed"
        );
        let failure = Failure {
            error,
            url: self.request.url().to_string(),
            peer_addr: self.peer,
            bytes_received: self.bytes_received(),
        };
        self.phase = Phase::Failed;
        self.release(cx);
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Err(failure));
        }
    }

    fn succeed(&mut self, cx: &mut Context<'_>, response: Response) {
        if self.phase.is_terminal() {
            return;
        }
        let Some(peer_addr) = self.peer else {
            self.fail(cx, Error::transport(io::ErrorKind::NotConnected.into()));
            return;
        };
        let sink_id = self.request.sink_id().to_owned();
        if let Err(source) = self.shared.sink.store(&sink_id, &response.body) {
            self.fail(cx, Error::Sink { id: sink_id, source });
            return;
        }

        let fetched = Fetched {
            head: response.head,
            sink_id,
            body_len: response.body.len(),
            peer_addr,
            bytes_received: self.bytes_received(),
            elapsed: cx.now().duration_since(self.started),
        };
        info!(
            token = cx.token().0,
            url = %self.request.url(),
            status = fetched.head.status,
            bytes = fetched.body_len,
            "request finished"
        );
        self.phase = Phase::Finished;
        self.release(cx);
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Ok(fetched));
        }
    }

    fn on_connect_progress(&mut self, cx: &mut Context<'_>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.poll_connect() {
            Ok(false) => {}
            Ok(true) => {
                cx.cancel_timer(CONNECT_TIMER);
                if self.request.url().scheme.is_tls() {
                    self.start_handshake(cx);
                } else {
                    self.start_sending(cx);
                }
            }
            Err(err) => self.fail(cx, Error::connect(err)),
        }
    }

    #[cfg(feature = "tls")]
    fn start_handshake(&mut self, cx: &mut Context<'_>) {
        let Some(connector) = self.shared.tls.as_ref() else {
            self.fail(cx, TlsError::Unsupported.into());
            return;
        };
        let conn = match connector.client_connection(&self.request.url().host) {
            Ok(conn) => conn,
            Err(err) => {
                self.fail(cx, err.into());
                return;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(err) = transport.start_tls(conn) {
            self.fail(cx, Error::transport(err));
            return;
        }
        self.set_phase(cx, Phase::TlsHandshaking);
        cx.set_timer(HANDSHAKE_TIMER, self.shared.config.handshake_timeout);
        self.on_handshake_progress(cx);
    }

    #[cfg(not(feature = "tls"))]
    fn start_handshake(&mut self, cx: &mut Context<'_>) {
        self.fail(cx, TlsError::Unsupported.into());
    }

    #[cfg(feature = "tls")]
    fn on_handshake_progress(&mut self, cx: &mut Context<'_>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.poll_handshake() {
            Ok(false) => {}
            Ok(true) => {
                cx.cancel_timer(HANDSHAKE_TIMER);
                self.start_sending(cx);
            }
            Err(err) => self.fail(cx, err.into()),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn on_handshake_progress(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    fn start_sending(&mut self, cx: &mut Context<'_>) {
        self.set_phase(cx, Phase::Sending);
        cx.set_timer(IDLE_TIMER, self.shared.config.idle_timeout);
        let wire = self.request.encode();
        trace!(token = cx.token().0, bytes = wire.len(), "request queued");
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(err) = transport.enqueue_write(wire) {
            self.fail(cx, Error::transport(err));
            return;
        }
        self.flush_request(cx);
    }

    fn flush_request(&mut self, cx: &mut Context<'_>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.flush() {
            Ok(true) if self.phase == Phase::Sending => {
                let next = self.receiving_phase();
                self.set_phase(cx, next);
            }
            Ok(_) => {}
            Err(err) => self.fail(cx, Error::transport(err)),
        }
    }

    /// The phase once the request is fully written.
    fn receiving_phase(&self) -> Phase {
        if self.decoder.in_head() {
            Phase::ReceivingHeaders
        } else {
            Phase::ReceivingBody
        }
    }

    fn on_input(&mut self, cx: &mut Context<'_>) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let received = match transport.read_available() {
            Ok(received) => received,
            Err(err) => {
                self.fail(cx, Error::transport(err));
                return;
            }
        };
        trace!(
            token = cx.token().0,
            bytes = received.bytes.len(),
            eof = received.end_of_stream,
            "response bytes"
        );

        if !received.bytes.is_empty() {
            cx.set_timer(IDLE_TIMER, self.shared.config.idle_timeout);
            match self.decoder.feed(&received.bytes) {
                Decode::Complete(response) => {
                    self.succeed(cx, response);
                    return;
                }
                Decode::Malformed(err) => {
                    self.fail(cx, err.into());
                    return;
                }
                Decode::NeedMoreData => {
                    if self.phase == Phase::ReceivingHeaders && !self.decoder.in_head() {
                        self.set_phase(cx, Phase::ReceivingBody);
                    }
                }
            }
        }

        if received.end_of_stream {
            match self.decoder.end_of_stream() {
                Decode::Complete(response) => self.succeed(cx, response),
                Decode::Malformed(err) => self.fail(cx, err.into()),
                Decode::NeedMoreData => {}
            }
        }
    }

    fn socket_error(&self, fallback: &str) -> io::Error {
        self.transport
            .as_ref()
            .and_then(|t| t.take_error().ok().flatten())
            .unwrap_or_else(|| io::Error::other(fallback.to_owned()))
    }
}

impl Handler for Session {
    fn on_start(&mut self, cx: &mut Context<'_>) {
        self.started = cx.now();
        let url = self.request.url();
        debug!(token = cx.token().0, url = %url, "session started");
        let (host, port, tls) = (url.host.clone(), url.port, url.scheme.is_tls());

        if tls && !self.shared.supports_tls() {
            let err = if cfg!(feature = "tls") {
                TlsError::Configuration("no TLS connector configured".to_owned())
            } else {
                TlsError::Unsupported
            };
            self.fail(cx, err.into());
            return;
        }

        cx.set_timer(CONNECT_TIMER, self.shared.config.connect_timeout);
        self.shared.resolver.resolve(&host, port, cx.notifier());
    }

    fn on_resolved(&mut self, cx: &mut Context<'_>, result: Resolution) {
        if self.phase != Phase::Resolving {
            return;
        }
        let addr = match result {
            Ok(addrs) => match addrs.first() {
                Some(addr) => *addr,
                None => {
                    let host = self.request.url().host.clone();
                    self.fail(cx, DnsError::NoRecords(host).into());
                    return;
                }
            },
            Err(err) => {
                self.fail(cx, err.into());
                return;
            }
        };

        self.peer = Some(addr);
        let reactor = Arc::clone(cx.reactor());
        match Transport::connect(reactor, cx.token(), addr, self.shared.config.read_chunk_size) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.set_phase(cx, Phase::Connecting);
            }
            Err(err) => self.fail(cx, Error::connect(err)),
        }
    }

    fn on_writable(&mut self, cx: &mut Context<'_>) {
        match self.phase {
            Phase::Connecting => self.on_connect_progress(cx),
            Phase::TlsHandshaking => self.on_handshake_progress(cx),
            Phase::Sending | Phase::ReceivingHeaders | Phase::ReceivingBody => {
                self.flush_request(cx);
            }
            Phase::Resolving | Phase::Finished | Phase::Failed => {}
        }
    }

    fn on_readable(&mut self, cx: &mut Context<'_>) {
        match self.phase {
            Phase::Connecting => self.on_connect_progress(cx),
            Phase::TlsHandshaking => self.on_handshake_progress(cx),
            Phase::Sending | Phase::ReceivingHeaders | Phase::ReceivingBody => self.on_input(cx),
            Phase::Resolving | Phase::Finished | Phase::Failed => {}
        }
    }

    fn on_error(&mut self, cx: &mut Context<'_>) {
        match self.phase {
            Phase::Resolving | Phase::Finished | Phase::Failed => {}
            Phase::Connecting => {
                let err = self.socket_error("connect failed");
                self.fail(cx, Error::connect(err));
            }
            Phase::TlsHandshaking => {
                let err = self.socket_error("connection lost during handshake");
                self.fail(cx, TlsError::Io(err).into());
            }
            _ => {
                let err = self.socket_error("socket error");
                self.fail(cx, Error::transport(err));
            }
        }
    }

    fn on_timeout(&mut self, cx: &mut Context<'_>, id: TimerId) {
        match (id, self.phase) {
            (CONNECT_TIMER, Phase::Resolving | Phase::Connecting) => {
                self.fail(cx, Error::Timeout(TimeoutKind::Connect));
            }
            (HANDSHAKE_TIMER, Phase::TlsHandshaking) => {
                let after = self.shared.config.handshake_timeout;
                self.fail(cx, TlsError::Timeout(after).into());
            }
            (IDLE_TIMER, Phase::Sending | Phase::ReceivingHeaders | Phase::ReceivingBody) => {
                self.fail(cx, Error::Timeout(TimeoutKind::Idle));
            }
            _ => {
                trace!(token = cx.token().0, timer = id.0, "stale timer ignored");
            }
        }
    }

    fn on_cancel(&mut self, cx: &mut Context<'_>) {
        self.fail(cx, Error::Cancelled);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.request.url().to_string())
            .field("phase", &self.phase)
            .field("peer", &self.peer)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
