//! Non-blocking client transport: a TCP socket, optionally wrapped in TLS.
//!
//! A [`Transport`] is owned by exactly one session and registered with the
//! reactor under that session's token. It never blocks: every operation
//! does as much as the socket allows right now and reports whether more
//! readiness is needed. Interest is kept in step with what the transport is
//! waiting for:
//!
//! | State | Interest |
//! |-------|----------|
//! | connecting | `WRITABLE` |
//! | TLS handshake | `READABLE`, plus `WRITABLE` while rustls has records to send |
//! | established | `READABLE`, plus `WRITABLE` while output is queued |
//! | closed | deregistered |

use crate::runtime::reactor::{Interest, Reactor, Token};
use crate::tracing_compat::{debug, trace};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

#[cfg(feature = "tls")]
use crate::tls::TlsError;
#[cfg(feature = "tls")]
use rustls::ClientConnection;

use socket2::{Domain, Protocol, Socket, Type};

/// Bytes taken from the socket in one [`Transport::read_available`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Received {
    /// Decrypted bytes, in stream order.
    pub bytes: Vec<u8>,
    /// The peer closed its side of the stream.
    pub end_of_stream: bool,
}

fn connect_in_progress(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::EINPROGRESS)
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

/// Outbound byte queue with a cursor into its front buffer.
#[derive(Debug, Default)]
struct OutQueue {
    bufs: VecDeque<Vec<u8>>,
    front_offset: usize,
    len: usize,
}

impl OutQueue {
    fn push(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.bufs.push_back(bytes);
    }

    fn front(&self) -> Option<&[u8]> {
        self.bufs.front().map(|b| &b[self.front_offset..])
    }

    fn consume(&mut self, mut n: usize) {
        self.len -= n;
        while n > 0 {
            let Some(front) = self.bufs.front() else {
                return;
            };
            let left = front.len() - self.front_offset;
            if n < left {
                self.front_offset += n;
                return;
            }
            n -= left;
            self.bufs.pop_front();
            self.front_offset = 0;
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A non-blocking, reactor-registered client connection.
pub struct Transport {
    reactor: Arc<dyn Reactor>,
    token: Token,
    stream: Option<TcpStream>,
    peer: SocketAddr,
    interest: Interest,
    connected: bool,
    #[cfg(feature = "tls")]
    tls: Option<ClientConnection>,
    out: OutQueue,
    read_chunk: usize,
    bytes_sent: u64,
    bytes_received: u64,
}

impl Transport {
    /// Starts a non-blocking connect to `addr` and registers the socket for
    /// `WRITABLE` under `token`.
    ///
    /// Completion is observed with [`poll_connect`](Self::poll_connect) once
    /// the reactor reports writability.
    pub fn connect(
        reactor: Arc<dyn Reactor>,
        token: Token,
        addr: SocketAddr,
        read_chunk: usize,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(err) if connect_in_progress(&err) => {}
            Err(err) => return Err(err),
        }
        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;
        reactor.register(&stream, token, Interest::WRITABLE)?;
        trace!(token = token.0, peer = %addr, "connect started");

        Ok(Self {
            reactor,
            token,
            stream: Some(stream),
            peer: addr,
            interest: Interest::WRITABLE,
            connected: false,
            #[cfg(feature = "tls")]
            tls: None,
            out: OutQueue::default(),
            read_chunk: read_chunk.max(1),
            bytes_sent: 0,
            bytes_received: 0,
        })
    }

    /// The address being connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The reactor token this transport is registered under.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Current reactor interest.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Returns true once the TCP connect has completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns true after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Returns true if queued output has not reached the socket yet.
    pub fn has_pending_output(&self) -> bool {
        if !self.out.is_empty() {
            return true;
        }
        #[cfg(feature = "tls")]
        if let Some(tls) = &self.tls {
            return tls.wants_write();
        }
        false
    }

    /// Bytes handed to the socket (ciphertext when TLS is active).
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Bytes returned by [`read_available`](Self::read_available).
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Takes the socket's pending error (`SO_ERROR`).
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.as_ref().ok_or_else(not_connected)?.take_error()
    }

    /// Checks whether the connect has completed.
    ///
    /// Returns `Ok(false)` while it is still in progress and the connect
    /// failure (refused, unreachable) as an error.
    pub fn poll_connect(&mut self) -> io::Result<bool> {
        if self.connected {
            return Ok(true);
        }
        let stream = self.stream.as_ref().ok_or_else(not_connected)?;
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        match stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                debug!(token = self.token.0, peer = %self.peer, "connected");
                self.update_interest()?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Queues `bytes` behind any earlier output.
    ///
    /// Nothing is written until [`flush`](Self::flush).
    pub fn enqueue_write(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(not_connected());
        }
        self.out.push(bytes);
        Ok(())
    }

    /// Writes as much queued output as the socket accepts.
    ///
    /// Returns true once everything queued so far is on the wire.
    pub fn flush(&mut self) -> io::Result<bool> {
        if self.stream.is_none() {
            return Err(not_connected());
        }
        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            let drained = self.flush_tls()?;
            self.update_interest()?;
            return Ok(drained);
        }
        let drained = self.flush_plain()?;
        self.update_interest()?;
        Ok(drained)
    }

    fn flush_plain(&mut self) -> io::Result<bool> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        while let Some(chunk) = self.out.front() {
            match stream.write(chunk) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.out.consume(n);
                    self.bytes_sent += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Reads everything currently available.
    ///
    /// Reads `read_chunk` bytes at a time and keeps going only while each
    /// read fills the whole chunk.
    pub fn read_available(&mut self) -> io::Result<Received> {
        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            let received = self.read_tls()?;
            self.bytes_received += received.bytes.len() as u64;
            self.update_interest()?;
            return Ok(received);
        }

        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let mut received = Received::default();
        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    received.end_of_stream = true;
                    break;
                }
                Ok(n) => {
                    received.bytes.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        self.bytes_received += received.bytes.len() as u64;
        Ok(received)
    }

    /// Closes the connection. Idempotent.
    ///
    /// Deregisters from the reactor, sends a TLS `close_notify` and shuts
    /// down the write half, all best-effort.
    pub fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let _ = self.reactor.deregister(self.token);
        #[cfg(feature = "tls")]
        if let Some(mut tls) = self.tls.take() {
            tls.send_close_notify();
            let _ = tls.write_tls(&mut stream);
        }
        let _ = stream.flush();
        let _ = stream.shutdown(Shutdown::Write);
        self.interest = Interest::NONE;
        trace!(token = self.token.0, peer = %self.peer, "transport closed");
    }

    /// Interest matching what the transport currently waits for.
    fn wanted_interest(&self) -> Interest {
        if !self.connected {
            return Interest::WRITABLE;
        }
        let mut wanted = Interest::READABLE;
        if self.has_pending_output() {
            wanted |= Interest::WRITABLE;
        }
        wanted
    }

    fn update_interest(&mut self) -> io::Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        let wanted = self.wanted_interest();
        if wanted != self.interest {
            self.reactor.modify(self.token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }
}

#[cfg(feature = "tls")]
impl Transport {
    /// Wraps the connected socket in `conn`.
    ///
    /// Drive the handshake with [`poll_handshake`](Self::poll_handshake).
    pub fn start_tls(&mut self, conn: ClientConnection) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(not_connected());
        }
        self.tls = Some(conn);
        self.update_interest()
    }

    /// Returns true if TLS is active.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Advances the handshake without blocking.
    ///
    /// Returns true once the handshake is complete.
    pub fn poll_handshake(&mut self) -> Result<bool, TlsError> {
        let done = self.drive_handshake()?;
        self.update_interest()?;
        Ok(done)
    }

    fn drive_handshake(&mut self) -> Result<bool, TlsError> {
        let (Some(stream), Some(tls)) = (self.stream.as_mut(), self.tls.as_mut()) else {
            return Err(TlsError::Io(not_connected()));
        };
        loop {
            while tls.wants_write() {
                match tls.write_tls(stream) {
                    Ok(n) => self.bytes_sent += n as u64,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err.into()),
                }
            }
            if !tls.is_handshaking() {
                debug!(
                    token = self.token.0,
                    alpn = ?tls.alpn_protocol().map(String::from_utf8_lossy),
                    "TLS handshake complete"
                );
                return Ok(true);
            }
            if !tls.wants_read() {
                return Ok(false);
            }
            match tls.read_tls(stream) {
                Ok(0) => {
                    return Err(TlsError::Handshake(
                        "connection closed during handshake".to_owned(),
                    ));
                }
                Ok(_) => {
                    if let Err(err) = tls.process_new_packets() {
                        // Send the alert describing the failure.
                        let _ = tls.write_tls(stream);
                        return Err(err.into());
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn flush_tls(&mut self) -> io::Result<bool> {
        let (Some(stream), Some(tls)) = (self.stream.as_mut(), self.tls.as_mut()) else {
            return Err(not_connected());
        };
        loop {
            // Hand plaintext to rustls only once it can seal records.
            if !tls.is_handshaking() {
                while let Some(chunk) = self.out.front() {
                    let n = tls.writer().write(chunk)?;
                    if n == 0 {
                        break;
                    }
                    self.out.consume(n);
                }
            }
            if !tls.wants_write() {
                return Ok(self.out.is_empty());
            }
            match tls.write_tls(stream) {
                Ok(n) => self.bytes_sent += n as u64,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn read_tls(&mut self) -> io::Result<Received> {
        let (Some(stream), Some(tls)) = (self.stream.as_mut(), self.tls.as_mut()) else {
            return Err(not_connected());
        };
        let mut received = Received::default();
        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            let (filled, tcp_eof) = match tls.read_tls(stream) {
                Ok(0) => (false, true),
                Ok(n) => (n >= self.read_chunk, false),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => (false, false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if let Err(err) = tls.process_new_packets() {
                let _ = tls.write_tls(stream);
                return Err(io::Error::new(io::ErrorKind::InvalidData, err));
            }
            loop {
                match tls.reader().read(&mut chunk) {
                    Ok(0) => {
                        received.end_of_stream = true;
                        break;
                    }
                    Ok(n) => received.bytes.extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    // Peer closed TCP without close_notify.
                    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                        received.end_of_stream = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if tcp_eof {
                received.end_of_stream = true;
            }
            if received.end_of_stream || !filled {
                break;
            }
        }
        // Key updates and alerts produced while reading.
        while tls.wants_write() {
            match tls.write_tls(stream) {
                Ok(n) => self.bytes_sent += n as u64,
                Err(_) => break,
            }
        }
        Ok(received)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Transport");
        d.field("token", &self.token)
            .field("peer", &self.peer)
            .field("interest", &self.interest)
            .field("connected", &self.connected)
            .field("closed", &self.stream.is_none())
            .field("queued", &self.out.len);
        #[cfg(feature = "tls")]
        d.field("tls", &self.tls.is_some());
        d.finish()
    }
}
