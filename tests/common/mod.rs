//! Shared helpers for integration tests.

#![allow(dead_code)]

pub use evfetch::test_utils::init_test_logging;
pub use evfetch::{assert_with_log, test_complete, test_phase, test_section};

use evfetch::EventLoop;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound for any single integration scenario.
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);

/// How the canned server ends the exchange after writing its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Close the connection.
    Close,
    /// Keep the connection open for this long, then close.
    Hold(Duration),
}

/// A one-connection server that answers with scripted bytes.
pub struct CannedServer {
    pub addr: SocketAddr,
    handle: JoinHandle<io::Result<Vec<u8>>>,
}

impl CannedServer {
    /// Accepts one connection, reads the request head, then writes each
    /// part with a short pause between them.
    pub fn start(parts: Vec<Vec<u8>>, ending: Ending) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let addr = listener.local_addr().expect("listener addr");
        let handle = thread::spawn(move || {
            let (mut conn, _) = accept_with_deadline(&listener)?;
            let request = read_request_head(&mut conn)?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    thread::sleep(Duration::from_millis(5));
                }
                conn.write_all(part)?;
                conn.flush()?;
            }
            if let Ending::Hold(period) = ending {
                thread::sleep(period);
            }
            Ok(request)
        });
        Self { addr, handle }
    }

    /// Same as [`start`](Self::start) with a single part and a close.
    pub fn respond(response: &[u8]) -> Self {
        Self::start(vec![response.to_vec()], Ending::Close)
    }

    /// `http://` URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Waits for the server thread and returns the request head it read.
    pub fn join(self) -> Vec<u8> {
        self.handle
            .join()
            .expect("server thread panicked")
            .expect("server io")
    }
}

fn accept_with_deadline(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + TEST_DEADLINE;
    loop {
        match listener.accept() {
            Ok((conn, peer)) => {
                conn.set_nonblocking(false)?;
                conn.set_read_timeout(Some(TEST_DEADLINE))?;
                return Ok((conn, peer));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() > deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "accept timed out"));
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Reads until the blank line ending a request head.
pub fn read_request_head(conn: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(512);
    let mut scratch = [0u8; 512];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = conn.read(&mut scratch)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&scratch[..n]);
    }
    Ok(buf)
}

/// Turns the loop until no handler remains or [`TEST_DEADLINE`] passes.
///
/// Returns false on deadline.
pub fn drive(event_loop: &mut EventLoop) -> bool {
    let deadline = Instant::now() + TEST_DEADLINE;
    while event_loop.handler_count() > 0 {
        if Instant::now() > deadline {
            return false;
        }
        event_loop
            .turn(Some(Duration::from_millis(20)))
            .expect("event loop turn");
    }
    true
}

/// Builds a `Content-Length` framed 200 response.
pub fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}
