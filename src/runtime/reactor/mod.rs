//! Reactor abstraction for I/O readiness multiplexing.
//!
//! The [`Reactor`] trait is the low-level readiness primitive the
//! [`EventLoop`](crate::runtime::EventLoop) is built on. A reactor watches
//! registered sockets and reports which of them became readable, writable,
//! errored, or hung up.
//!
//! # Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Reactor`] | Trait for readiness backends |
//! | [`Interest`] | Flags for readable/writable/error/hangup |
//! | [`Events`] | Container for poll results |
//! | [`Event`] | Single readiness notification |
//! | [`Token`] | Identifier linking registrations to events |
//! | [`Source`] | Trait for I/O objects that can be registered |
//!
//! # Backends
//!
//! | Backend | Module | Clock |
//! |---------|--------|-------|
//! | epoll (via `polling`) | `epoll.rs` | monotonic |
//! | virtual | `lab.rs` | advanced by `poll` |
//!
//! # Usage Pattern
//!
//! ```ignore
//! use evfetch::runtime::reactor::{EpollReactor, Events, Interest, Reactor, Token};
//!
//! let reactor = EpollReactor::new()?;
//! reactor.register(&socket, Token::new(7), Interest::READABLE)?;
//!
//! let mut events = Events::with_capacity(64);
//! reactor.poll(&mut events, Some(Duration::from_secs(1)))?;
//! for event in &events {
//!     if event.is_readable() {
//!         handle_read(event.token);
//!     }
//! }
//!
//! reactor.deregister(Token::new(7))?;
//! ```

pub mod interest;
pub mod lab;
pub mod source;

#[cfg(unix)]
pub mod epoll;

pub use interest::Interest;
pub use lab::LabReactor;
pub use source::Source;

#[cfg(unix)]
pub use epoll::EpollReactor;

use crate::types::Time;
use std::io;
use std::time::Duration;

/// Identifier linking a registration to the events it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl Token {
    /// Creates a token from a raw value.
    #[must_use]
    pub const fn new(val: usize) -> Self {
        Self(val)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A readiness notification for one registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// The token the source was registered with.
    pub token: Token,
    /// The readiness that was observed.
    pub ready: Interest,
}

impl Event {
    /// Creates an event with explicit readiness flags.
    #[must_use]
    pub const fn new(token: Token, ready: Interest) -> Self {
        Self { token, ready }
    }

    /// Creates a readable event.
    #[must_use]
    pub const fn readable(token: Token) -> Self {
        Self::new(token, Interest::READABLE)
    }

    /// Creates a writable event.
    #[must_use]
    pub const fn writable(token: Token) -> Self {
        Self::new(token, Interest::WRITABLE)
    }

    /// Creates an error event.
    #[must_use]
    pub const fn errored(token: Token) -> Self {
        Self::new(token, Interest::ERROR)
    }

    /// Creates a hangup event.
    #[must_use]
    pub const fn hangup(token: Token) -> Self {
        Self::new(token, Interest::HUP)
    }

    /// Returns true if the source is readable.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.ready.is_readable()
    }

    /// Returns true if the source is writable.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.ready.is_writable()
    }

    /// Returns true if the source reported an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.ready.is_error()
    }

    /// Returns true if the peer hung up.
    #[must_use]
    pub const fn is_hangup(&self) -> bool {
        self.ready.is_hup()
    }
}

/// Container for I/O events returned by [`Reactor::poll`].
///
/// Re-use across poll() calls to avoid allocation.
#[derive(Debug)]
pub struct Events {
    inner: Vec<Event>,
    capacity: usize,
}

impl Events {
    /// Creates a new events buffer with the given capacity.
    ///
    /// The capacity limits the maximum number of events that can be stored.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Clears all events, maintaining capacity.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Pushes an event.
    ///
    /// Events beyond capacity are dropped; level-style re-arming reports them
    /// again on the next poll.
    pub(crate) fn push(&mut self, event: Event) {
        if self.inner.len() < self.capacity {
            self.inner.push(event);
        }
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the capacity (maximum number of events).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over events.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Readiness backend for the event loop.
///
/// A reactor owns the registration table: the loop and the transports mutate
/// it only through `register`/`modify`/`deregister`. Implementations are
/// `Send + Sync` so that [`wake`](Reactor::wake) can be called from resolver
/// threads while the loop thread is blocked in [`poll`](Reactor::poll).
pub trait Reactor: Send + Sync {
    /// Registers `source` under `token` with the given interest.
    ///
    /// Fails with `AlreadyExists` if the token is already registered.
    fn register(&self, source: &dyn Source, token: Token, interest: Interest) -> io::Result<()>;

    /// Replaces the interest of a registered token.
    ///
    /// Fails with `NotFound` if the token is not registered.
    fn modify(&self, token: Token, interest: Interest) -> io::Result<()>;

    /// Removes a registration.
    ///
    /// Fails with `NotFound` if the token is not registered.
    fn deregister(&self, token: Token) -> io::Result<()>;

    /// Waits for readiness, up to `timeout` (`None` waits indefinitely).
    ///
    /// `events` is cleared first. Returns the number of events stored.
    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize>;

    /// Interrupts a blocked [`poll`](Reactor::poll) from any thread.
    fn wake(&self) -> io::Result<()>;

    /// Number of live registrations.
    fn registration_count(&self) -> usize;

    /// Returns true if nothing is registered.
    fn is_empty(&self) -> bool {
        self.registration_count() == 0
    }

    /// The reactor's current instant; timers are measured against it.
    fn now(&self) -> Time;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_constructors_set_flags() {
        let token = Token::new(3);
        assert!(Event::readable(token).is_readable());
        assert!(Event::writable(token).is_writable());
        assert!(Event::errored(token).is_error());
        assert!(Event::hangup(token).is_hangup());

        let combined = Event::new(token, Interest::READABLE | Interest::ERROR);
        assert!(combined.is_readable());
        assert!(combined.is_error());
        assert!(!combined.is_writable());
    }

    #[test]
    fn events_capacity_limit_respected() {
        let mut events = Events::with_capacity(2);
        for n in 0..5 {
            events.push(Event::readable(Token::new(n)));
        }
        assert_eq!(events.len(), 2);
        let tokens: Vec<_> = events.iter().map(|e| e.token.0).collect();
        assert_eq!(tokens, vec![0, 1]);

        events.clear();
        assert!(events.is_empty());
        assert_eq!(events.capacity(), 2);
    }

    #[test]
    fn token_display() {
        assert_eq!(Token::new(12).to_string(), "#12");
    }
}
