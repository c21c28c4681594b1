//! Deterministic lab reactor for testing.
//!
//! The [`LabReactor`] never touches the OS readiness API. Registrations are
//! pure bookkeeping, readiness comes from injected events, and the clock is
//! virtual: it only moves forward inside [`poll`](Reactor::poll) or through
//! [`LabReactor::advance_time`].
//!
//! A poll with a timeout advances the clock to the earlier of `now + timeout`
//! and the next pending injected event. That makes timer-driven behavior
//! (connect deadlines, idle-read deadlines) run instantly and reproducibly.
//!
//! # Example
//!
//! ```ignore
//! let reactor = LabReactor::new();
//! reactor.register(&socket, token, Interest::READABLE)?;
//! reactor.inject_event(token, Event::readable(token), Duration::from_millis(10));
//!
//! let mut events = Events::with_capacity(10);
//! reactor.poll(&mut events, Some(Duration::from_millis(15)))?;
//! assert_eq!(events.len(), 1);
//! assert_eq!(reactor.now(), Time::from_millis(10));
//! ```

use super::{Event, Events, Interest, Reactor, Source, Token};
use crate::types::Time;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
struct TimedEvent {
    time: Time,
    seq: u64,
    event: Event,
}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Min-heap: earliest time first, injection order breaks ties.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct LabInner {
    sockets: HashMap<Token, Interest>,
    pending: BinaryHeap<TimedEvent>,
    time: Time,
    next_seq: u64,
}

/// A deterministic reactor for testing.
#[derive(Debug)]
pub struct LabReactor {
    inner: Mutex<LabInner>,
    woken: AtomicBool,
}

impl LabReactor {
    /// Creates a new lab reactor at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LabInner {
                sockets: HashMap::new(),
                pending: BinaryHeap::new(),
                time: Time::ZERO,
                next_seq: 0,
            }),
            woken: AtomicBool::new(false),
        }
    }

    /// Schedules `event` for `token`, `delay` after the current virtual time.
    ///
    /// Events whose token is no longer registered when they come due are
    /// dropped.
    pub fn inject_event(&self, token: Token, mut event: Event, delay: Duration) {
        let mut inner = self.inner.lock();
        let time = inner.time + delay;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        event.token = token;
        inner.pending.push(TimedEvent { time, seq, event });
    }

    /// Advances virtual time without polling.
    pub fn advance_time(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.time = inner.time + duration;
    }

    /// Current interest of a registered token.
    #[must_use]
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.inner.lock().sockets.get(&token).copied()
    }

    /// Number of injected events not yet delivered.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Clears the wake flag and returns its previous value.
    pub fn check_and_clear_wake(&self) -> bool {
        self.woken.swap(false, Ordering::SeqCst)
    }
}

impl Default for LabReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for LabReactor {
    fn register(&self, _source: &dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.sockets.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }
        inner.sockets.insert(token, interest);
        Ok(())
    }

    fn modify(&self, token: Token, interest: Interest) -> io::Result<()> {
        let mut inner = self.inner.lock();
        match inner.sockets.get_mut(&token) {
            Some(current) => {
                *current = interest;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "token not registered",
            )),
        }
    }

    fn deregister(&self, token: Token) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.sockets.remove(&token).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "token not registered",
            ));
        }
        Ok(())
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        self.woken.store(false, Ordering::SeqCst);

        let mut inner = self.inner.lock();
        let next_event = inner.pending.peek().map(|te| te.time);
        let target = match (timeout, next_event) {
            (Some(d), Some(at)) => (inner.time + d).min(at),
            (Some(d), None) => inner.time + d,
            (None, Some(at)) => at,
            (None, None) => inner.time,
        };
        if target > inner.time {
            inner.time = target;
        }

        let mut count = 0;
        while inner
            .pending
            .peek()
            .is_some_and(|te| te.time <= inner.time)
        {
            let Some(te) = inner.pending.pop() else {
                break;
            };
            if inner.sockets.contains_key(&te.event.token) {
                events.push(te.event);
                count += 1;
            }
        }
        Ok(count)
    }

    fn wake(&self) -> io::Result<()> {
        self.woken.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn registration_count(&self) -> usize {
        self.inner.lock().sockets.len()
    }

    fn now(&self) -> Time {
        self.inner.lock().time
    }
}
