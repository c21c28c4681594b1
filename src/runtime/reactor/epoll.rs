//! epoll-backed reactor built on the `polling` crate.
//!
//! `polling` registers sources in oneshot mode: after an event is delivered
//! the kernel disarms the descriptor. [`EpollReactor::poll`] re-arms every
//! delivered token with its stored interest before returning, so callers
//! observe level-style readiness and never have to re-register.
//!
//! Registration needs `unsafe`: `Poller::add` cannot check that the
//! descriptor outlives the registration, and `modify`/`delete` work from the
//! stored raw descriptor rather than a borrowed source. The contract is that
//! every owner deregisters before closing its descriptor, which
//! [`Transport::close`](crate::net::Transport::close) does.

#![allow(unsafe_code)]

use super::{Event, Events, Interest, Reactor, Source, Token};
use crate::types::Time;
use parking_lot::Mutex;
use polling::{Event as PollEvent, Events as PollEvents, Poller};
use std::collections::HashMap;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

const DEFAULT_BATCH: usize = 256;

#[derive(Debug)]
struct RegistrationInfo {
    raw_fd: RawFd,
    interest: Interest,
}

/// epoll reactor.
///
/// Its clock is monotonic, measured from construction.
pub struct EpollReactor {
    poller: Poller,
    registrations: Mutex<HashMap<Token, RegistrationInfo>>,
    scratch: Mutex<PollEvents>,
    origin: Instant,
}

impl EpollReactor {
    /// Creates a new epoll-based reactor.
    ///
    /// # Errors
    ///
    /// Returns an error if `epoll_create1()` fails (e.g., out of file
    /// descriptors).
    pub fn new() -> io::Result<Self> {
        let batch = NonZeroUsize::new(DEFAULT_BATCH).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            poller: Poller::new()?,
            registrations: Mutex::new(HashMap::new()),
            scratch: Mutex::new(PollEvents::with_capacity(batch)),
            origin: Instant::now(),
        })
    }

    fn interest_to_poll_event(token: Token, interest: Interest) -> PollEvent {
        let key = token.0;
        match (interest.is_readable(), interest.is_writable()) {
            (true, true) => PollEvent::all(key),
            (true, false) => PollEvent::readable(key),
            (false, true) => PollEvent::writable(key),
            (false, false) => PollEvent::none(key),
        }
    }

    fn poll_event_to_interest(event: &PollEvent) -> Interest {
        let mut ready = Interest::NONE;
        if event.readable {
            ready |= Interest::READABLE;
        }
        if event.writable {
            ready |= Interest::WRITABLE;
        }
        if event.is_err().unwrap_or(false) {
            ready |= Interest::ERROR;
        }
        if event.is_interrupt() {
            ready |= Interest::HUP;
        }
        ready
    }

    fn rearm(&self, token: Token, info: &RegistrationInfo) -> io::Result<()> {
        // SAFETY: `raw_fd` stays open while its token is registered.
        let fd = unsafe { BorrowedFd::borrow_raw(info.raw_fd) };
        self.poller
            .modify(fd, Self::interest_to_poll_event(token, info.interest))
    }
}

impl Reactor for EpollReactor {
    fn register(&self, source: &dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        let raw_fd = source.raw_fd();
        let mut regs = self.registrations.lock();
        if regs.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }
        // SAFETY: the owner deregisters `token` before closing `raw_fd`.
        unsafe {
            self.poller
                .add(raw_fd, Self::interest_to_poll_event(token, interest))?;
        }
        regs.insert(token, RegistrationInfo { raw_fd, interest });
        Ok(())
    }

    fn modify(&self, token: Token, interest: Interest) -> io::Result<()> {
        let mut regs = self.registrations.lock();
        let info = regs
            .get_mut(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        info.interest = interest;
        self.rearm(token, info)
    }

    fn deregister(&self, token: Token) -> io::Result<()> {
        let info = self
            .registrations
            .lock()
            .remove(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        // SAFETY: the descriptor is still open; the owner closes it after this call.
        let fd = unsafe { BorrowedFd::borrow_raw(info.raw_fd) };
        self.poller.delete(fd)
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        let mut scratch = self.scratch.lock();
        scratch.clear();

        match self.poller.wait(&mut scratch, timeout) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }

        let regs = self.registrations.lock();
        let mut count = 0;
        for poll_event in scratch.iter() {
            let token = Token(poll_event.key);
            // Stale readiness for a token deregistered during this wait.
            let Some(info) = regs.get(&token) else {
                continue;
            };
            self.rearm(token, info)?;
            events.push(Event::new(token, Self::poll_event_to_interest(&poll_event)));
            count += 1;
        }
        Ok(count)
    }

    fn wake(&self) -> io::Result<()> {
        self.poller.notify()
    }

    fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    fn now(&self) -> Time {
        Time::from_duration(self.origin.elapsed())
    }
}

impl std::fmt::Debug for EpollReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg_count = self.registrations.lock().len();
        f.debug_struct("EpollReactor")
            .field("registration_count", &reg_count)
            .finish_non_exhaustive()
    }
}
