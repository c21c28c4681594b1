//! Single-threaded dispatch loop over a [`Reactor`].
//!
//! The loop owns a slab of [`Handler`]s. A handler's slab key is its
//! [`Token`]: the same value it registers its socket under, so a readiness
//! event maps straight to the handler that owns the socket. Every callback
//! receives a [`Context`] for arming timers, reaching the reactor, handing
//! out a cross-thread [`Notifier`], and finishing.
//!
//! One [`turn`](EventLoop::turn):
//!
//! 1. deliver queued cross-thread notices (DNS results),
//! 2. fire due timers,
//! 3. poll the reactor, bounded by the caller's limit and the next deadline,
//! 4. dispatch readiness (error, then readable/hangup, then writable),
//! 5. fire timers and deliver notices that became due while dispatching.
//!
//! Callbacks run to completion and are never re-entered. A handler that
//! calls [`Context::finish`] is removed after its callback returns, and its
//! timers are discarded with it.

use crate::net::dns::DnsError;
use crate::runtime::reactor::{Event, Events, Reactor, Token};
use crate::runtime::timer::{TimerId, TimerSet};
use crate::tracing_compat::trace;
use crate::types::Time;
use slab::Slab;
use smallvec::SmallVec;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

const EVENT_CAPACITY: usize = 1024;

/// Result of an address lookup, as delivered to [`Handler::on_resolved`].
pub type Resolution = Result<Vec<SocketAddr>, DnsError>;

/// Callbacks the loop dispatches to one registered component.
///
/// Only [`on_start`](Handler::on_start) is required. The default
/// [`on_cancel`](Handler::on_cancel) finishes the handler.
pub trait Handler {
    /// Called once, synchronously, from [`EventLoop::insert`].
    fn on_start(&mut self, cx: &mut Context<'_>);

    /// The handler's socket is readable or the peer hung up.
    fn on_readable(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// The handler's socket is writable.
    fn on_writable(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// The reactor reported an error condition on the handler's socket.
    fn on_error(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// Timer `id` expired.
    fn on_timeout(&mut self, cx: &mut Context<'_>, id: TimerId) {
        let _ = (cx, id);
    }

    /// A lookup started through [`Context::notifier`] completed.
    fn on_resolved(&mut self, cx: &mut Context<'_>, result: Resolution) {
        let _ = (cx, result);
    }

    /// [`EventLoop::cancel`] was called for this handler.
    fn on_cancel(&mut self, cx: &mut Context<'_>) {
        cx.finish();
    }
}

enum Notice {
    Resolved(Resolution),
}

struct Delivery {
    token: Token,
    serial: u64,
    notice: Notice,
}

struct Slot {
    serial: u64,
    handler: Option<Box<dyn Handler>>,
}

/// Per-callback access to the loop.
pub struct Context<'a> {
    token: Token,
    serial: u64,
    reactor: &'a Arc<dyn Reactor>,
    timers: &'a mut TimerSet,
    notices: &'a Sender<Delivery>,
    finished: bool,
}

impl Context<'_> {
    /// The handler's token; register its socket under this value.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The reactor's current instant.
    #[must_use]
    pub fn now(&self) -> Time {
        self.reactor.now()
    }

    /// The loop's reactor.
    #[must_use]
    pub fn reactor(&self) -> &Arc<dyn Reactor> {
        self.reactor
    }

    /// Arms timer `id` to fire `after` from now, replacing any earlier deadline.
    pub fn set_timer(&mut self, id: TimerId, after: Duration) {
        let deadline = self.reactor.now() + after;
        self.timers.arm(self.token, id, deadline);
    }

    /// Disarms timer `id`. Returns true if it was armed.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(self.token, id)
    }

    /// Returns true if timer `id` is armed.
    #[must_use]
    pub fn timer_armed(&self, id: TimerId) -> bool {
        self.timers.is_armed(self.token, id)
    }

    /// A handle other threads use to deliver results to this handler.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        Notifier {
            token: self.token,
            serial: self.serial,
            notices: self.notices.clone(),
            reactor: Arc::clone(self.reactor),
        }
    }

    /// Removes the handler once the current callback returns.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Returns true if [`finish`](Self::finish) was called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Sends a completion back to one handler from any thread.
///
/// Deliveries to a handler that has finished in the meantime are dropped,
/// even if its token was handed to a newer handler.
#[derive(Clone)]
pub struct Notifier {
    token: Token,
    serial: u64,
    notices: Sender<Delivery>,
    reactor: Arc<dyn Reactor>,
}

impl Notifier {
    /// Token of the handler this notifier delivers to.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Delivers a lookup result and wakes the loop.
    ///
    /// Returns false if the loop no longer exists.
    pub fn resolved(self, result: Resolution) -> bool {
        let delivery = Delivery {
            token: self.token,
            serial: self.serial,
            notice: Notice::Resolved(result),
        };
        if self.notices.send(delivery).is_err() {
            return false;
        }
        // A failed wake only delays delivery to the next poll.
        let _ = self.reactor.wake();
        true
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("token", &self.token)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

/// Stops a running [`EventLoop`] from any thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    reactor: Arc<dyn Reactor>,
}

impl StopHandle {
    /// Requests that [`EventLoop::run`] return after the current turn.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.reactor.wake();
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.flag.load(Ordering::SeqCst))
            .finish()
    }
}

/// The dispatch loop.
pub struct EventLoop {
    reactor: Arc<dyn Reactor>,
    slots: Slab<Slot>,
    timers: TimerSet,
    notices_tx: Sender<Delivery>,
    notices_rx: Receiver<Delivery>,
    events: Events,
    next_serial: u64,
    stop: Arc<AtomicBool>,
}

impl EventLoop {
    /// Creates a loop over `reactor`.
    #[must_use]
    pub fn new(reactor: Arc<dyn Reactor>) -> Self {
        let (notices_tx, notices_rx) = mpsc::channel();
        Self {
            reactor,
            slots: Slab::new(),
            timers: TimerSet::new(),
            notices_tx,
            notices_rx,
            events: Events::with_capacity(EVENT_CAPACITY),
            next_serial: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The loop's reactor.
    #[must_use]
    pub fn reactor(&self) -> &Arc<dyn Reactor> {
        &self.reactor
    }

    /// The reactor's current instant.
    #[must_use]
    pub fn now(&self) -> Time {
        self.reactor.now()
    }

    /// Number of live handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if `token` names a live handler.
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        self.slots.contains(token.0)
    }

    /// A handle that stops [`run`](Self::run) from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
            reactor: Arc::clone(&self.reactor),
        }
    }

    /// Adds a handler and runs its [`on_start`](Handler::on_start).
    ///
    /// The handler may finish inside `on_start`; the token is still returned.
    pub fn insert(&mut self, handler: Box<dyn Handler>) -> Token {
        let serial = self.next_serial;
        self.next_serial += 1;
        let token = Token(self.slots.insert(Slot {
            serial,
            handler: Some(handler),
        }));
        trace!(token = token.0, serial, "handler inserted");
        self.dispatch(token, |handler, cx| handler.on_start(cx));
        token
    }

    /// Cancels a live handler through its [`on_cancel`](Handler::on_cancel).
    ///
    /// Returns false if `token` names no live handler.
    pub fn cancel(&mut self, token: Token) -> bool {
        if !self.slots.contains(token.0) {
            return false;
        }
        self.dispatch(token, |handler, cx| handler.on_cancel(cx));
        true
    }

    /// Runs until no handler remains or [`StopHandle::stop`] is called.
    pub fn run(&mut self) -> io::Result<()> {
        while !self.slots.is_empty() {
            if self.stop.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            self.turn(None)?;
        }
        Ok(())
    }

    /// Runs one iteration, blocking at most `max_wait` (`None`: until the
    /// next deadline or readiness).
    ///
    /// Returns the number of callbacks dispatched.
    pub fn turn(&mut self, max_wait: Option<Duration>) -> io::Result<usize> {
        let mut dispatched = self.deliver_notices();
        dispatched += self.fire_timers();

        let wait = if dispatched > 0 {
            Some(Duration::ZERO)
        } else {
            let now = self.reactor.now();
            match self.timers.next_deadline() {
                Some(deadline) => {
                    let until = deadline.duration_since(now);
                    Some(max_wait.map_or(until, |limit| limit.min(until)))
                }
                None => max_wait,
            }
        };

        self.reactor.poll(&mut self.events, wait)?;
        let ready: SmallVec<[Event; 64]> = self.events.iter().copied().collect();
        for event in ready {
            dispatched += self.dispatch_event(event);
        }

        dispatched += self.fire_timers();
        dispatched += self.deliver_notices();
        Ok(dispatched)
    }

    fn dispatch_event(&mut self, event: Event) -> usize {
        let token = event.token;
        if event.is_error() {
            return usize::from(self.dispatch(token, |handler, cx| handler.on_error(cx)));
        }
        let mut count = 0;
        if event.is_readable() || event.is_hangup() {
            count += usize::from(self.dispatch(token, |handler, cx| handler.on_readable(cx)));
        }
        if event.is_writable() {
            count += usize::from(self.dispatch(token, |handler, cx| handler.on_writable(cx)));
        }
        count
    }

    fn fire_timers(&mut self) -> usize {
        let now = self.reactor.now();
        let mut count = 0;
        for (token, id) in self.timers.pop_expired(now) {
            trace!(token = token.0, timer = id.0, "timer fired");
            count += usize::from(self.dispatch(token, |handler, cx| handler.on_timeout(cx, id)));
        }
        count
    }

    fn deliver_notices(&mut self) -> usize {
        let mut count = 0;
        while let Ok(delivery) = self.notices_rx.try_recv() {
            let live = self
                .slots
                .get(delivery.token.0)
                .is_some_and(|slot| slot.serial == delivery.serial);
            if !live {
                trace!(token = delivery.token.0, "dropping notice for finished handler");
                continue;
            }
            let Notice::Resolved(result) = delivery.notice;
            count += usize::from(
                self.dispatch(delivery.token, move |handler, cx| {
                    handler.on_resolved(cx, result);
                }),
            );
        }
        count
    }

    /// Runs one callback for `token`; returns false if no live handler.
    fn dispatch<F>(&mut self, token: Token, f: F) -> bool
    where
        F: FnOnce(&mut dyn Handler, &mut Context<'_>),
    {
        let Some(slot) = self.slots.get_mut(token.0) else {
            return false;
        };
        let Some(mut handler) = slot.handler.take() else {
            return false;
        };
        let serial = slot.serial;

        let mut cx = Context {
            token,
            serial,
            reactor: &self.reactor,
            timers: &mut self.timers,
            notices: &self.notices_tx,
            finished: false,
        };
        f(handler.as_mut(), &mut cx);
        let finished = cx.finished;

        if finished {
            self.timers.cancel_all(token);
            self.slots.remove(token.0);
            trace!(token = token.0, "handler finished");
        } else if let Some(slot) = self.slots.get_mut(token.0) {
            slot.handler = Some(handler);
        }
        true
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("handlers", &self.slots.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}
