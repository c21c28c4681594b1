//! Readiness reactor, timers, and the single-threaded dispatch loop.
//!
//! - [`reactor`]: the [`Reactor`] trait with epoll and lab backends
//! - [`timer`]: per-handler deadlines ([`TimerSet`], [`TimerId`])
//! - [`event_loop`]: the [`EventLoop`] that dispatches readiness, timers, and
//!   cross-thread notices to [`Handler`]s

pub mod event_loop;
pub mod reactor;
pub mod timer;

pub use event_loop::{Context, EventLoop, Handler, Notifier, Resolution, StopHandle};
#[cfg(unix)]
pub use reactor::EpollReactor;
pub use reactor::{Event, Events, Interest, LabReactor, Reactor, Source, Token};
pub use timer::{TimerId, TimerSet};
