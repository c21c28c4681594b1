//! Source trait for registerable I/O objects.

use std::os::fd::{AsRawFd, RawFd};

/// An I/O object that can be registered with a reactor.
///
/// Any type that implements `AsRawFd + Send + Sync` implements this trait
/// through a blanket implementation.
///
/// Callers must keep the descriptor open until its token is deregistered.
pub trait Source: AsRawFd + Send + Sync {
    /// Returns the raw file descriptor for this source.
    fn raw_fd(&self) -> RawFd {
        self.as_raw_fd()
    }
}

impl<T: AsRawFd + Send + Sync> Source for T {}
