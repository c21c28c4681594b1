//! Core value types shared across the client.
//!
//! - [`time`]: Reactor clock instants ([`Time`])

pub mod time;

pub use time::Time;
