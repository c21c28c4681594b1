//! Timer heap for per-handler deadlines.
//!
//! Each handler owns a small set of named timers ([`TimerId`]). Arming a
//! timer pushes a `(deadline, token, id, generation)` entry onto a min-heap
//! and records the generation as current; re-arming or cancelling only
//! changes the record, and stale heap entries are skipped when popped.

use crate::runtime::reactor::Token;
use crate::types::Time;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Names one of a handler's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u32);

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    token: Token,
    id: TimerId,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Armed timers for all handlers of one event loop.
#[derive(Debug, Default)]
pub struct TimerSet {
    heap: BinaryHeap<TimerEntry>,
    armed: HashMap<(Token, TimerId), u64>,
    next_generation: u64,
}

impl TimerSet {
    /// Creates an empty timer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Returns true if no timer is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Arms (or re-arms) `id` for `token` at `deadline`.
    pub fn arm(&mut self, token: Token, id: TimerId, deadline: Time) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.armed.insert((token, id), generation);
        self.heap.push(TimerEntry {
            deadline,
            token,
            id,
            generation,
        });
    }

    /// Disarms `id` for `token`. Returns true if it was armed.
    pub fn cancel(&mut self, token: Token, id: TimerId) -> bool {
        self.armed.remove(&(token, id)).is_some()
    }

    /// Disarms every timer of `token`.
    pub fn cancel_all(&mut self, token: Token) {
        self.armed.retain(|(owner, _), _| *owner != token);
    }

    /// Returns true if `id` is armed for `token`.
    #[must_use]
    pub fn is_armed(&self, token: Token, id: TimerId) -> bool {
        self.armed.contains_key(&(token, id))
    }

    /// Earliest live deadline, discarding stale entries on the way.
    pub fn next_deadline(&mut self) -> Option<Time> {
        self.discard_stale();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops every live timer whose deadline is `<= now`, disarming it.
    pub fn pop_expired(&mut self, now: Time) -> Vec<(Token, TimerId)> {
        let mut expired = Vec::new();
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(entry) if entry.deadline <= now => {}
                _ => break,
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            self.armed.remove(&(entry.token, entry.id));
            expired.push((entry.token, entry.id));
        }
        expired
    }

    fn discard_stale(&mut self) {
        while let Some(entry) = self.heap.peek() {
            let live = self.armed.get(&(entry.token, entry.id)) == Some(&entry.generation);
            if live {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: TimerId = TimerId(0);
    const B: TimerId = TimerId(1);

    #[test]
    fn empty_set_has_no_deadline() {
        let mut timers = TimerSet::new();
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn pop_expired_returns_due_timers_in_deadline_order() {
        let mut timers = TimerSet::new();
        timers.arm(Token(1), A, Time::from_millis(100));
        timers.arm(Token(2), A, Time::from_millis(200));
        timers.arm(Token(3), B, Time::from_millis(50));

        let expired = timers.pop_expired(Time::from_millis(125));
        assert_eq!(expired, vec![(Token(3), B), (Token(1), A)]);
        assert_eq!(timers.next_deadline(), Some(Time::from_millis(200)));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn rearm_replaces_previous_deadline() {
        let mut timers = TimerSet::new();
        timers.arm(Token(1), A, Time::from_millis(10));
        timers.arm(Token(1), A, Time::from_millis(30));

        assert!(timers.pop_expired(Time::from_millis(20)).is_empty());
        assert_eq!(timers.next_deadline(), Some(Time::from_millis(30)));
        assert_eq!(timers.pop_expired(Time::from_millis(30)), vec![(Token(1), A)]);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut timers = TimerSet::new();
        timers.arm(Token(1), A, Time::from_millis(10));
        timers.arm(Token(1), B, Time::from_millis(20));
        timers.arm(Token(2), A, Time::from_millis(30));

        assert!(timers.cancel(Token(1), A));
        assert!(!timers.cancel(Token(1), A));
        timers.cancel_all(Token(1));
        assert!(!timers.is_armed(Token(1), B));

        assert_eq!(timers.next_deadline(), Some(Time::from_millis(30)));
        assert_eq!(timers.pop_expired(Time::MAX), vec![(Token(2), A)]);
        assert!(timers.is_empty());
    }
}
