//! Interest flags for I/O readiness.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Interest flags indicating what I/O events to monitor.
///
/// `ERROR` and `HUP` are always reported by the epoll backend; they exist as
/// flags so readiness reports can carry them alongside read/write readiness.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    /// No interest.
    pub const NONE: Self = Self(0);
    /// Interest in readable events.
    pub const READABLE: Self = Self(0b0001);
    /// Interest in writable events.
    pub const WRITABLE: Self = Self(0b0010);
    /// Error condition on the handle.
    pub const ERROR: Self = Self(0b0100);
    /// Peer hung up.
    pub const HUP: Self = Self(0b1000);

    /// Returns interest in readable events.
    pub const fn readable() -> Self {
        Self::READABLE
    }

    /// Returns interest in writable events.
    pub const fn writable() -> Self {
        Self::WRITABLE
    }

    /// Returns interest in both readable and writable events.
    pub const fn both() -> Self {
        Self(Self::READABLE.0 | Self::WRITABLE.0)
    }

    /// Returns true if readable interest is set.
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns true if writable interest is set.
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Returns true if the error flag is set.
    pub const fn is_error(self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    /// Returns true if the hangup flag is set.
    pub const fn is_hup(self) -> bool {
        self.0 & Self::HUP.0 != 0
    }

    /// Returns true if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Combines interests.
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Removes interest.
    #[must_use]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.add(rhs)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.add(rhs);
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READABLE, "READABLE"),
            (Self::WRITABLE, "WRITABLE"),
            (Self::ERROR, "ERROR"),
            (Self::HUP, "HUP"),
        ];
        let mut first = true;
        f.write_str("Interest(")?;
        for (flag, name) in names {
            if self.0 & flag.0 != 0 {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_remove() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert_eq!(both, Interest::both());
        assert!(both.is_readable() && both.is_writable());

        let read_only = both.remove(Interest::WRITABLE);
        assert!(read_only.is_readable());
        assert!(!read_only.is_writable());
        assert!(read_only.remove(Interest::READABLE).is_empty());
    }

    #[test]
    fn debug_lists_flags() {
        let flags = Interest::READABLE | Interest::HUP;
        assert_eq!(format!("{flags:?}"), "Interest(READABLE | HUP)");
        assert_eq!(format!("{:?}", Interest::NONE), "Interest(NONE)");
    }
}
