use std::os::fd::RawFd;

/// Readiness directions a descriptor is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    /// Returns `true` when neither direction is wanted.
    pub(crate) fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// Interrupts a blocked poller from another thread.
///
/// Wraps the descriptor the platform poller listens on for wake-ups
/// (an `eventfd` on Linux, the kqueue itself on BSD systems).
pub(crate) struct Waker(pub(crate) RawFd);
