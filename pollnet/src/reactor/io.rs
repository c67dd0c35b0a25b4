use super::timer::Timer;
use crate::error::Error;
use crate::net::tcp::listener::Listener;
use crate::net::tcp::stream::Connection;
use crate::utils::Handle;

/// An object owned by the reactor arena.
///
/// Connections, listeners and timers share one arena so that a single
/// handle space backs both poller tokens and caller handles.
pub(crate) enum Entry {
    Connection(Connection),
    Listener(Listener),
    Timer(Timer),
}

impl Entry {
    /// Returns `true` if the entry keeps the loop from stopping.
    ///
    /// A listener always has an accept armed and a live timer always
    /// has its completion ahead of it.
    pub(crate) fn has_work(&self) -> bool {
        match self {
            Entry::Connection(connection) => connection.pending() > 0,
            Entry::Listener(_) | Entry::Timer(_) => true,
        }
    }
}

/// One unit of work waiting to be dispatched.
///
/// Dispatching an item produces at most one completion, which is what
/// lets the driver stop after exactly one.
pub(crate) enum Ready {
    /// The socket behind the handle reported readability, or a read on
    /// it must be retried or aborted.
    Readable(Handle),

    /// Same as [`Ready::Readable`] for the write direction, which also
    /// carries connect completion.
    Writable(Handle),

    /// A timer expired or was cancelled.
    Expired(Handle),

    /// An operation that failed before reaching a socket.
    Failed { id: i32, error: Error },
}
