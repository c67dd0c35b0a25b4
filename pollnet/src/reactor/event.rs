/// An I/O event reported by the poller.
///
/// An `Event` represents readiness information for a registered
/// socket. It is produced by the poller and turned by the reactor
/// into one ready item per direction.
pub(crate) struct Event {
    /// Token the socket was registered under.
    ///
    /// This is the raw form of the arena handle of the owning
    /// connection or listener.
    pub(crate) token: u64,

    /// Indicates that the socket is readable (or failed).
    pub(crate) readable: bool,

    /// Indicates that the socket is writable (or failed).
    pub(crate) writable: bool,
}
