use std::io;

/// Errors produced by the bridge.
///
/// Failures that happen before anything is armed (binding a listener,
/// initialising the bridge) are returned directly. Every other failure
/// travels through the event queue: its [`Display`](std::fmt::Display)
/// text becomes the payload of a completion with no subject.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operating system error.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream before the read was satisfied.
    #[error("end of file")]
    Eof,

    /// The operation was aborted because its owner was closed or destroyed.
    #[error("operation canceled")]
    Canceled,

    /// An operation was issued on a connection that is no longer open.
    #[error("socket is not connected")]
    NotConnected,

    /// A read or write is already in flight in the same direction.
    #[error("operation already in progress")]
    InProgress,

    /// The handle does not refer to a live object.
    #[error("stale or unknown handle")]
    StaleHandle,

    /// The bind or connect address could not be parsed.
    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    /// Name resolution returned no usable endpoint.
    #[error("could not resolve `{host}:{port}`")]
    Resolve { host: String, port: u16 },

    /// A raw socket address used an address family other than IPv4/IPv6.
    #[error("unsupported address family {0}")]
    UnsupportedFamily(i32),

    /// The process-wide bridge was used before it was initialised.
    #[error("bridge is not initialised")]
    Uninitialised,
}

/// A `Result` alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
