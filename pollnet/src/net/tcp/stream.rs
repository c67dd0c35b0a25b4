use crate::error::Error;
use crate::reactor::poller::Interest;
use crate::reactor::poller::platform::{
    domain_of, sys_close, sys_connect, sys_get_socket_error, sys_ipv6_is_necessary, sys_read,
    sys_send, sys_set_reuseaddr, sys_socket,
};

use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Lifecycle of a connection.
///
/// ```text
/// Connecting ──► Open ──► Closed
///      │
///      └──────► Failed
/// ```
///
/// Accepted connections start directly in `Open`. Any read or write
/// failure, and any explicit close, moves an open connection to `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

/// A pending read.
pub(crate) enum ReadOp {
    /// Completes once `buffer` is full.
    Exact {
        id: i32,
        buffer: BytesMut,
        filled: usize,
    },

    /// Completes with whatever the next successful read returns.
    BestEffort { id: i32 },
}

impl ReadOp {
    pub(crate) fn exact(id: i32, size: usize) -> Self {
        ReadOp::Exact {
            id,
            buffer: BytesMut::zeroed(size),
            filled: 0,
        }
    }

    /// Returns `true` for a read that has nothing to wait for.
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, ReadOp::Exact { buffer, .. } if buffer.is_empty())
    }

    pub(crate) fn id(&self) -> i32 {
        match self {
            ReadOp::Exact { id, .. } | ReadOp::BestEffort { id } => *id,
        }
    }

    /// The outcome reported when the read is aborted before completing.
    fn abort(self, error: Error) -> Outcome {
        match self {
            ReadOp::Exact { .. } => Outcome::Failed(error),
            ReadOp::BestEffort { .. } => Outcome::Truncated(Bytes::new(), error),
        }
    }
}

/// A pending write of a whole buffer.
pub(crate) struct WriteOp {
    pub(crate) id: i32,
    data: Bytes,
    written: usize,
}

impl WriteOp {
    pub(crate) fn new(id: i32, data: Bytes) -> Self {
        Self {
            id,
            data,
            written: 0,
        }
    }
}

/// Result of driving one pending operation.
pub(crate) enum Outcome {
    /// The socket would block; the operation stays armed.
    Pending,

    /// The operation completed with the given payload.
    Done(Bytes),

    /// The operation failed.
    Failed(Error),

    /// A best-effort read failed; carries the bytes received before the fault.
    Truncated(Bytes, Error),
}

/// One TCP socket and the operations pending on it.
///
/// At most one connect, one read and one write may be pending at a
/// time. The reactor owns the connection; callers refer to it through
/// a [`ConnectionHandle`](crate::ConnectionHandle).
pub(crate) struct Connection {
    /// The socket, `None` once closed or if it was never created.
    pub(crate) fd: Option<RawFd>,

    pub(crate) state: ConnectionState,

    /// Correlation id of the pending connect.
    pub(crate) connect: Option<i32>,

    pub(crate) read: Option<ReadOp>,

    pub(crate) write: Option<WriteOp>,

    /// Interest currently registered with the poller.
    pub(crate) registered: Interest,

    /// Set once the caller destroyed its handle.
    pub(crate) released: bool,
}

impl Connection {
    fn new(fd: Option<RawFd>, state: ConnectionState, connect: Option<i32>) -> Self {
        Self {
            fd,
            state,
            connect,
            read: None,
            write: None,
            registered: Interest::NONE,
            released: false,
        }
    }

    /// Wraps an accepted socket.
    pub(crate) fn open(fd: RawFd) -> Self {
        Self::new(Some(fd), ConnectionState::Open, None)
    }

    /// Wraps a socket whose non-blocking connect is in flight.
    pub(crate) fn connecting(fd: RawFd, id: i32) -> Self {
        Self::new(Some(fd), ConnectionState::Connecting, Some(id))
    }

    /// A connection that failed before a socket existed.
    pub(crate) fn failed() -> Self {
        Self::new(None, ConnectionState::Failed, None)
    }

    /// Readiness directions the pending operations need.
    ///
    /// Reads issued while connecting wait for the handshake first.
    pub(crate) fn interest(&self) -> Interest {
        Interest {
            read: self.read.is_some() && self.state != ConnectionState::Connecting,
            write: self.write.is_some() || self.connect.is_some(),
        }
    }

    /// Number of operations still waiting for completion.
    pub(crate) fn pending(&self) -> usize {
        [self.connect.is_some(), self.read.is_some(), self.write.is_some()]
            .into_iter()
            .filter(|pending| *pending)
            .count()
    }

    /// Drives the pending connect, if any.
    ///
    /// Called when the socket reports writability; `SO_ERROR` tells
    /// whether the handshake succeeded.
    pub(crate) fn poll_connect(&mut self) -> Option<(i32, Outcome)> {
        let id = self.connect.take()?;

        let Some(fd) = self.fd else {
            return Some((id, Outcome::Failed(Error::Canceled)));
        };

        match sys_get_socket_error(fd) {
            Ok(()) => {
                self.state = ConnectionState::Open;
                Some((id, Outcome::Done(Bytes::new())))
            }
            Err(err) => {
                self.state = ConnectionState::Failed;
                Some((id, Outcome::Failed(err.into())))
            }
        }
    }

    /// Drives the pending read, if any.
    ///
    /// `scratch` is the reactor-wide buffer best-effort reads land in;
    /// its length is the best-effort ceiling.
    pub(crate) fn poll_read(&mut self, scratch: &mut [u8]) -> Option<(i32, Outcome)> {
        let Some(fd) = self.fd else {
            let op = self.read.take()?;
            return Some((op.id(), op.abort(Error::Canceled)));
        };

        if self.state == ConnectionState::Connecting {
            return None;
        }

        let op = self.read.as_mut()?;
        let id = op.id();

        let outcome = match op {
            ReadOp::Exact { buffer, filled, .. } => read_exact(fd, buffer, filled),
            ReadOp::BestEffort { .. } => read_best_effort(fd, scratch),
        };

        if !matches!(outcome, Outcome::Pending) {
            self.read = None;
        }

        Some((id, outcome))
    }

    /// Drives the pending write, if any.
    pub(crate) fn poll_write(&mut self) -> Option<(i32, Outcome)> {
        let op = self.write.as_mut()?;
        let id = op.id;

        let outcome = match self.fd {
            None => Outcome::Failed(Error::Canceled),
            Some(fd) => write_all(fd, op),
        };

        if !matches!(outcome, Outcome::Pending) {
            self.write = None;
        }

        Some((id, outcome))
    }
}

impl Drop for Connection {
    /// Closes the socket if it is still open.
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            sys_close(fd);
        }
    }
}

/// Creates a socket and starts a non-blocking connect to `address`.
///
/// Returns the socket once the connect is in flight (or, on loopback,
/// already done); completion is observed through writability.
pub(crate) fn start_connect(address: &SocketAddr) -> io::Result<RawFd> {
    let domain = domain_of(address);
    let fd = sys_socket(domain)?;

    let result = sys_set_reuseaddr(fd)
        .and_then(|()| sys_ipv6_is_necessary(fd, domain))
        .and_then(|()| sys_connect(fd, address));

    match result {
        Ok(()) => Ok(fd),
        Err(err)
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EINPROGRESS) =>
        {
            Ok(fd)
        }
        Err(err) => {
            sys_close(fd);
            Err(err)
        }
    }
}

/// Reads until `buffer` is full, `filled` tracking progress across calls.
fn read_exact(fd: RawFd, buffer: &mut BytesMut, filled: &mut usize) -> Outcome {
    while *filled < buffer.len() {
        let n = sys_read(fd, &mut buffer[*filled..]);

        match n {
            1.. => *filled += n as usize,
            0 => return Outcome::Failed(Error::Eof),
            _ => {
                let err = io::Error::last_os_error();

                match err.kind() {
                    io::ErrorKind::WouldBlock => return Outcome::Pending,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Outcome::Failed(err.into()),
                }
            }
        }
    }

    Outcome::Done(std::mem::take(buffer).freeze())
}

/// Performs a single read of whatever is available.
fn read_best_effort(fd: RawFd, scratch: &mut [u8]) -> Outcome {
    loop {
        let n = sys_read(fd, scratch);

        match n {
            1.. => return Outcome::Done(Bytes::copy_from_slice(&scratch[..n as usize])),
            0 => return Outcome::Truncated(Bytes::new(), Error::Eof),
            _ => {
                let err = io::Error::last_os_error();

                match err.kind() {
                    io::ErrorKind::WouldBlock => return Outcome::Pending,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Outcome::Truncated(Bytes::new(), err.into()),
                }
            }
        }
    }
}

/// Writes the rest of `op`, retrying partial writes.
fn write_all(fd: RawFd, op: &mut WriteOp) -> Outcome {
    while op.written < op.data.len() {
        let n = sys_send(fd, &op.data[op.written..]);

        if n > 0 {
            op.written += n as usize;
            continue;
        }

        if n == 0 {
            return Outcome::Failed(io::Error::from(io::ErrorKind::WriteZero).into());
        }

        let err = io::Error::last_os_error();

        match err.kind() {
            io::ErrorKind::WouldBlock => return Outcome::Pending,
            io::ErrorKind::Interrupted => continue,
            _ => return Outcome::Failed(err.into()),
        }
    }

    Outcome::Done(Bytes::new())
}
