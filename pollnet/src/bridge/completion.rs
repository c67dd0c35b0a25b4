use super::ConnectionHandle;
use crate::error::Error;

use bytes::Bytes;

/// What a [`Completion`] reports.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionKind {
    /// A listener accepted a new connection.
    Accepted = 1,

    /// A previously issued operation finished, successfully or not.
    Completed = 2,
}

/// One record handed to the polling caller.
///
/// A completion is produced exactly once per issued connect, write,
/// read and timer, and once per connection accepted by a listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub kind: CompletionKind,

    /// The id passed when the operation was issued, or the listener's
    /// bound port for [`CompletionKind::Accepted`].
    pub correlation_id: i32,

    /// The connection the event concerns.
    ///
    /// `None` when the operation failed, and for timers.
    pub subject: Option<ConnectionHandle>,

    /// Received bytes for reads, the error text for failures, empty
    /// otherwise.
    pub payload: Bytes,
}

impl Completion {
    pub fn new(
        kind: CompletionKind,
        correlation_id: i32,
        subject: Option<ConnectionHandle>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            correlation_id,
            subject,
            payload: payload.into(),
        }
    }

    pub(crate) fn accepted(port: u16, connection: ConnectionHandle) -> Self {
        Self::new(
            CompletionKind::Accepted,
            port as i32,
            Some(connection),
            Bytes::new(),
        )
    }

    pub(crate) fn succeeded(id: i32, subject: Option<ConnectionHandle>, payload: Bytes) -> Self {
        Self::new(CompletionKind::Completed, id, subject, payload)
    }

    pub(crate) fn failed(id: i32, error: &Error) -> Self {
        Self::new(CompletionKind::Completed, id, None, error.to_string())
    }

    /// Returns `true` for a completed operation that carries no subject,
    /// i.e. a failure or a fired timer.
    pub fn is_detached(&self) -> bool {
        self.subject.is_none()
    }

    /// The payload as text, replacing invalid UTF-8.
    ///
    /// Mostly useful for failure descriptions.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
