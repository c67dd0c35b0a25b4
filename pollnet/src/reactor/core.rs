use super::event::Event;
use super::io::{Entry, Ready};
use super::poller::platform::{sys_close, sys_original_dst};
use super::poller::{Interest, Poller};
use super::timer::{Timer, TimerEntry};
use crate::bridge::{Completion, CompletionKind, ConnectionHandle, EventQueue};
use crate::error::{Error, Result};
use crate::net::ConnectionState;
use crate::net::tcp::listener::Listener;
use crate::net::tcp::stream::{Connection, Outcome, ReadOp, WriteOp, start_connect};
use crate::utils::{Arena, Handle};

use bytes::Bytes;
use std::collections::{BinaryHeap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// The reactor.
///
/// The reactor owns every connection, listener and timer, and is
/// responsible for:
/// - keeping poller registrations in line with pending operations,
/// - turning readiness and timer expiry into ready items,
/// - dispatching ready items into completions on the event queue.
///
/// It never blocks: waiting on the poller is left to the
/// [`Bridge`](crate::Bridge), which releases the reactor lock while
/// it waits so other threads can keep arming operations.
pub(crate) struct Reactor {
    /// Platform-specific poller (epoll, kqueue).
    poller: Arc<Poller>,

    /// Arena storing live objects, indexed by the handles handed out.
    entries: Arena<Entry>,

    /// Work waiting to be dispatched, in arrival order.
    ready: VecDeque<Ready>,

    /// Min-heap of pending timers ordered by deadline.
    timers: BinaryHeap<TimerEntry>,

    /// Arming counter for timers.
    next_seq: u64,

    /// Landing buffer for best-effort reads.
    scratch: Vec<u8>,

    /// Completions waiting for the caller.
    pub(crate) queue: EventQueue,

    /// Backlog passed to new listeners.
    backlog: i32,
}

impl Reactor {
    /// Creates a new reactor instance.
    pub(crate) fn new(
        poller: Arc<Poller>,
        queue: EventQueue,
        read_some_limit: usize,
        backlog: i32,
    ) -> Self {
        Self {
            poller,
            entries: Arena::new(64),
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            next_seq: 0,
            scratch: vec![0; read_some_limit],
            queue,
            backlog,
        }
    }

    /// Binds a listener and arms it for accepts.
    pub(crate) fn listen(&mut self, address: &str, port: u16) -> Result<Handle> {
        let listener = Listener::bind(address, port, self.backlog)?;
        let (fd, local) = (listener.fd, listener.local_addr());

        let handle = self.entries.insert(Entry::Listener(listener));

        if let Err(err) = self.poller.register(fd, handle.into_raw(), Interest::READ) {
            self.entries.remove(handle);
            return Err(err.into());
        }

        debug!(%local, "listening");
        Ok(handle)
    }

    /// Closes a listener. No event is emitted for its accept.
    pub(crate) fn destroy_listener(&mut self, handle: Handle) {
        if !matches!(self.entries.get(handle), Some(Entry::Listener(_))) {
            return;
        }

        if let Some(Entry::Listener(listener)) = self.entries.remove(handle) {
            self.poller.deregister(listener.fd);
            debug!(local = %listener.local_addr(), "listener closed");
        }
    }

    pub(crate) fn listener_addr(&self, handle: Handle) -> Option<SocketAddr> {
        match self.entries.get(handle) {
            Some(Entry::Listener(listener)) => Some(listener.local_addr()),
            _ => None,
        }
    }

    /// Starts an outbound connection.
    ///
    /// Always returns a handle; a connect that cannot even start fails
    /// through the queue like any other.
    pub(crate) fn connect(&mut self, address: SocketAddr, id: i32) -> Handle {
        match start_connect(&address) {
            Ok(fd) => {
                let handle = self
                    .entries
                    .insert(Entry::Connection(Connection::connecting(fd, id)));
                trace!(%address, id, "connecting");
                self.sync_interest(handle);
                handle
            }
            Err(err) => self.connect_failed(id, err.into()),
        }
    }

    /// Creates a failed connection and queues the failure of its connect.
    pub(crate) fn connect_failed(&mut self, id: i32, error: Error) -> Handle {
        debug!(id, %error, "connect failed before reaching a socket");

        let handle = self
            .entries
            .insert(Entry::Connection(Connection::failed()));
        self.ready.push_back(Ready::Failed { id, error });
        handle
    }

    fn connection(&self, handle: Handle) -> Option<&Connection> {
        match self.entries.get(handle) {
            Some(Entry::Connection(connection)) if !connection.released => Some(connection),
            _ => None,
        }
    }

    fn connection_mut(&mut self, handle: Handle) -> Option<&mut Connection> {
        match self.entries.get_mut(handle) {
            Some(Entry::Connection(connection)) if !connection.released => Some(connection),
            _ => None,
        }
    }

    /// Arms a read on a connection.
    pub(crate) fn read(&mut self, handle: Handle, op: ReadOp) {
        let id = op.id();
        let immediate = op.is_empty();

        let refused = match self.connection_mut(handle) {
            None => Some(Error::StaleHandle),
            Some(connection) if connection.fd.is_none() => Some(Error::NotConnected),
            Some(connection) if connection.read.is_some() => Some(Error::InProgress),
            Some(connection) => {
                connection.read = Some(op);
                None
            }
        };

        if let Some(error) = refused {
            self.ready.push_back(Ready::Failed { id, error });
            return;
        }

        self.sync_interest(handle);

        // Nothing to wait for, complete on the next step.
        if immediate {
            self.ready.push_back(Ready::Readable(handle));
        }
    }

    /// Arms a write of the whole of `data` on a connection.
    pub(crate) fn write(&mut self, handle: Handle, data: Bytes, id: i32) {
        let refused = match self.connection_mut(handle) {
            None => Some(Error::StaleHandle),
            Some(connection) if connection.fd.is_none() => Some(Error::NotConnected),
            Some(connection) if connection.write.is_some() => Some(Error::InProgress),
            Some(connection) => {
                connection.write = Some(WriteOp::new(id, data));
                None
            }
        };

        match refused {
            Some(error) => self.ready.push_back(Ready::Failed { id, error }),
            None => self.sync_interest(handle),
        }
    }

    /// Closes the socket of a connection; pending operations fail.
    pub(crate) fn close(&mut self, handle: Handle) {
        if self.connection(handle).is_some() {
            self.shutdown_connection(handle);
        }
    }

    /// Drops the caller's claim on a connection.
    ///
    /// The socket is closed right away; the entry itself goes once the
    /// aborted operations have reported.
    pub(crate) fn release(&mut self, handle: Handle) {
        let Some(connection) = self.connection_mut(handle) else {
            return;
        };

        connection.released = true;
        self.shutdown_connection(handle);
        self.reap(handle);
    }

    /// Closes the socket and queues an abort for every pending operation.
    fn shutdown_connection(&mut self, handle: Handle) {
        let Some(Entry::Connection(connection)) = self.entries.get_mut(handle) else {
            return;
        };

        if let Some(fd) = connection.fd.take() {
            if !connection.registered.is_empty() {
                self.poller.deregister(fd);
                connection.registered = Interest::NONE;
            }

            sys_close(fd);
        }

        if !matches!(
            connection.state,
            ConnectionState::Failed | ConnectionState::Closed
        ) {
            debug!(from = ?connection.state, "connection closed");
            connection.state = ConnectionState::Closed;
        }

        // One item per pending operation, each dispatch reports one.
        if connection.read.is_some() {
            self.ready.push_back(Ready::Readable(handle));
        }
        if connection.connect.is_some() {
            self.ready.push_back(Ready::Writable(handle));
        }
        if connection.write.is_some() {
            self.ready.push_back(Ready::Writable(handle));
        }
    }

    /// Frees a released connection once nothing is pending on it.
    fn reap(&mut self, handle: Handle) {
        let idle = matches!(
            self.entries.get(handle),
            Some(Entry::Connection(connection)) if connection.released && connection.pending() == 0
        );

        if idle {
            self.entries.remove(handle);
            trace!(handle = handle.into_raw(), "connection freed");
        }
    }

    pub(crate) fn connection_state(&self, handle: Handle) -> Option<ConnectionState> {
        self.connection(handle).map(|connection| connection.state)
    }

    pub(crate) fn original_destination(&self, handle: Handle) -> Option<SocketAddr> {
        self.connection(handle)?.fd.and_then(sys_original_dst)
    }

    /// Arms a one-shot timer.
    pub(crate) fn sleep(&mut self, delay: Duration, id: i32) -> Handle {
        let handle = self.entries.insert(Entry::Timer(Timer {
            id,
            cancelled: false,
        }));

        // A deadline past what `Instant` can represent never fires.
        if let Some(deadline) = Instant::now().checked_add(delay) {
            self.next_seq += 1;
            self.timers.push(TimerEntry {
                deadline,
                seq: self.next_seq,
                handle,
            });
        }

        handle
    }

    /// Fires a timer early with a cancellation failure.
    pub(crate) fn cancel_timer(&mut self, handle: Handle) {
        if let Some(Entry::Timer(timer)) = self.entries.get_mut(handle)
            && !timer.cancelled
        {
            timer.cancelled = true;
            self.ready.push_back(Ready::Expired(handle));
        }
    }

    fn timer_armed(&self, handle: Handle) -> bool {
        matches!(self.entries.get(handle), Some(Entry::Timer(timer)) if !timer.cancelled)
    }

    /// Moves every timer due at `now` to the ready list.
    ///
    /// Returns `true` if anything was moved.
    pub(crate) fn expire_timers(&mut self, now: Instant) -> bool {
        let mut fired = false;

        while let Some(top) = self.timers.peek() {
            if top.deadline > now {
                break;
            }

            let handle = top.handle;
            self.timers.pop();

            if self.timer_armed(handle) {
                self.ready.push_back(Ready::Expired(handle));
                fired = true;
            }
        }

        fired
    }

    /// Time left until the earliest armed timer, if any.
    pub(crate) fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        while let Some(top) = self.timers.peek() {
            if self.timer_armed(top.handle) {
                return Some(top.deadline.saturating_duration_since(now));
            }

            self.timers.pop();
        }

        None
    }

    /// Turns poller events into ready items.
    pub(crate) fn schedule(&mut self, events: impl Iterator<Item = Event>) {
        for event in events {
            let Some(handle) = Handle::from_raw(event.token) else {
                continue;
            };

            if event.readable {
                self.ready.push_back(Ready::Readable(handle));
            }
            if event.writable {
                self.ready.push_back(Ready::Writable(handle));
            }
        }
    }

    /// Dispatches ready items until one of them produces a completion.
    ///
    /// Returns `false` once the ready list ran dry without one.
    pub(crate) fn run_ready(&mut self) -> bool {
        while let Some(item) = self.ready.pop_front() {
            if self.dispatch(item) {
                return true;
            }
        }

        false
    }

    fn dispatch(&mut self, item: Ready) -> bool {
        match item {
            Ready::Readable(handle) => self.on_readable(handle),
            Ready::Writable(handle) => self.on_writable(handle),
            Ready::Expired(handle) => self.on_expired(handle),
            Ready::Failed { id, error } => {
                self.emit(Completion::failed(id, &error));
                true
            }
        }
    }

    fn on_readable(&mut self, handle: Handle) -> bool {
        let result = match self.entries.get_mut(handle) {
            Some(Entry::Listener(_)) => return self.on_accept(handle),
            Some(Entry::Connection(connection)) => connection.poll_read(&mut self.scratch),
            _ => None,
        };

        match result {
            Some((id, outcome)) => self.finish(handle, id, outcome),
            None => false,
        }
    }

    fn on_writable(&mut self, handle: Handle) -> bool {
        let mut read_now = false;

        let result = match self.entries.get_mut(handle) {
            Some(Entry::Connection(connection)) => match connection.poll_connect() {
                Some(connected) => {
                    // An empty read parked behind the handshake has no
                    // readiness to wait for once connected.
                    read_now = connection.state == ConnectionState::Open
                        && connection.read.as_ref().is_some_and(ReadOp::is_empty);
                    Some(connected)
                }
                None => connection.poll_write(),
            },
            _ => None,
        };

        if read_now {
            self.ready.push_back(Ready::Readable(handle));
        }

        match result {
            Some((id, outcome)) => self.finish(handle, id, outcome),
            None => false,
        }
    }

    fn on_expired(&mut self, handle: Handle) -> bool {
        if !matches!(self.entries.get(handle), Some(Entry::Timer(_))) {
            return false;
        }

        let Some(Entry::Timer(timer)) = self.entries.remove(handle) else {
            return false;
        };

        let completion = if timer.cancelled {
            Completion::failed(timer.id, &Error::Canceled)
        } else {
            Completion::succeeded(timer.id, None, Bytes::new())
        };

        self.emit(completion);
        true
    }

    /// Accepts one pending connection.
    ///
    /// The listener is queued again so the rest of the backlog drains
    /// without waiting for another poller round.
    fn on_accept(&mut self, handle: Handle) -> bool {
        let Some(Entry::Listener(listener)) = self.entries.get(handle) else {
            return false;
        };

        let port = listener.port();

        match listener.accept() {
            Ok(Some((fd, peer))) => {
                let connection = self.entries.insert(Entry::Connection(Connection::open(fd)));
                trace!(%peer, port, "accepted");

                self.ready.push_back(Ready::Readable(handle));
                self.emit(Completion::accepted(port, ConnectionHandle(connection)));
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(%err, port, "accept failed");
                false
            }
        }
    }

    /// Reports the outcome of an operation on a connection.
    fn finish(&mut self, handle: Handle, id: i32, outcome: Outcome) -> bool {
        let produced = match outcome {
            Outcome::Pending => false,
            Outcome::Done(payload) => {
                let subject = Some(ConnectionHandle(handle));
                self.emit(Completion::succeeded(id, subject, payload));
                true
            }
            Outcome::Failed(error) => {
                debug!(id, %error, "operation failed");
                self.shutdown_connection(handle);
                self.emit(Completion::failed(id, &error));
                true
            }
            Outcome::Truncated(partial, error) => {
                debug!(id, %error, received = partial.len(), "read failed");
                self.shutdown_connection(handle);
                self.emit(Completion::succeeded(id, None, partial));
                self.emit(Completion::failed(id, &error));
                true
            }
        };

        self.sync_interest(handle);
        self.reap(handle);
        produced
    }

    /// Brings the poller registration of a connection in line with its
    /// pending operations.
    fn sync_interest(&mut self, handle: Handle) {
        let Some(Entry::Connection(connection)) = self.entries.get_mut(handle) else {
            return;
        };

        let Some(fd) = connection.fd else {
            return;
        };

        let wanted = connection.interest();
        let registered = connection.registered;

        if wanted == registered {
            return;
        }

        let token = handle.into_raw();
        let result = match (registered.is_empty(), wanted.is_empty()) {
            (true, _) => self.poller.register(fd, token, wanted),
            (false, true) => {
                self.poller.deregister(fd);
                Ok(())
            }
            (false, false) => self.poller.reregister(fd, token, wanted),
        };

        match result {
            Ok(()) => {
                trace!(fd, ?wanted, "registration updated");
                connection.registered = wanted;
            }
            Err(err) => {
                warn!(fd, %err, "could not register socket, closing it");
                self.shutdown_connection(handle);
            }
        }
    }

    /// Queues a completion.
    ///
    /// An accepted connection whose announcement gets evicted has no
    /// owner left, so it is released on the spot.
    fn emit(&mut self, completion: Completion) {
        let Some(evicted) = self.queue.push(completion) else {
            return;
        };

        if let (CompletionKind::Accepted, Some(connection)) = (evicted.kind, evicted.subject) {
            debug!(port = evicted.correlation_id, "unreported accept dropped");
            self.release(connection.0);
        }
    }

    /// Returns `true` while anything is still due to complete.
    pub(crate) fn has_work(&self) -> bool {
        !self.ready.is_empty() || self.entries.values().any(Entry::has_work)
    }

    /// Number of issued operations that have not completed yet.
    pub(crate) fn pending(&self) -> usize {
        let refused = self
            .ready
            .iter()
            .filter(|item| matches!(item, Ready::Failed { .. }))
            .count();

        let live: usize = self
            .entries
            .values()
            .map(|entry| match entry {
                Entry::Connection(connection) => connection.pending(),
                Entry::Timer(_) => 1,
                Entry::Listener(_) => 0,
            })
            .sum();

        refused + live
    }

    /// Tears everything down.
    ///
    /// Listeners close silently; every pending operation and timer
    /// reports its failure to the queue before the connections go.
    pub(crate) fn shutdown(&mut self) {
        debug!(live = self.entries.len(), "shutting reactor down");

        let handles: Vec<(Handle, bool)> = self
            .entries
            .iter()
            .map(|(handle, entry)| (handle, matches!(entry, Entry::Listener(_))))
            .collect();

        for (handle, listener) in handles {
            if listener {
                self.destroy_listener(handle);
            } else {
                self.cancel_timer(handle);
                self.release(handle);
            }
        }

        while !self.ready.is_empty() {
            self.run_ready();
        }

        self.timers.clear();
        debug!(queued = self.queue.len(), "reactor shut down");
    }
}
