//! The loop driver and the records it hands out.
//!
//! A [`Bridge`] owns one reactor and one poller. Operations are armed
//! from any thread through its methods; completions come back one at a
//! time through [`Bridge::poll`].

mod builder;
mod completion;
mod handle;
mod queue;

pub use builder::{BridgeBuilder, Config};
pub use completion::{Completion, CompletionKind};
pub use handle::{ConnectionHandle, ListenerHandle, TimerHandle};
pub use queue::{DEFAULT_QUEUE_CAPACITY, EventQueue};

use crate::error::Result;
use crate::net::{self, ConnectionState};
use crate::net::tcp::stream::ReadOp;
use crate::reactor::poller::{Poller, Waker};
use crate::reactor::{Event, Reactor};

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error};

struct Shared {
    reactor: Mutex<Reactor>,

    poller: Arc<Poller>,

    /// Interrupts a blocked [`Bridge::poll`] when work is armed.
    waker: Arc<Waker>,

    /// Held by the thread driving the poller; also its event buffer.
    driver: Mutex<Vec<Event>>,
}

/// Handle to one completion loop.
///
/// The bridge owns every connection, listener and timer created through
/// it. Operations never block and never fail at the call site: each one
/// produces exactly one [`Completion`], retrieved later with
/// [`poll`](Self::poll). Only constructing a listener can fail
/// synchronously.
///
/// `Bridge` is cheap to clone; clones drive the same loop. Operations
/// may be armed from any thread, including while another thread is
/// blocked in `poll`.
///
/// # Examples
///
/// ```rust,no_run
/// use pollnet::{Bridge, CompletionKind};
/// use std::time::Duration;
///
/// let bridge = Bridge::new().unwrap();
/// let server = bridge.listen("127.0.0.1", 0).unwrap();
/// let port = bridge.listener_addr(server).unwrap().port();
///
/// let client = bridge.connect(([127, 0, 0, 1], port).into(), 1);
///
/// while let Some(event) = bridge.poll(Some(Duration::from_secs(1))) {
///     if event.kind == CompletionKind::Completed && event.correlation_id == 1 {
///         bridge.write(client, &b"ping"[..], 2);
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    /// Creates a bridge with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Returns a builder to configure a new bridge.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        let poller = Arc::new(Poller::new(config.event_capacity)?);
        let waker = poller.waker();

        let reactor = Reactor::new(
            poller.clone(),
            EventQueue::new(config.queue_capacity),
            config.read_some_limit,
            config.listen_backlog,
        );

        debug!(?config, "bridge created");

        Ok(Self {
            shared: Arc::new(Shared {
                reactor: Mutex::new(reactor),
                poller,
                waker,
                driver: Mutex::new(Vec::with_capacity(config.event_capacity)),
            }),
        })
    }

    fn reactor(&self) -> MutexGuard<'_, Reactor> {
        self.shared
            .reactor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the reactor, then wakes the driver so it picks
    /// up whatever `f` armed.
    fn arm<T>(&self, f: impl FnOnce(&mut Reactor) -> T) -> T {
        let result = {
            let mut reactor = self.reactor();
            f(&mut *reactor)
        };

        self.shared.waker.wake();
        result
    }

    /// Binds a listener on `address:port` and starts accepting.
    ///
    /// `address` is a literal IPv4 or IPv6 address. Every accepted
    /// connection yields an [`Accepted`](CompletionKind::Accepted)
    /// completion whose correlation id is the bound port.
    pub fn listen(&self, address: &str, port: u16) -> Result<ListenerHandle> {
        self.arm(|reactor| reactor.listen(address, port))
            .map(ListenerHandle)
    }

    /// Returns the address a listener is bound to.
    pub fn listener_addr(&self, listener: ListenerHandle) -> Option<SocketAddr> {
        self.reactor().listener_addr(listener.0)
    }

    /// Stops accepting and closes the listening socket.
    ///
    /// No completion is produced. Connections already accepted are not
    /// affected.
    pub fn destroy_listener(&self, listener: ListenerHandle) {
        self.arm(|reactor| reactor.destroy_listener(listener.0));
    }

    /// Connects to `address`.
    pub fn connect(&self, address: SocketAddr, id: i32) -> ConnectionHandle {
        ConnectionHandle(self.arm(|reactor| reactor.connect(address, id)))
    }

    /// Connects to `host:port`, resolving `host` if it is not a literal
    /// address.
    ///
    /// Resolution runs on the calling thread, outside the loop. A
    /// failed resolution is reported through the queue.
    pub fn connect_host(
        &self,
        host: &str,
        port: u16,
        id: i32,
        prefer_v6: bool,
    ) -> ConnectionHandle {
        let handle = match net::resolve(host, port, prefer_v6) {
            Ok(address) => self.arm(|reactor| reactor.connect(address, id)),
            Err(err) => self.arm(|reactor| reactor.connect_failed(id, err)),
        };

        ConnectionHandle(handle)
    }

    /// Connects to an address given as `sockaddr_storage`-layout bytes.
    pub fn connect_raw(&self, raw: &[u8], id: i32) -> ConnectionHandle {
        let handle = match net::sockaddr_from_bytes(raw) {
            Ok(address) => self.arm(|reactor| reactor.connect(address, id)),
            Err(err) => self.arm(|reactor| reactor.connect_failed(id, err)),
        };

        ConnectionHandle(handle)
    }

    /// Releases a connection.
    ///
    /// The socket is closed at once. Pending operations still report,
    /// as failures without a subject. The handle is stale afterwards.
    pub fn destroy_connection(&self, connection: ConnectionHandle) {
        self.arm(|reactor| reactor.release(connection.0));
    }

    /// Reads exactly `size` bytes.
    pub fn read(&self, connection: ConnectionHandle, size: usize, id: i32) {
        self.arm(|reactor| reactor.read(connection.0, ReadOp::exact(id, size)));
    }

    /// Reads whatever arrives next, up to the configured ceiling.
    ///
    /// On failure two completions are produced: the bytes received so
    /// far (possibly none), then the error.
    pub fn read_some(&self, connection: ConnectionHandle, id: i32) {
        self.arm(|reactor| reactor.read(connection.0, ReadOp::BestEffort { id }));
    }

    /// Writes all of `data`.
    pub fn write(&self, connection: ConnectionHandle, data: impl Into<Bytes>, id: i32) {
        let data = data.into();
        self.arm(|reactor| reactor.write(connection.0, data, id));
    }

    /// Closes the socket of a connection, keeping the handle valid.
    ///
    /// Idempotent. Pending operations fail with
    /// [`Error::Canceled`](crate::Error::Canceled).
    pub fn close(&self, connection: ConnectionHandle) {
        self.arm(|reactor| reactor.close(connection.0));
    }

    /// Returns the pre-NAT destination of a redirected inbound
    /// connection.
    ///
    /// Only available on Linux; `None` elsewhere and whenever the
    /// connection was not redirected.
    pub fn original_destination(&self, connection: ConnectionHandle) -> Option<SocketAddr> {
        self.reactor().original_destination(connection.0)
    }

    /// Returns the state of a connection, or `None` for a stale handle.
    pub fn connection_state(&self, connection: ConnectionHandle) -> Option<ConnectionState> {
        self.reactor().connection_state(connection.0)
    }

    /// Arms a one-shot timer.
    pub fn sleep(&self, delay: Duration, id: i32) -> TimerHandle {
        TimerHandle(self.arm(|reactor| reactor.sleep(delay, id)))
    }

    /// Fires a pending timer early with a cancellation failure.
    pub fn cancel_timer(&self, timer: TimerHandle) {
        self.arm(|reactor| reactor.cancel_timer(timer.0));
    }

    /// Returns the next completion.
    ///
    /// A queued completion is returned at once, whatever `wait` is.
    /// Otherwise the loop is advanced until exactly one more operation
    /// completes, blocking for at most `wait` (forever with `None`).
    /// `None` is returned on timeout.
    ///
    /// Internal poller failures are logged and reported as `None`.
    pub fn poll(&self, wait: Option<Duration>) -> Option<Completion> {
        if let Some(completion) = self.reactor().queue.pop() {
            return Some(completion);
        }

        let mut events = self
            .shared
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let deadline = wait.and_then(|wait| Instant::now().checked_add(wait));
        let mut reactor = self.reactor();

        // Idle until another thread arms something or the wait runs out.
        if !reactor.has_work() {
            debug!("polling a stopped loop");
        }

        let mut first = true;

        loop {
            if reactor.run_ready() || !reactor.queue.is_empty() {
                return reactor.queue.pop();
            }

            let now = Instant::now();

            if reactor.expire_timers(now) {
                continue;
            }

            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));

            if !first && remaining == Some(Duration::ZERO) {
                return None;
            }
            first = false;

            let timeout = match (remaining, reactor.next_timeout(now)) {
                (Some(remaining), Some(timer)) => Some(remaining.min(timer)),
                (remaining, timer) => remaining.or(timer),
            };

            drop(reactor);

            events.clear();
            let result = self.shared.poller.poll(&mut events, timeout);

            reactor = self.reactor();

            if let Err(err) = result {
                error!(%err, "poller wait failed");
                return None;
            }

            reactor.schedule(events.drain(..));
        }
    }

    /// Returns `true` when nothing is pending: no operation, no timer
    /// and no listener.
    pub fn is_stopped(&self) -> bool {
        !self.reactor().has_work()
    }

    /// Number of issued operations that have not completed yet.
    pub fn pending(&self) -> usize {
        self.reactor().pending()
    }

    /// Number of completions waiting to be polled.
    pub fn queued(&self) -> usize {
        self.reactor().queue.len()
    }

    /// Closes every listener and connection and cancels every timer.
    ///
    /// The failures of aborted operations are queued and can still be
    /// polled; all handles are stale afterwards.
    pub fn shutdown(&self) {
        self.arm(Reactor::shutdown);
    }
}
