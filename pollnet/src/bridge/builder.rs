use super::Bridge;
use super::queue::DEFAULT_QUEUE_CAPACITY;
use crate::error::Result;

/// Settings a [`Bridge`] is created with.
///
/// `Config::default()` matches [`BridgeBuilder::new`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Bound of the event queue.
    pub queue_capacity: usize,

    /// Largest payload a best-effort read can return.
    pub read_some_limit: usize,

    /// Number of readiness events fetched per OS wait.
    pub event_capacity: usize,

    /// Backlog passed to `listen(2)`.
    pub listen_backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_some_limit: 1024 * 1024,
            event_capacity: 64,
            listen_backlog: 128,
        }
    }
}

/// Builder for configuring and creating a bridge.
///
/// # Examples
///
/// ```rust,no_run
/// let bridge = pollnet::Bridge::builder()
///     .queue_capacity(1024)
///     .read_some_limit(64 * 1024)
///     .build()
///     .unwrap();
/// # drop(bridge);
/// ```
#[derive(Clone, Debug, Default)]
pub struct BridgeBuilder {
    config: Config,
}

impl BridgeBuilder {
    /// Creates a new `BridgeBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event queue bound.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn queue_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "queue_capacity must be > 0");

        self.config.queue_capacity = n;
        self
    }

    /// Sets the ceiling of best-effort reads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn read_some_limit(mut self, n: usize) -> Self {
        assert!(n > 0, "read_some_limit must be > 0");

        self.config.read_some_limit = n;
        self
    }

    /// Sets how many readiness events one OS wait may return.
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.config.event_capacity = n.max(1);
        self
    }

    /// Sets the `listen(2)` backlog of new listeners.
    pub fn listen_backlog(mut self, n: i32) -> Self {
        self.config.listen_backlog = n;
        self
    }

    /// Returns the configuration built so far.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds the bridge with the configured options.
    ///
    /// This creates the platform poller; it fails only if the operating
    /// system refuses to.
    pub fn build(self) -> Result<Bridge> {
        Bridge::with_config(self.config)
    }
}
