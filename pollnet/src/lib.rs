//! # pollnet
//!
//! **pollnet** turns non-blocking TCP sockets and timers into a single,
//! ordered stream of completion records that a caller pulls one at a
//! time. It is meant for hosts that can poll but cannot take callbacks,
//! such as scripting runtimes embedding a C library.
//!
//! Everything hangs off a [`Bridge`]:
//!
//! - **Listeners** accept forever, one [`Accepted`](CompletionKind::Accepted)
//!   record per connection
//! - **Connections** run one connect, one read and one write at a time,
//!   each ending in exactly one [`Completed`](CompletionKind::Completed) record
//! - **Timers** fire once, or fail once when cancelled
//! - **[`Bridge::poll`]** advances the loop by exactly one completion
//!
//! Readiness comes from `epoll` on Linux and `kqueue` on macOS and
//! FreeBSD. Completed records wait in a bounded [`EventQueue`] that
//! drops its oldest entries when the caller falls behind.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pollnet::{Bridge, CompletionKind};
//! use std::time::Duration;
//!
//! let bridge = Bridge::new().unwrap();
//! let server = bridge.listen("127.0.0.1", 0).unwrap();
//! let port = bridge.listener_addr(server).unwrap().port();
//!
//! let client = bridge.connect_host("localhost", port, 1, false);
//! bridge.write(client, &b"ping"[..], 2);
//!
//! while let Some(event) = bridge.poll(Some(Duration::from_millis(500))) {
//!     match event.kind {
//!         CompletionKind::Accepted => {
//!             let accepted = event.subject.unwrap();
//!             bridge.read(accepted, 4, 3);
//!         }
//!         CompletionKind::Completed if event.correlation_id == 3 => {
//!             assert_eq!(&event.payload[..], b"ping");
//!         }
//!         CompletionKind::Completed => {}
//!     }
//! }
//! ```
//!
//! ## C ABI
//!
//! Built as a `cdylib`, the crate exports `pollnet_*` functions over a
//! process-wide bridge; see [`ffi`].

mod bridge;
mod error;
mod net;
mod reactor;
mod utils;

pub mod ffi;

pub use bridge::{
    Bridge, BridgeBuilder, Completion, CompletionKind, Config, ConnectionHandle,
    DEFAULT_QUEUE_CAPACITY, EventQueue, ListenerHandle, TimerHandle,
};
pub use error::{Error, Result};
pub use net::{ConnectionState, addr_to_string};
pub use utils::Handle;
