//! Reactor core and event handling.
//!
//! The reactor is responsible for:
//! - keeping sockets registered with the platform poller,
//! - managing timers,
//! - turning readiness into completions, one dispatch at a time.
//!
//! Users do not interact with the reactor directly; the
//! [`Bridge`](crate::Bridge) drives it and exposes its operations.

mod core;
mod event;
mod io;
mod timer;

pub(crate) mod poller;

pub(crate) use self::core::Reactor;
pub(crate) use event::Event;
