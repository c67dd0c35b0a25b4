//! Platform-specific I/O poller abstraction.
//!
//! This module provides a unified interface over platform-specific
//! readiness mechanisms (`epoll` on Linux, `kqueue` on macOS and
//! FreeBSD).
//!
//! The poller is used by the reactor to:
//! - wait for I/O readiness events,
//! - wake a blocked wait when another thread arms an operation,
//! - bound waits by the next timer deadline.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::{Interest, Waker};

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
