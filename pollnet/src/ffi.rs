//! C ABI over a process-wide [`Bridge`].
//!
//! The host calls [`pollnet_init`] once, drives everything through the
//! `pollnet_*` functions, and calls [`pollnet_shutdown`] when done. Only
//! one bridge exists per process at this boundary; Rust callers that
//! need several use [`Bridge`] directly.
//!
//! Handles cross the boundary as non-zero `u64` values, `0` meaning
//! "none". Pointers returned by [`pollnet_get`],
//! [`pollnet_get_original_dst`] and [`pollnet_addr_to_str`] stay valid
//! until the next call of the same function on the same thread.
//!
//! No panic crosses the boundary: each entry point catches it, logs it
//! and returns its neutral value.

use crate::bridge::{Bridge, ConnectionHandle, ListenerHandle, TimerHandle};
use crate::error::{Error, Result};
use crate::net;
use crate::utils::Handle;

use bytes::Bytes;
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use std::{ptr, slice};
use tracing::{error, warn};

static BRIDGE: Mutex<Option<Bridge>> = Mutex::new(None);

/// Size of the buffer [`pollnet_get_original_dst`] fills.
const SOCKADDR_LEN: usize = std::mem::size_of::<libc::sockaddr_storage>();

/// Completion as seen by the host.
#[repr(C)]
pub struct EventRecord {
    /// [`CompletionKind`](crate::CompletionKind) discriminant.
    pub kind: u8,
    pub correlation_id: c_int,
    /// Raw connection handle, `0` for none.
    pub subject: u64,
    pub payload: *const u8,
    pub payload_len: usize,
}

struct Scratch {
    record: EventRecord,
    payload: Bytes,
    original_dst: [u8; SOCKADDR_LEN],
    text: CString,
}

thread_local! {
    static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch {
        record: EventRecord {
            kind: 0,
            correlation_id: 0,
            subject: 0,
            payload: ptr::null(),
            payload_len: 0,
        },
        payload: Bytes::new(),
        original_dst: [0; SOCKADDR_LEN],
        text: CString::default(),
    });
}

fn catch<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!("panic caught at the foreign boundary");
            fallback
        }
    }
}

/// Returns a clone of the process bridge.
///
/// Cloning it out of the global keeps a blocking poll from holding the
/// global lock.
fn bridge() -> Result<Bridge> {
    BRIDGE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::Uninitialised)
}

/// Runs `f` against the process bridge.
fn with_bridge<T>(fallback: T, f: impl FnOnce(&Bridge) -> T) -> T {
    match bridge() {
        Ok(bridge) => catch(fallback, || f(&bridge)),
        Err(err) => {
            warn!(%err, "foreign call ignored");
            fallback
        }
    }
}

/// Reads a C string, `None` for null or non UTF-8 input.
///
/// # Safety
///
/// `text` must be null or point to a NUL-terminated string.
unsafe fn text_arg<'a>(text: *const c_char) -> Option<&'a str> {
    if text.is_null() {
        return None;
    }

    unsafe { CStr::from_ptr(text) }.to_str().ok()
}

/// Borrows a byte buffer, empty for null input.
///
/// # Safety
///
/// `data` must be null or valid for `len` bytes.
unsafe fn bytes_arg<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        return &[];
    }

    unsafe { slice::from_raw_parts(data, len) }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Creates the process bridge.
///
/// `queue_capacity` bounds the event queue; `0` selects the default.
/// Returns `false` if the bridge already exists or cannot be created.
#[unsafe(no_mangle)]
pub extern "C" fn pollnet_init(queue_capacity: usize) -> bool {
    catch(false, || {
        let mut global = BRIDGE.lock().unwrap_or_else(PoisonError::into_inner);

        if global.is_some() {
            warn!("bridge already initialised");
            return false;
        }

        let mut builder = Bridge::builder();
        if queue_capacity > 0 {
            builder = builder.queue_capacity(queue_capacity);
        }

        match builder.build() {
            Ok(bridge) => {
                *global = Some(bridge);
                true
            }
            Err(err) => {
                error!(%err, "could not create bridge");
                false
            }
        }
    })
}

/// Tears the process bridge down, closing every socket.
///
/// Completions not yet polled are discarded.
#[unsafe(no_mangle)]
pub extern "C" fn pollnet_shutdown() {
    catch((), || {
        let bridge = BRIDGE.lock().unwrap_or_else(PoisonError::into_inner).take();

        if let Some(bridge) = bridge {
            bridge.shutdown();
        }
    })
}

/// Binds a listener; returns its handle, or `0` on failure.
///
/// # Safety
///
/// `ip` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pollnet_new_server(ip: *const c_char, port: u16) -> u64 {
    let ip = unsafe { text_arg(ip) };

    with_bridge(0, |bridge| {
        let Some(ip) = ip else {
            warn!("listener address is not a valid string");
            return 0;
        };

        match bridge.listen(ip, port) {
            Ok(listener) => listener.into_raw(),
            Err(err) => {
                warn!(%err, ip, port, "could not create listener");
                0
            }
        }
    })
}

/// Returns the port a listener is bound to, or `-1`.
#[unsafe(no_mangle)]
pub extern "C" fn pollnet_server_port(listener: u64) -> c_int {
    with_bridge(-1, |bridge| {
        ListenerHandle::from_raw(listener)
            .and_then(|listener| bridge.listener_addr(listener))
            .map_or(-1, |address| address.port() as c_int)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn pollnet_delete_server(listener: u64) {
    with_bridge((), |bridge| {
        if let Some(listener) = ListenerHandle::from_raw(listener) {
            bridge.destroy_listener(listener);
        }
    })
}

/// Connects to `host:port`; the outcome arrives through [`pollnet_get`].
///
/// # Safety
///
/// `host` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pollnet_new_connect(
    host: *const c_char,
    port: u16,
    id: c_int,
    prefer_v6: bool,
) -> u64 {
    let host = unsafe { text_arg(host) }.unwrap_or_default();

    with_bridge(0, |bridge| {
        bridge.connect_host(host, port, id, prefer_v6).into_raw()
    })
}

/// Connects to a `sockaddr_storage`-layout address.
///
/// # Safety
///
/// `addr` must be null or valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pollnet_new_connect_sockaddr(
    addr: *const u8,
    len: usize,
    id: c_int,
) -> u64 {
    let raw = unsafe { bytes_arg(addr, len) };

    with_bridge(0, |bridge| bridge.connect_raw(raw, id).into_raw())
}

/// Runs `f` with a connection handle.
///
/// A zero handle still reaches `f` so the operation reports a
/// stale-handle failure like any other unknown handle.
fn with_connection(connection: u64, f: impl FnOnce(&Bridge, ConnectionHandle)) {
    with_bridge((), |bridge| {
        let handle = ConnectionHandle::from_raw(connection)
            .unwrap_or(ConnectionHandle(Handle::DANGLING));

        f(bridge, handle)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn pollnet_delete_connection(connection: u64) {
    with_bridge((), |bridge| {
        if let Some(connection) = ConnectionHandle::from_raw(connection) {
            bridge.destroy_connection(connection);
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn pollnet_conn_read(connection: u64, size: usize, id: c_int) {
    with_connection(connection, |bridge, connection| {
        bridge.read(connection, size, id)
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn pollnet_conn_read_some(connection: u64, id: c_int) {
    with_connection(connection, |bridge, connection| {
        bridge.read_some(connection, id)
    });
}

/// Writes `len` bytes from `data`; the bytes are copied before return.
///
/// # Safety
///
/// `data` must be null or valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pollnet_conn_write(
    connection: u64,
    data: *const u8,
    len: usize,
    id: c_int,
) {
    let data = Bytes::copy_from_slice(unsafe { bytes_arg(data, len) });

    with_connection(connection, |bridge, connection| {
        bridge.write(connection, data, id)
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn pollnet_conn_close(connection: u64) {
    with_bridge((), |bridge| {
        if let Some(connection) = ConnectionHandle::from_raw(connection) {
            bridge.close(connection);
        }
    })
}

/// Returns the pre-NAT destination of a connection as a
/// `sockaddr_storage`, or null when unavailable.
///
/// When `len` is not null it receives the size of the returned buffer.
///
/// # Safety
///
/// `len` must be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pollnet_get_original_dst(connection: u64, len: *mut usize) -> *const u8 {
    let address = with_bridge(None, |bridge| {
        ConnectionHandle::from_raw(connection)
            .and_then(|connection| bridge.original_destination(connection))
    });

    let Some(address) = address else {
        return ptr::null();
    };

    let raw = net::sockaddr_to_bytes(&address);

    SCRATCH.with_borrow_mut(|scratch| {
        scratch.original_dst = [0; SOCKADDR_LEN];
        scratch.original_dst[..raw.len()].copy_from_slice(&raw);

        if !len.is_null() {
            unsafe { *len = SOCKADDR_LEN };
        }

        scratch.original_dst.as_ptr()
    })
}

/// Formats a `sockaddr_storage`-layout address as `ip:port`.
///
/// Returns null if the buffer is not an IPv4 or IPv6 address.
///
/// # Safety
///
/// `addr` must be null or valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pollnet_addr_to_str(addr: *const u8, len: usize) -> *const c_char {
    let raw = unsafe { bytes_arg(addr, len) };

    let text = catch(None, || match net::addr_to_string(raw) {
        Ok(text) => CString::new(text).ok(),
        Err(err) => {
            warn!(%err, "cannot format address");
            None
        }
    });

    let Some(text) = text else {
        return ptr::null();
    };

    SCRATCH.with_borrow_mut(|scratch| {
        scratch.text = text;
        scratch.text.as_ptr()
    })
}

/// Arms a timer firing after `seconds` (millisecond resolution).
///
/// Returns the timer handle, usable with [`pollnet_cancel_timer`].
#[unsafe(no_mangle)]
pub extern "C" fn pollnet_sleep(id: c_int, seconds: f64) -> u64 {
    let millis = (seconds * 1000.0) as i64;
    let delay = Duration::from_millis(millis.max(0) as u64);

    with_bridge(0, |bridge| bridge.sleep(delay, id).into_raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn pollnet_cancel_timer(timer: u64) {
    with_bridge((), |bridge| {
        if let Some(timer) = TimerHandle::from_raw(timer) {
            bridge.cancel_timer(timer);
        }
    })
}

/// Returns `true` when nothing is pending, or no bridge exists.
#[unsafe(no_mangle)]
pub extern "C" fn pollnet_stopped() -> bool {
    with_bridge(true, Bridge::is_stopped)
}

/// Returns the next completion, or null on timeout.
///
/// Waits at most `wait_seconds`; a negative value waits until
/// something completes.
#[unsafe(no_mangle)]
pub extern "C" fn pollnet_get(wait_seconds: f64) -> *const EventRecord {
    let wait = (wait_seconds >= 0.0 || wait_seconds.is_nan()).then(|| seconds(wait_seconds));

    let Some(completion) = with_bridge(None, |bridge| bridge.poll(wait)) else {
        return ptr::null();
    };

    SCRATCH.with_borrow_mut(|scratch| {
        scratch.payload = completion.payload;
        scratch.record = EventRecord {
            kind: completion.kind as u8,
            correlation_id: completion.correlation_id,
            subject: completion.subject.map_or(0, ConnectionHandle::into_raw),
            payload: scratch.payload.as_ptr(),
            payload_len: scratch.payload.len(),
        };

        &scratch.record as *const EventRecord
    })
}
