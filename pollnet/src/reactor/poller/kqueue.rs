//! BSD / macOS `kqueue`-based poller implementation.
//!
//! Exposes the same interface as the Linux `epoll` backend. Read and
//! write readiness are separate kqueue filters; a registration adds the
//! filters the interest asks for and deletes the others.

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER,
    EVFILT_WRITE, NOTE_TRIGGER, kevent, kqueue, timespec,
};
use std::io;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Identifier of the user event used for wake-ups.
const WAKE_IDENT: usize = 0;

/// `kqueue` poller.
pub(crate) struct KqueuePoller {
    /// Kqueue file descriptor.
    kqueue: RawFd,

    /// Reusable buffer for raw kevents, only touched by the driver.
    buffer: Mutex<Vec<libc::kevent>>,

    /// Waker triggering the user event.
    waker: Arc<Waker>,
}

// `kevent::udata` is a raw pointer; it only ever carries a token.
unsafe impl Send for KqueuePoller {}
unsafe impl Sync for KqueuePoller {}

fn change(ident: usize, filter: i16, flags: u16, fflags: u32, token: u64) -> libc::kevent {
    let mut event: libc::kevent = unsafe { std::mem::zeroed() };
    event.ident = ident as _;
    event.filter = filter as _;
    event.flags = flags as _;
    event.fflags = fflags as _;
    event.udata = token as usize as *mut _;
    event
}

fn submit(kq: RawFd, event: &libc::kevent) -> io::Result<()> {
    let rc = unsafe { kevent(kq, event, 1, ptr::null_mut(), 0, ptr::null()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Waker {
    /// Wake the poller by triggering the user event.
    pub(crate) fn wake(&self) {
        let event = change(WAKE_IDENT, EVFILT_USER, 0, NOTE_TRIGGER, 0);
        let _ = submit(self.0, &event);
    }
}

impl KqueuePoller {
    /// Create a new `KqueuePoller` able to report `capacity` events per wait.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let event = change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_ENABLE | EV_CLEAR, 0, 0);
        if let Err(err) = submit(kq, &event) {
            unsafe { libc::close(kq) };
            return Err(err);
        }

        Ok(Self {
            kqueue: kq,
            buffer: Mutex::new(Vec::with_capacity(capacity.max(1))),
            waker: Arc::new(Waker(kq)),
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.reregister(fd, token, interest)
    }

    /// Update the filters of a descriptor to match `interest`.
    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        for (filter, wanted) in [(EVFILT_READ, interest.read), (EVFILT_WRITE, interest.write)] {
            if wanted {
                submit(self.kqueue, &change(fd as usize, filter, EV_ADD | EV_ENABLE, 0, token))?;
            } else {
                // Deleting a filter that was never added reports ENOENT.
                let _ = submit(self.kqueue, &change(fd as usize, filter, EV_DELETE, 0, 0));
            }
        }

        Ok(())
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            let _ = submit(self.kqueue, &change(fd as usize, filter, EV_DELETE, 0, 0));
        }
    }

    /// Poll for I/O readiness events.
    pub(crate) fn poll(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let spec = timeout.map(|t| timespec {
            tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: t.subsec_nanos() as _,
        });
        let spec_ptr = spec
            .as_ref()
            .map(|s| s as *const timespec)
            .unwrap_or(ptr::null());

        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.clear();

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                buffer.as_mut_ptr(),
                buffer.capacity() as i32,
                spec_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            buffer.set_len(n as usize);
        }

        for ev in buffer.iter() {
            if ev.filter == EVFILT_USER {
                continue;
            }

            let token = ev.udata as usize as u64;
            let failed = ev.flags & (EV_EOF | EV_ERROR) != 0;

            events.push(Event {
                token,
                readable: ev.filter == EVFILT_READ || failed,
                writable: ev.filter == EVFILT_WRITE || failed,
            });
        }

        Ok(())
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kqueue);
        }
    }
}
