use crate::error::{Error, Result};
use crate::reactor::poller::platform::{
    domain_of, sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::RawFd;

/// A bound, listening TCP socket.
///
/// The listener is always armed for readability; every readiness event
/// drains the pending accept queue.
pub(crate) struct Listener {
    /// File descriptor of the listening socket.
    pub(crate) fd: RawFd,

    /// Address the socket is actually bound to.
    local: SocketAddr,
}

impl Listener {
    /// Binds a listener to `address:port`.
    ///
    /// `address` must be a literal IPv4 or IPv6 address; port `0` asks
    /// the operating system for an ephemeral port.
    ///
    /// This function:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening.
    pub(crate) fn bind(address: &str, port: u16, backlog: i32) -> Result<Self> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_owned()))?;

        let requested = SocketAddr::new(ip, port);
        let domain = domain_of(&requested);
        let fd = sys_socket(domain)?;

        let local = sys_set_reuseaddr(fd)
            .and_then(|()| sys_ipv6_is_necessary(fd, domain))
            .and_then(|()| sys_bind(fd, &requested))
            .and_then(|()| sys_listen(fd, backlog))
            .and_then(|()| sys_sockname(fd));

        match local {
            Ok(local) => Ok(Self { fd, local }),
            Err(err) => {
                sys_close(fd);
                Err(err.into())
            }
        }
    }

    /// Returns the address the listener is bound to.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Returns the bound port.
    pub(crate) fn port(&self) -> u16 {
        self.local.port()
    }

    /// Accepts one pending connection.
    ///
    /// Returns `Ok(None)` once the accept queue is empty.
    pub(crate) fn accept(&self) -> io::Result<Option<(RawFd, SocketAddr)>> {
        loop {
            match sys_accept(self.fd) {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for Listener {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
