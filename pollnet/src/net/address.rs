use crate::error::{Error, Result};
use crate::reactor::poller::platform::{sockaddr_storage_to_socketaddr, socketaddr_to_storage};

use libc::{AF_INET, AF_INET6, c_int, sockaddr_in, sockaddr_in6, sockaddr_storage};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::{mem, ptr, slice};

/// Resolves `host:port` to a single endpoint.
///
/// A literal address (optionally bracketed for IPv6) is used as is.
/// Otherwise the system resolver is asked; with `prefer_v6` the first
/// IPv6 result wins, else the first IPv4 one, else whatever comes first.
///
/// This call blocks for the duration of the lookup.
pub(crate) fn resolve(host: &str, port: u16, prefer_v6: bool) -> Result<SocketAddr> {
    let host = host.trim();
    let literal = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let unresolved = || Error::Resolve {
        host: host.to_owned(),
        port,
    };

    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| unresolved())?
        .collect();

    let preferred = if prefer_v6 {
        candidates.iter().find(|addr| addr.is_ipv6())
    } else {
        None
    };

    preferred
        .or_else(|| candidates.iter().find(|addr| addr.is_ipv4()))
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(unresolved)
}

/// Decodes a buffer laid out as a `sockaddr_storage`.
///
/// Only `AF_INET` and `AF_INET6` are accepted, and the buffer must be
/// at least as long as the matching `sockaddr_in` / `sockaddr_in6`.
pub(crate) fn sockaddr_from_bytes(bytes: &[u8]) -> Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let capacity = mem::size_of::<sockaddr_storage>();
    let len = bytes.len().min(capacity);

    let family_end =
        mem::offset_of!(sockaddr_storage, ss_family) + mem::size_of_val(&storage.ss_family);
    if len < family_end {
        return Err(Error::InvalidAddress(format!("{len}-byte socket address")));
    }

    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), &mut storage as *mut _ as *mut u8, len);
    }

    let required = match storage.ss_family as c_int {
        AF_INET => mem::size_of::<sockaddr_in>(),
        AF_INET6 => mem::size_of::<sockaddr_in6>(),
        family => return Err(Error::UnsupportedFamily(family)),
    };

    if len < required {
        return Err(Error::InvalidAddress(format!("{len}-byte socket address")));
    }

    Ok(sockaddr_storage_to_socketaddr(&storage)?)
}

/// Encodes an endpoint in `sockaddr_storage` layout.
///
/// The result is only as long as the family-specific structure.
pub(crate) fn sockaddr_to_bytes(address: &SocketAddr) -> Vec<u8> {
    let (storage, len) = socketaddr_to_storage(address);
    let bytes = unsafe { slice::from_raw_parts(&storage as *const _ as *const u8, len as usize) };

    bytes.to_vec()
}

/// Formats an endpoint as `ip:port`.
///
/// IPv6 addresses are not bracketed, so `[::1]:8080` reads `::1:8080`.
pub(crate) fn format_addr(address: &SocketAddr) -> String {
    format!("{}:{}", address.ip(), address.port())
}

/// Formats a raw `sockaddr_storage`-layout buffer as `ip:port`.
///
/// This is the textual form used for original destinations handed to
/// the host.
pub fn addr_to_string(raw: &[u8]) -> Result<String> {
    sockaddr_from_bytes(raw).map(|address| format_addr(&address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_addresses_skip_the_resolver() {
        let v4 = resolve("127.0.0.1", 80, true).unwrap();
        assert_eq!(v4, "127.0.0.1:80".parse().unwrap());

        let v6 = resolve("[::1]", 443, false).unwrap();
        assert_eq!(v6, "[::1]:443".parse().unwrap());
    }

    #[test]
    fn raw_bytes_round_trip_both_families() {
        for text in ["10.1.2.3:9000", "[2001:db8::7]:53"] {
            let address: SocketAddr = text.parse().unwrap();
            let raw = sockaddr_to_bytes(&address);

            assert_eq!(sockaddr_from_bytes(&raw).unwrap(), address);
        }
    }

    #[test]
    fn ipv6_is_formatted_without_brackets() {
        let raw = sockaddr_to_bytes(&"[::1]:8080".parse().unwrap());
        assert_eq!(addr_to_string(&raw).unwrap(), "::1:8080");
    }

    #[test]
    fn short_or_foreign_buffers_are_rejected() {
        assert!(matches!(sockaddr_from_bytes(&[]), Err(Error::InvalidAddress(_))));

        let mut raw = sockaddr_to_bytes(&"[::1]:1".parse().unwrap());
        raw.truncate(8);
        assert!(matches!(
            sockaddr_from_bytes(&raw),
            Err(Error::InvalidAddress(_))
        ));

        let mut unix = sockaddr_to_bytes(&"127.0.0.1:1".parse().unwrap());
        let family = mem::offset_of!(sockaddr_storage, ss_family);
        unix[family] = libc::AF_UNIX as u8;
        assert!(matches!(
            sockaddr_from_bytes(&unix),
            Err(Error::UnsupportedFamily(_))
        ));
    }
}
