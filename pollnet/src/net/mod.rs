//! Networking primitives.
//!
//! Sockets here are plain non-blocking descriptors driven by the
//! reactor; nothing in this module blocks except name resolution.
mod address;
pub(crate) mod tcp;

pub use address::addr_to_string;
pub(crate) use address::{resolve, sockaddr_from_bytes, sockaddr_to_bytes};
pub use tcp::stream::ConnectionState;
