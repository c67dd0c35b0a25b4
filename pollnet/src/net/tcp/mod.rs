//! TCP sockets owned by the reactor.
//!
//! It is split into:
//! - [`listener`]: bound sockets accepting incoming connections,
//! - [`stream`]: connections and the operations pending on them.

pub(crate) mod listener;
pub(crate) mod stream;
