//! Internal data structures.
//!
//! This module provides the generational [`Arena`] every connection,
//! listener and timer lives in, and the [`Handle`] type used to refer
//! to them from outside the loop.

mod arena;

pub(crate) use arena::Arena;
pub use arena::Handle;
