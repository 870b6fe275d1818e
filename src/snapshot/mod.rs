//! Snapshot engine - immutable point-in-time captures of system state
//!
//! Each submodule owns one snapshot kind and its `capture()` factory:
//! processes and threads, kernel handles, and network connection
//! ownership. `cursor` provides the bounds-checked buffer reader the
//! decoders share.

pub(crate) mod cursor;
pub mod handle;
pub mod network;
pub mod process;
