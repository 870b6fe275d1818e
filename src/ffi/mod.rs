//! FFI module - native record layouts and safe wrappers around Win32 handles
//!
//! `nt` declares the fixed-layout records behind the native system
//! information queries; `handles` provides RAII wrappers that release
//! process handles and loaded libraries when they go out of scope.

pub mod nt;

#[cfg(windows)]
mod handles;

#[cfg(windows)]
pub use handles::{LibraryHandle, ProcessHandle};
