//! Structured error types for snapshot capture
//!
//! The public `capture()` factories keep their documented degradation
//! contracts (empty snapshot for process/handle captures, status flags for
//! network captures); these errors exist on the internal query and decode
//! paths so each failure mode stays observable and testable in isolation.

use thiserror::Error;

/// Errors raised by the capture queries and decoders.
///
/// [`ProcessSnapshot::capture`](crate::ProcessSnapshot::capture) and
/// [`HandleSnapshot::capture`](crate::HandleSnapshot::capture) fold every
/// variant into an empty snapshot;
/// [`NetworkSnapshot::capture`](crate::NetworkSnapshot::capture) maps
/// per-table failures onto its `access_denied`/`capture_failed` flags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The OS kept signalling a size mismatch after repeated resizes.
    #[error("system query did not accept a buffer after {attempts} attempts")]
    SizeNegotiationExhausted {
        /// Number of query attempts made before giving up
        attempts: usize,
    },

    /// The underlying query failed with a native status code.
    #[error("system query failed with status {status:#010x}")]
    QueryFailed {
        /// NTSTATUS or Win32 error code reported by the OS
        status: u32,
    },

    /// The caller lacks the privilege required by the query.
    #[error("access denied by the operating system")]
    AccessDenied,

    /// A decoded record did not fit inside the returned buffer.
    #[error("malformed record at buffer offset {offset}")]
    MalformedRecord {
        /// Byte offset of the record that failed validation
        offset: usize,
    },

    /// Snapshot capture is only implemented for Windows targets.
    #[error("snapshot capture is not supported on this platform")]
    Unsupported,
}
