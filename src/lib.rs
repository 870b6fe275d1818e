//! Windows system observation core
//!
//! Captures point-in-time snapshots of the live state of the operating
//! system - processes and their threads, loaded modules, open kernel
//! handles, and network connection ownership - and republishes that state
//! to independently compiled plugin modules over a stable binary interface.
//!
//! Each snapshot kind is produced by a `capture()` factory and is immutable
//! after construction. Snapshots hold no references to each other; all
//! cross-referencing (for example "handles owned by this process") is done
//! by linear filtering at query time. A refresh cycle captures all three
//! kinds and hands them to [`PluginHost`] for broadcast:
//!
//! ```no_run
//! use winscope::{HandleSnapshot, NetworkSnapshot, PluginHost, ProcessSnapshot};
//!
//! let mut host = PluginHost::new();
//! host.load_plugins();
//!
//! let processes = ProcessSnapshot::capture();
//! let handles = HandleSnapshot::capture();
//! let network = NetworkSnapshot::capture();
//!
//! host.broadcast_process_snapshot(&processes);
//! host.broadcast_handle_snapshot(&handles);
//!
//! if network.access_denied() {
//!     // prompt the user to elevate before the next refresh
//! }
//! ```
//!
//! Everything runs on the calling thread; `capture()` blocks for the
//! duration of the underlying OS query and a new capture fully replaces
//! the previous snapshot.

pub mod constants;
pub mod error;
mod ffi;
pub mod plugin;
pub mod snapshot;

pub use error::CaptureError;
pub use plugin::host::{
    DiscoveryRecord, PluginDescriptor, PluginHost, PluginState, RejectReason,
};
pub use snapshot::handle::{HandleEntry, HandleSnapshot};
pub use snapshot::network::{
    AddressFamily, ConnectionEntry, NetworkSnapshot, TransportProtocol,
};
pub use snapshot::process::{ModuleEntry, ProcessEntry, ProcessSnapshot, ThreadEntry};
