//! C ABI shared between the host and plugin modules
//!
//! Every structure crossing the boundary is `#[repr(C)]` with a fixed
//! layout: pointer+count pairs for arrays, null-terminated UTF-16 for
//! strings. A plugin declares the API version it was built against in
//! [`PluginInfo`]; the host rejects modules whose major version differs
//! from [`PLUGIN_API_MAJOR`] and tolerates minor differences.

use std::ffi::c_void;
use std::ptr;

/// Major API version. A mismatch here means the layout of these
/// structures may differ and the module is rejected.
pub const PLUGIN_API_MAJOR: u32 = 1;
/// Minor API version. Additive changes only; mismatches are tolerated.
pub const PLUGIN_API_MINOR: u32 = 0;

/// Exported entry point every plugin must provide.
pub const PLUGIN_INITIALIZE_SYMBOL: &[u8] = b"WinscopePluginInitialize\0";
/// Optional exported shutdown routine.
pub const PLUGIN_SHUTDOWN_SYMBOL: &[u8] = b"WinscopePluginShutdown\0";

/// Filled in by the plugin during initialization.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginInfo {
    /// Display name, null-terminated UTF-16
    pub name: *const u16,
    /// Author, null-terminated UTF-16
    pub author: *const u16,
    /// Version string, null-terminated UTF-16
    pub version: *const u16,
    /// API major version the module was built against
    pub api_major: u32,
    /// API minor version the module was built against
    pub api_minor: u32,
}

impl Default for PluginInfo {
    fn default() -> Self {
        Self {
            name: ptr::null(),
            author: ptr::null(),
            version: ptr::null(),
            api_major: 0,
            api_minor: 0,
        }
    }
}

/// One thread of a process, as exposed to plugins.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ThreadRecord {
    pub thread_id: u32,
    pub owning_process_id: u32,
    pub priority: i32,
    pub state: u32,
    pub wait_reason: u32,
    pub kernel_time_100ns: u64,
    pub user_time_100ns: u64,
}

/// One process of a snapshot, as exposed to plugins.
///
/// `image_name` and `threads` point into host-owned memory that is valid
/// only for the duration of the callback receiving the view.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcessRecord {
    /// Executable image name, null-terminated UTF-16
    pub image_name: *const u16,
    pub process_id: u32,
    pub thread_count: u32,
    pub working_set_bytes: u64,
    pub private_bytes: u64,
    pub kernel_time_100ns: u64,
    pub user_time_100ns: u64,
    pub threads: *const ThreadRecord,
    pub thread_record_count: usize,
}

/// One open kernel handle, as exposed to plugins.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HandleRecord {
    pub process_id: u32,
    pub handle_value: u16,
    pub object_type_index: u16,
    pub attributes: u32,
    pub granted_access: u32,
}

/// Flat view over one process snapshot, valid for one callback.
#[repr(C)]
pub struct ProcessSnapshotView {
    pub processes: *const ProcessRecord,
    pub process_count: usize,
}

/// Flat view over one handle snapshot, valid for one callback.
#[repr(C)]
pub struct HandleSnapshotView {
    pub handles: *const HandleRecord,
    pub handle_count: usize,
}

/// Callback a plugin registers for a menu item it added.
pub type MenuCommandFn = unsafe extern "C" fn(context: *mut c_void);

/// Services the host offers to plugins during initialization.
#[repr(C)]
pub struct HostServices {
    /// Registers a menu item (label as null-terminated UTF-16). The host
    /// currently records the registration and does nothing further with it.
    pub register_menu_item:
        Option<unsafe extern "C" fn(label: *const u16, command: Option<MenuCommandFn>, context: *mut c_void)>,
}

/// Callbacks a plugin hands back from initialization. Either hook may be
/// null; `context` is threaded back to every invocation unmodified.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginHooks {
    pub on_process_snapshot:
        Option<unsafe extern "C" fn(view: *const ProcessSnapshotView, context: *mut c_void)>,
    pub on_handle_snapshot:
        Option<unsafe extern "C" fn(view: *const HandleSnapshotView, context: *mut c_void)>,
    pub context: *mut c_void,
}

impl Default for PluginHooks {
    fn default() -> Self {
        Self {
            on_process_snapshot: None,
            on_handle_snapshot: None,
            context: ptr::null_mut(),
        }
    }
}

/// Signature of the required initialize export. Returns false to decline
/// activation.
pub type PluginInitializeFn = unsafe extern "C" fn(
    services: *const HostServices,
    info: *mut PluginInfo,
    hooks: *mut PluginHooks,
) -> bool;

/// Signature of the optional shutdown export.
pub type PluginShutdownFn = unsafe extern "C" fn();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_symbols_are_null_terminated() {
        assert_eq!(PLUGIN_INITIALIZE_SYMBOL.last(), Some(&0));
        assert_eq!(PLUGIN_SHUTDOWN_SYMBOL.last(), Some(&0));
    }

    #[test]
    fn defaults_are_inert() {
        let info = PluginInfo::default();
        assert!(info.name.is_null());
        assert_eq!(info.api_major, 0);

        let hooks = PluginHooks::default();
        assert!(hooks.on_process_snapshot.is_none());
        assert!(hooks.on_handle_snapshot.is_none());
        assert!(hooks.context.is_null());
    }
}
