//! Plugin lifecycle management and snapshot broadcast
//!
//! The host scans one directory for plugin modules, drives each through
//! its lifecycle, and fans captured snapshots out to every active
//! module's hooks. A module that fails any validation step is rejected,
//! logged, and released; the host keeps running with the modules that
//! did activate.

use std::env;
use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::constants::{PLUGIN_DIRECTORY_NAME, PLUGIN_FILE_EXTENSION};
use crate::plugin::api::{
    HostServices, MenuCommandFn, PluginHooks, PluginInfo, PluginShutdownFn, PLUGIN_API_MAJOR,
    PLUGIN_API_MINOR,
};
use crate::plugin::bridge::{HandleBridge, ProcessBridge};
use crate::snapshot::handle::HandleSnapshot;
use crate::snapshot::process::ProcessSnapshot;

/// Why a discovered module was rejected.
#[derive(Debug, Clone, Error)]
pub enum RejectReason {
    #[error("module load failed: {detail}")]
    LoadFailed { detail: String },
    #[error("module exports no initialize entry point")]
    MissingInitialize,
    #[error("module initialize returned failure")]
    InitializeFailed,
    #[error("module declares api major {declared}, host is {host}")]
    ApiMajorMismatch { declared: u32, host: u32 },
}

/// Lifecycle state of one discovered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// File found during the directory scan
    Discovered,
    /// Module image loaded into the process
    Loaded,
    /// Initialize entry point returned success
    Initialized,
    /// Validated and receiving broadcasts
    Active,
    /// Validation failed; module released
    Rejected,
    /// Shut down and released
    Unloaded,
}

/// Outcome record for one file seen by the directory scan.
#[derive(Debug, Clone)]
pub struct DiscoveryRecord {
    pub path: PathBuf,
    pub state: PluginState,
    pub reject_reason: Option<RejectReason>,
}

/// Identity a plugin reported from its initialize call.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub author: String,
    pub version: String,
    pub api_major: u32,
    pub api_minor: u32,
}

/// One validated, active module: owned descriptor, hook table, shutdown
/// entry point, and (on Windows) the library handle keeping it loaded.
struct LoadedPlugin {
    path: PathBuf,
    descriptor: PluginDescriptor,
    hooks: PluginHooks,
    shutdown: Option<PluginShutdownFn>,
    #[cfg(windows)]
    library: Option<crate::ffi::LibraryHandle>,
}

/// Owns every loaded plugin and the services table handed to them.
pub struct PluginHost {
    directory: PathBuf,
    // Boxed so the pointer handed to initialize stays stable.
    services: Box<HostServices>,
    plugins: Vec<LoadedPlugin>,
    records: Vec<DiscoveryRecord>,
}

impl PluginHost {
    /// Creates a host scanning the default directory, `plugins/` beside
    /// the running executable.
    pub fn new() -> Self {
        let directory = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default()
            .join(PLUGIN_DIRECTORY_NAME);
        Self::with_directory(directory)
    }

    /// Creates a host scanning `directory`.
    pub fn with_directory(directory: PathBuf) -> Self {
        Self {
            directory,
            services: Box::new(HostServices {
                register_menu_item: Some(register_menu_item_stub),
            }),
            plugins: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Directory this host scans.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Scans the plugin directory and activates every module that passes
    /// validation.
    ///
    /// Any previously loaded modules are shut down first. The scan is
    /// non-recursive and considers only files with the plugin extension;
    /// a missing or unreadable directory simply yields zero modules.
    pub fn load_plugins(&mut self) {
        self.unload_plugins();
        self.records.clear();

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::debug!(
                    directory = %self.directory.display(),
                    %error,
                    "plugin directory not readable, no plugins loaded"
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_plugin = path
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case(PLUGIN_FILE_EXTENSION));
            if !is_plugin {
                continue;
            }

            match self.load_plugin_from_path(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "plugin active");
                    self.records.push(DiscoveryRecord {
                        path,
                        state: PluginState::Active,
                        reject_reason: None,
                    });
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "plugin rejected");
                    self.records.push(DiscoveryRecord {
                        path,
                        state: PluginState::Rejected,
                        reject_reason: Some(reason),
                    });
                }
            }
        }
    }

    /// Number of active modules.
    pub fn active_count(&self) -> usize {
        self.plugins.len()
    }

    /// Descriptors of the active modules, in load order.
    pub fn descriptors(&self) -> Vec<&PluginDescriptor> {
        self.plugins.iter().map(|plugin| &plugin.descriptor).collect()
    }

    /// Outcome of the most recent directory scan, one record per file.
    pub fn discovery_records(&self) -> &[DiscoveryRecord] {
        &self.records
    }

    /// Hands a process snapshot to every active module, in load order.
    ///
    /// Returns before building any view when no modules are active.
    pub fn broadcast_process_snapshot(&self, snapshot: &ProcessSnapshot) {
        if self.plugins.is_empty() {
            return;
        }

        let bridge = ProcessBridge::new(snapshot);
        let view = bridge.view();
        for plugin in &self.plugins {
            if let Some(hook) = plugin.hooks.on_process_snapshot {
                // SAFETY: the view's backing bridge outlives every hook
                // invocation; the context pointer is the one this module
                // handed back from initialize.
                unsafe { hook(&view, plugin.hooks.context) };
            }
        }
    }

    /// Hands a handle snapshot to every active module, in load order.
    pub fn broadcast_handle_snapshot(&self, snapshot: &HandleSnapshot) {
        if self.plugins.is_empty() {
            return;
        }

        let bridge = HandleBridge::new(snapshot);
        let view = bridge.view();
        for plugin in &self.plugins {
            if let Some(hook) = plugin.hooks.on_handle_snapshot {
                // SAFETY: as in broadcast_process_snapshot.
                unsafe { hook(&view, plugin.hooks.context) };
            }
        }
    }

    /// Shuts down and releases every active module, in load order.
    ///
    /// Shutdown entry points are trusted to return; no watchdog guards
    /// the call.
    pub fn unload_plugins(&mut self) {
        for plugin in self.plugins.drain(..) {
            tracing::debug!(path = %plugin.path.display(), "unloading plugin");
            if let Some(shutdown) = plugin.shutdown {
                // SAFETY: the module is still loaded at this point; its
                // library handle is released only after this call returns.
                unsafe { shutdown() };
            }
        }
        for record in &mut self.records {
            if record.state == PluginState::Active {
                record.state = PluginState::Unloaded;
            }
        }
    }

    #[cfg(windows)]
    fn load_plugin_from_path(&mut self, path: &Path) -> Result<(), RejectReason> {
        use std::mem;

        use windows::core::PCSTR;
        use windows::Win32::System::LibraryLoader::GetProcAddress;

        use crate::ffi::LibraryHandle;
        use crate::plugin::api::{
            PluginInitializeFn, PLUGIN_INITIALIZE_SYMBOL, PLUGIN_SHUTDOWN_SYMBOL,
        };

        let library = LibraryHandle::load(path).map_err(|error| RejectReason::LoadFailed {
            detail: error.message(),
        })?;

        // SAFETY: the module stays loaded across both lookups, and the
        // symbol names are null-terminated.
        let initialize = unsafe {
            GetProcAddress(library.as_raw(), PCSTR(PLUGIN_INITIALIZE_SYMBOL.as_ptr()))
        }
        .ok_or(RejectReason::MissingInitialize)?;
        // SAFETY: the export contract fixes the signatures of both entry
        // points; transmuting the resolved addresses to them is the only
        // way to call through.
        let initialize: PluginInitializeFn = unsafe { mem::transmute(initialize) };
        let shutdown = unsafe {
            GetProcAddress(library.as_raw(), PCSTR(PLUGIN_SHUTDOWN_SYMBOL.as_ptr()))
        }
        .map(|symbol| unsafe { mem::transmute::<_, PluginShutdownFn>(symbol) });

        let mut info = PluginInfo::default();
        let mut hooks = PluginHooks::default();
        // SAFETY: all three pointers are valid for the duration of the
        // call; the services table is boxed and outlives the host.
        let accepted = unsafe { initialize(&*self.services, &mut info, &mut hooks) };
        if !accepted {
            // A module that declined activation does not get a shutdown
            // call; it never finished initializing.
            return Err(RejectReason::InitializeFailed);
        }

        self.register_initialized(path, &info, hooks, shutdown)?;
        if let Some(plugin) = self.plugins.last_mut() {
            plugin.library = Some(library);
        }
        Ok(())
    }

    #[cfg(not(windows))]
    fn load_plugin_from_path(&mut self, _path: &Path) -> Result<(), RejectReason> {
        Err(RejectReason::LoadFailed {
            detail: "native plugin modules are unsupported on this platform".to_string(),
        })
    }

    /// Validates a module that returned success from initialize and, if it
    /// passes, records it as active.
    ///
    /// The module already initialized, so on a version rejection it gets
    /// its shutdown call before release.
    fn register_initialized(
        &mut self,
        path: &Path,
        info: &PluginInfo,
        hooks: PluginHooks,
        shutdown: Option<PluginShutdownFn>,
    ) -> Result<(), RejectReason> {
        if info.api_major != PLUGIN_API_MAJOR {
            if let Some(shutdown) = shutdown {
                // SAFETY: the module initialized successfully and is still
                // loaded.
                unsafe { shutdown() };
            }
            return Err(RejectReason::ApiMajorMismatch {
                declared: info.api_major,
                host: PLUGIN_API_MAJOR,
            });
        }
        if info.api_minor != PLUGIN_API_MINOR {
            tracing::debug!(
                declared = info.api_minor,
                host = PLUGIN_API_MINOR,
                "plugin built against a different minor api version"
            );
        }

        // SAFETY: the info strings are null-terminated per the ABI; null
        // pointers decode as empty strings.
        let descriptor = unsafe {
            PluginDescriptor {
                name: wide_cstr_to_string(info.name),
                author: wide_cstr_to_string(info.author),
                version: wide_cstr_to_string(info.version),
                api_major: info.api_major,
                api_minor: info.api_minor,
            }
        };
        tracing::debug!(name = %descriptor.name, version = %descriptor.version, "plugin validated");

        self.plugins.push(LoadedPlugin {
            path: path.to_path_buf(),
            descriptor,
            hooks,
            shutdown,
            #[cfg(windows)]
            library: None,
        });
        Ok(())
    }

    #[cfg(test)]
    fn push_test_plugin(&mut self, name: &str, hooks: PluginHooks) {
        let path = PathBuf::from(format!("{name}.dll"));
        self.plugins.push(LoadedPlugin {
            path: path.clone(),
            descriptor: PluginDescriptor {
                name: name.to_string(),
                author: String::new(),
                version: String::new(),
                api_major: PLUGIN_API_MAJOR,
                api_minor: PLUGIN_API_MINOR,
            },
            hooks,
            shutdown: None,
            #[cfg(windows)]
            library: None,
        });
        self.records.push(DiscoveryRecord {
            path,
            state: PluginState::Active,
            reject_reason: None,
        });
    }
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.unload_plugins();
    }
}

/// Copies a null-terminated UTF-16 string owned by a plugin.
///
/// # Safety
/// `pointer` must be null or point to a null-terminated UTF-16 string
/// that stays valid for the duration of the call.
unsafe fn wide_cstr_to_string(pointer: *const u16) -> String {
    if pointer.is_null() {
        return String::new();
    }
    let mut length = 0;
    while *pointer.add(length) != 0 {
        length += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(pointer, length))
}

/// Menu registration service handed to plugins. Registrations are
/// recorded in the log; no menu surface exists to attach them to.
unsafe extern "C" fn register_menu_item_stub(
    label: *const u16,
    _command: Option<MenuCommandFn>,
    _context: *mut c_void,
) {
    let label = wide_cstr_to_string(label);
    tracing::debug!(%label, "plugin menu item registration recorded");
}
