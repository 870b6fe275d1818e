//! Safe RAII wrappers for Windows HANDLEs and loaded libraries
//!
//! These wrappers ensure that process handles and plugin modules are
//! properly released when they go out of scope, preventing resource leaks.

use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, FreeLibrary, HANDLE, HMODULE};
use windows::Win32::System::LibraryLoader::LoadLibraryW;
use windows::Win32::System::Threading::{OpenProcess, PROCESS_ACCESS_RIGHTS};

/// A safe wrapper around a Windows process HANDLE.
/// Automatically closes the handle when dropped.
pub struct ProcessHandle(HANDLE);

impl ProcessHandle {
    /// Opens a process by PID with the specified access rights.
    ///
    /// # Returns
    /// * `Ok(ProcessHandle)` - A wrapped handle to the process
    /// * `Err` - If the process cannot be opened (access denied, process exited, etc.)
    pub fn open(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> windows::core::Result<Self> {
        // SAFETY: OpenProcess is safe to call with valid parameters.
        // We handle the error case where the handle is invalid.
        let handle = unsafe { OpenProcess(access, false, pid)? };
        Ok(Self(handle))
    }

    /// Returns the raw HANDLE for use with Win32 APIs.
    ///
    /// The caller must not use the handle after the ProcessHandle is dropped.
    pub fn as_raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: We own this handle and it's valid (we got it from OpenProcess).
        // CloseHandle is safe to call on a valid handle exactly once.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// A safe wrapper around a dynamically loaded library HMODULE.
/// Releases the module via FreeLibrary when dropped.
pub struct LibraryHandle(HMODULE);

impl LibraryHandle {
    /// Loads the module at `path` into the current process.
    pub fn load(path: &Path) -> windows::core::Result<Self> {
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(once(0)).collect();
        // SAFETY: `wide` is a valid null-terminated UTF-16 path that outlives
        // the call.
        let module = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr()))? };
        Ok(Self(module))
    }

    /// Returns the raw HMODULE for symbol resolution.
    ///
    /// The caller must not use the module after the LibraryHandle is dropped.
    pub fn as_raw(&self) -> HMODULE {
        self.0
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        // SAFETY: We own this module handle; FreeLibrary is called exactly once.
        unsafe {
            let _ = FreeLibrary(self.0);
        }
    }
}
