//! Process and thread snapshot
//!
//! Captures the system-wide process table through the native system
//! information query and decodes its chain of variable-length records
//! into immutable [`ProcessEntry`] values. Also offers on-demand
//! per-process module enumeration and parent/child traversal over one
//! captured snapshot.

use std::collections::HashSet;
use std::mem;

use crate::constants::{IDLE_PROCESS_NAME, UNKNOWN_MODULE_NAME};
use crate::error::CaptureError;
use crate::ffi::nt::{SystemProcessRecord, SystemThreadRecord};
use crate::snapshot::cursor::RecordCursor;

/// Information about a single thread within a captured process.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    /// Thread ID
    pub thread_id: u32,
    /// Process ID of the owning process
    pub owning_process_id: u32,
    /// Dynamic priority
    pub priority: i32,
    /// Scheduler state code
    pub state: u32,
    /// Wait reason code, meaningful when the thread is waiting
    pub wait_reason: u32,
    /// Kernel CPU time in 100-nanosecond ticks
    pub kernel_time_100ns: u64,
    /// User CPU time in 100-nanosecond ticks
    pub user_time_100ns: u64,
}

/// Information about a single process in a captured snapshot.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    /// Executable image name; the idle process reports an empty name and
    /// is displayed with a sentinel label instead
    pub image_name: String,
    /// Process ID (unique within one snapshot)
    pub process_id: u32,
    /// Parent process ID
    pub parent_process_id: u32,
    /// Number of threads, always equal to `threads.len()`
    pub thread_count: u32,
    /// Working set size in bytes
    pub working_set_bytes: u64,
    /// Private (committed) bytes
    pub private_bytes: u64,
    /// Kernel CPU time in 100-nanosecond ticks
    pub kernel_time_100ns: u64,
    /// User CPU time in 100-nanosecond ticks
    pub user_time_100ns: u64,
    /// Per-thread entries captured alongside the process record
    pub threads: Vec<ThreadEntry>,
}

/// Information about one module loaded into a process.
///
/// Scoped to a single [`ProcessSnapshot::enumerate_modules`] call; module
/// lists are not part of the snapshot itself.
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    /// Module short name (e.g. "kernel32.dll")
    pub name: String,
    /// Full path to the module image
    pub path: String,
    /// Base address in the target process
    pub base_address: usize,
    /// Image size in bytes
    pub size_bytes: u32,
}

/// Immutable point-in-time snapshot of every process and thread on the
/// system, ordered ascending by process ID.
#[derive(Debug, Default)]
pub struct ProcessSnapshot {
    processes: Vec<ProcessEntry>,
}

impl ProcessSnapshot {
    /// Captures the system-wide process table.
    ///
    /// Blocks for the duration of the underlying query (tens of
    /// milliseconds on a busy system). On any non-recoverable failure the
    /// returned snapshot has zero entries; no distinct failure signal is
    /// exposed from this call.
    pub fn capture() -> Self {
        let buffer = match query_process_table() {
            Ok(buffer) => buffer,
            Err(error) => {
                tracing::warn!(%error, "process table query failed, returning empty snapshot");
                return Self::default();
            }
        };

        match decode_process_table(&buffer) {
            Ok(processes) => {
                tracing::debug!(count = processes.len(), "captured process snapshot");
                Self { processes }
            }
            Err(error) => {
                tracing::warn!(%error, "process table decode failed, returning empty snapshot");
                Self::default()
            }
        }
    }

    /// All captured processes, ascending and unique by process ID.
    pub fn processes(&self) -> &[ProcessEntry] {
        &self.processes
    }

    /// Enumerates the modules currently loaded into `process_id`.
    ///
    /// Returns an empty list when the process cannot be opened (it exited,
    /// is protected, or access was denied) - an expected outcome given
    /// process lifetime races, not an error. Results are sorted ascending
    /// by base address.
    pub fn enumerate_modules(process_id: u32) -> Vec<ModuleEntry> {
        enumerate_modules_impl(process_id)
    }

    /// Process IDs whose parent is `parent_process_id` (single level).
    pub fn child_processes(&self, parent_process_id: u32) -> Vec<u32> {
        self.processes
            .iter()
            .filter(|process| process.parent_process_id == parent_process_id)
            .map(|process| process.process_id)
            .collect()
    }

    /// Collects the full descendant set of `process_id`.
    ///
    /// Process IDs are reused by the OS, so parent links inside one
    /// snapshot can form apparent cycles; the visited set guarantees the
    /// traversal terminates regardless.
    pub fn descendant_processes(&self, process_id: u32) -> Vec<u32> {
        let mut visited = HashSet::new();
        visited.insert(process_id);

        let mut pending = vec![process_id];
        let mut descendants = Vec::new();
        while let Some(current) = pending.pop() {
            for child in self.child_processes(current) {
                if visited.insert(child) {
                    descendants.push(child);
                    pending.push(child);
                }
            }
        }
        descendants
    }

    #[cfg(test)]
    pub(crate) fn from_entries(processes: Vec<ProcessEntry>) -> Self {
        Self { processes }
    }
}

/// Decodes the offset-linked record chain of a process table buffer.
///
/// Each record is followed in the same buffer by its declared number of
/// thread records; `next_entry_offset == 0` marks the final record. Any
/// record that does not fit the buffer aborts the decode.
fn decode_process_table(buffer: &[u8]) -> Result<Vec<ProcessEntry>, CaptureError> {
    let mut entries = Vec::new();
    if buffer.is_empty() {
        return Ok(entries);
    }

    let mut cursor = RecordCursor::new(buffer);
    loop {
        let offset = cursor.position();
        let record: SystemProcessRecord = cursor
            .read_record()
            .ok_or(CaptureError::MalformedRecord { offset })?;
        let raw_threads: Vec<SystemThreadRecord> = cursor
            .read_array(
                mem::size_of::<SystemProcessRecord>(),
                record.number_of_threads as usize,
            )
            .ok_or(CaptureError::MalformedRecord { offset })?;

        let image_name = cursor
            .read_wide_str(record.image_name.buffer, record.image_name.length as usize)
            .unwrap_or_default();

        let threads = raw_threads
            .iter()
            .map(|thread| ThreadEntry {
                thread_id: thread.client_unique_thread as u32,
                owning_process_id: thread.client_unique_process as u32,
                priority: thread.priority,
                state: thread.thread_state,
                wait_reason: thread.wait_reason,
                kernel_time_100ns: thread.kernel_time as u64,
                user_time_100ns: thread.user_time as u64,
            })
            .collect();

        entries.push(ProcessEntry {
            image_name: if image_name.is_empty() {
                IDLE_PROCESS_NAME.to_string()
            } else {
                image_name
            },
            process_id: record.unique_process_id as u32,
            parent_process_id: record.inherited_from_unique_process_id as u32,
            thread_count: record.number_of_threads,
            working_set_bytes: record.working_set_size as u64,
            private_bytes: record.private_page_count as u64,
            kernel_time_100ns: record.kernel_time as u64,
            user_time_100ns: record.user_time as u64,
            threads,
        });

        if record.next_entry_offset == 0 {
            break;
        }
        if !cursor.advance(record.next_entry_offset) {
            return Err(CaptureError::MalformedRecord { offset });
        }
    }

    entries.sort_unstable_by_key(|process| process.process_id);
    entries.dedup_by_key(|process| process.process_id);
    Ok(entries)
}

/// Derives a module short name from the final path component.
fn module_short_name(path: &str) -> String {
    let name = path.rsplit(['\\', '/']).next().unwrap_or("");
    if name.is_empty() {
        UNKNOWN_MODULE_NAME.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(windows)]
fn query_process_table() -> Result<Vec<u8>, CaptureError> {
    use windows::Wdk::System::SystemInformation::{
        NtQuerySystemInformation, SYSTEM_INFORMATION_CLASS,
    };
    use windows::Win32::Foundation::STATUS_INFO_LENGTH_MISMATCH;

    use crate::constants::{
        MAX_QUERY_ATTEMPTS, PROCESS_TABLE_INITIAL_BYTES, QUERY_SIZE_SLACK_BYTES,
    };
    use crate::ffi::nt::SYSTEM_PROCESS_INFORMATION_CLASS;

    let mut size = PROCESS_TABLE_INITIAL_BYTES;
    for _ in 0..MAX_QUERY_ATTEMPTS {
        let mut buffer = vec![0u8; size];
        let mut returned = 0u32;
        // SAFETY: buffer points at `size` writable bytes and stays alive
        // for the duration of the call.
        let status = unsafe {
            NtQuerySystemInformation(
                SYSTEM_INFORMATION_CLASS(SYSTEM_PROCESS_INFORMATION_CLASS),
                buffer.as_mut_ptr().cast(),
                size as u32,
                &mut returned,
            )
        };

        if status == STATUS_INFO_LENGTH_MISMATCH {
            size = returned as usize + QUERY_SIZE_SLACK_BYTES;
            continue;
        }
        if status.is_ok() {
            buffer.truncate(returned as usize);
            return Ok(buffer);
        }
        return Err(CaptureError::QueryFailed {
            status: status.0 as u32,
        });
    }
    Err(CaptureError::SizeNegotiationExhausted {
        attempts: MAX_QUERY_ATTEMPTS,
    })
}

#[cfg(not(windows))]
fn query_process_table() -> Result<Vec<u8>, CaptureError> {
    Err(CaptureError::Unsupported)
}

#[cfg(windows)]
fn enumerate_modules_impl(process_id: u32) -> Vec<ModuleEntry> {
    use windows::Win32::Foundation::{HMODULE, MAX_PATH};
    use windows::Win32::System::ProcessStatus::{
        EnumProcessModulesEx, GetModuleFileNameExW, GetModuleInformation, LIST_MODULES_ALL,
        MODULEINFO,
    };
    use windows::Win32::System::Threading::{PROCESS_QUERY_INFORMATION, PROCESS_VM_READ};

    use crate::constants::{MAX_QUERY_ATTEMPTS, MODULE_LIST_INITIAL_CAPACITY};
    use crate::ffi::ProcessHandle;

    let mut modules = Vec::new();
    if process_id == 0 {
        return modules;
    }

    // Open failure (exit race, protected process, access denied) is an
    // expected outcome and yields an empty list.
    let process = match ProcessHandle::open(process_id, PROCESS_QUERY_INFORMATION | PROCESS_VM_READ)
    {
        Ok(handle) => handle,
        Err(_) => return modules,
    };

    let mut handles: Vec<HMODULE> = vec![HMODULE::default(); MODULE_LIST_INITIAL_CAPACITY];
    let mut needed = 0u32;
    let mut attempts = 0;
    loop {
        let capacity_bytes = (handles.len() * mem::size_of::<HMODULE>()) as u32;
        // SAFETY: `handles` points at `capacity_bytes` writable bytes and
        // the process handle is valid for the duration of the call.
        let result = unsafe {
            EnumProcessModulesEx(
                process.as_raw(),
                handles.as_mut_ptr(),
                capacity_bytes,
                &mut needed,
                LIST_MODULES_ALL,
            )
        };
        if result.is_err() {
            return modules;
        }

        let count = needed as usize / mem::size_of::<HMODULE>();
        if needed <= capacity_bytes {
            handles.truncate(count);
            break;
        }

        attempts += 1;
        if attempts >= MAX_QUERY_ATTEMPTS {
            return modules;
        }
        handles.resize(count, HMODULE::default());
    }

    for module in handles {
        if module.is_invalid() {
            continue;
        }

        let mut info = MODULEINFO::default();
        // SAFETY: both handles are valid and `info` is a writable MODULEINFO.
        let queried = unsafe {
            GetModuleInformation(
                process.as_raw(),
                module,
                &mut info,
                mem::size_of::<MODULEINFO>() as u32,
            )
        };
        if queried.is_err() {
            continue;
        }

        let mut path_buffer = [0u16; MAX_PATH as usize];
        // SAFETY: `path_buffer` is a writable wide buffer; the API returns
        // the number of characters written.
        let path_length =
            unsafe { GetModuleFileNameExW(process.as_raw(), module, &mut path_buffer) };
        let path = String::from_utf16_lossy(&path_buffer[..path_length as usize]);

        modules.push(ModuleEntry {
            name: module_short_name(&path),
            path,
            base_address: info.lpBaseOfDll as usize,
            size_bytes: info.SizeOfImage,
        });
    }

    modules.sort_unstable_by_key(|module| module.base_address);
    modules
}

#[cfg(not(windows))]
fn enumerate_modules_impl(_process_id: u32) -> Vec<ModuleEntry> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::nt::UnicodeStringRaw;

    struct ProcessSpec {
        pid: u32,
        parent: u32,
        name: &'static str,
        threads: Vec<(u32, u32)>,
    }

    /// Assembles a synthetic process table buffer in the native layout:
    /// record, trailing thread array, then the UTF-16 image name bytes,
    /// with the counted-string pointer patched to the name's location.
    fn build_process_table(specs: &[ProcessSpec]) -> Vec<u8> {
        let record_size = mem::size_of::<SystemProcessRecord>();
        let thread_size = mem::size_of::<SystemThreadRecord>();

        let total: usize = specs
            .iter()
            .map(|spec| record_size + spec.threads.len() * thread_size + spec.name.len() * 2)
            .sum();
        let mut buffer = Vec::with_capacity(total);
        let mut name_patches = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            let record_offset = buffer.len();
            let name_bytes = spec.name.len() * 2;
            let entry_size = record_size + spec.threads.len() * thread_size + name_bytes;

            // SAFETY: zeroed is a valid value for this plain repr(C) record.
            let mut record: SystemProcessRecord = unsafe { mem::zeroed() };
            record.next_entry_offset = if index + 1 == specs.len() {
                0
            } else {
                entry_size as u32
            };
            record.number_of_threads = spec.threads.len() as u32;
            record.unique_process_id = spec.pid as usize;
            record.inherited_from_unique_process_id = spec.parent as usize;
            record.working_set_size = 4096 * (index + 1);
            record.private_page_count = 2048 * (index + 1);
            record.kernel_time = 100;
            record.user_time = 200;
            record.image_name = UnicodeStringRaw {
                length: name_bytes as u16,
                maximum_length: name_bytes as u16,
                buffer: std::ptr::null(),
            };
            push_struct(&mut buffer, &record);

            for &(tid, owner) in &spec.threads {
                // SAFETY: zeroed is a valid value for this plain repr(C) record.
                let mut thread: SystemThreadRecord = unsafe { mem::zeroed() };
                thread.client_unique_thread = tid as usize;
                thread.client_unique_process = owner as usize;
                thread.priority = 8;
                thread.thread_state = 5;
                push_struct(&mut buffer, &thread);
            }

            if name_bytes > 0 {
                let name_offset = buffer.len();
                for unit in spec.name.encode_utf16() {
                    buffer.extend_from_slice(&unit.to_le_bytes());
                }
                name_patches.push((record_offset, name_offset));
            }
        }

        // Patch the counted-string pointers now that the buffer will no
        // longer grow.
        let pointer_field = mem::offset_of!(SystemProcessRecord, image_name)
            + mem::offset_of!(UnicodeStringRaw, buffer);
        for (record_offset, name_offset) in name_patches {
            // SAFETY: name_offset points inside `buffer`, which outlives the
            // decode in every test.
            let pointer = unsafe { buffer.as_ptr().add(name_offset) } as usize;
            let field = record_offset + pointer_field;
            buffer[field..field + mem::size_of::<usize>()]
                .copy_from_slice(&pointer.to_ne_bytes());
        }
        buffer
    }

    fn push_struct<T: Copy>(buffer: &mut Vec<u8>, value: &T) {
        // SAFETY: T is a zero-initialized plain repr(C) record, so every
        // byte (including padding) is initialized.
        let bytes = unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>())
        };
        buffer.extend_from_slice(bytes);
    }

    fn entry(pid: u32, parent: u32) -> ProcessEntry {
        ProcessEntry {
            image_name: format!("proc{pid}.exe"),
            process_id: pid,
            parent_process_id: parent,
            thread_count: 0,
            working_set_bytes: 0,
            private_bytes: 0,
            kernel_time_100ns: 0,
            user_time_100ns: 0,
            threads: Vec::new(),
        }
    }

    #[test]
    fn decode_sorts_by_pid_and_maps_fields() {
        let buffer = build_process_table(&[
            ProcessSpec {
                pid: 400,
                parent: 4,
                name: "svchost.exe",
                threads: vec![(401, 400), (402, 400)],
            },
            ProcessSpec {
                pid: 4,
                parent: 0,
                name: "System",
                threads: vec![(8, 4)],
            },
        ]);

        let entries = decode_process_table(&buffer).expect("decode succeeds");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].process_id, 4);
        assert_eq!(entries[0].image_name, "System");
        assert_eq!(entries[1].process_id, 400);
        assert_eq!(entries[1].parent_process_id, 4);
        assert_eq!(entries[1].thread_count, 2);
        assert_eq!(entries[1].threads.len(), 2);
        assert_eq!(entries[1].threads[0].thread_id, 401);
        assert_eq!(entries[1].threads[0].owning_process_id, 400);
        assert_eq!(entries[1].kernel_time_100ns, 100);
        assert_eq!(entries[1].user_time_100ns, 200);
    }

    #[test]
    fn decode_upholds_thread_count_invariant() {
        let buffer = build_process_table(&[ProcessSpec {
            pid: 100,
            parent: 1,
            name: "a.exe",
            threads: vec![(101, 100), (102, 100), (103, 100)],
        }]);

        let entries = decode_process_table(&buffer).expect("decode succeeds");
        for process in &entries {
            assert_eq!(process.thread_count as usize, process.threads.len());
            if process.thread_count > 0 {
                assert!(process
                    .threads
                    .iter()
                    .any(|thread| thread.owning_process_id == process.process_id));
            }
        }
    }

    #[test]
    fn empty_image_name_maps_to_idle_label() {
        let buffer = build_process_table(&[ProcessSpec {
            pid: 0,
            parent: 0,
            name: "",
            threads: vec![(0, 0)],
        }]);

        let entries = decode_process_table(&buffer).expect("decode succeeds");
        assert_eq!(entries[0].image_name, IDLE_PROCESS_NAME);
    }

    #[test]
    fn decode_rejects_thread_array_past_buffer_end() {
        let mut buffer = build_process_table(&[ProcessSpec {
            pid: 10,
            parent: 1,
            name: "",
            threads: vec![],
        }]);
        // Claim more threads than the buffer holds.
        let count_offset = mem::offset_of!(SystemProcessRecord, number_of_threads);
        buffer[count_offset..count_offset + 4].copy_from_slice(&1000u32.to_ne_bytes());

        assert!(matches!(
            decode_process_table(&buffer),
            Err(CaptureError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn decode_rejects_forward_offset_past_buffer_end() {
        let mut buffer = build_process_table(&[ProcessSpec {
            pid: 10,
            parent: 1,
            name: "",
            threads: vec![],
        }]);
        let offset_field = mem::offset_of!(SystemProcessRecord, next_entry_offset);
        buffer[offset_field..offset_field + 4].copy_from_slice(&0xFFFF_0000u32.to_ne_bytes());

        assert!(matches!(
            decode_process_table(&buffer),
            Err(CaptureError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn decode_deduplicates_pids() {
        let buffer = build_process_table(&[
            ProcessSpec {
                pid: 7,
                parent: 1,
                name: "one.exe",
                threads: vec![],
            },
            ProcessSpec {
                pid: 7,
                parent: 1,
                name: "two.exe",
                threads: vec![],
            },
        ]);

        let entries = decode_process_table(&buffer).expect("decode succeeds");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn empty_buffer_decodes_to_zero_entries() {
        assert!(decode_process_table(&[]).expect("empty is valid").is_empty());
    }

    #[test]
    fn child_processes_filters_single_level() {
        let snapshot = ProcessSnapshot::from_entries(vec![
            entry(1, 0),
            entry(2, 1),
            entry(3, 1),
            entry(4, 2),
        ]);

        let children = snapshot.child_processes(1);
        assert_eq!(children, vec![2, 3]);
        assert!(snapshot.child_processes(99).is_empty());
    }

    #[test]
    fn descendants_cover_full_subtree() {
        let snapshot = ProcessSnapshot::from_entries(vec![
            entry(1, 0),
            entry(2, 1),
            entry(3, 2),
            entry(4, 3),
            entry(9, 7),
        ]);

        let mut descendants = snapshot.descendant_processes(1);
        descendants.sort_unstable();
        assert_eq!(descendants, vec![2, 3, 4]);
    }

    #[test]
    fn descendants_terminate_on_pid_reuse_cycle() {
        // 5 and 6 claim each other as parent, as can happen when the OS
        // reuses a process id between the birth of the two processes.
        let snapshot = ProcessSnapshot::from_entries(vec![entry(5, 6), entry(6, 5)]);

        let descendants = snapshot.descendant_processes(5);
        assert_eq!(descendants, vec![6]);
    }

    #[test]
    fn module_short_name_uses_final_component() {
        assert_eq!(
            module_short_name("C:\\Windows\\System32\\kernel32.dll"),
            "kernel32.dll"
        );
        assert_eq!(module_short_name("/usr/lib/libfoo.so"), "libfoo.so");
        assert_eq!(module_short_name("bare.dll"), "bare.dll");
        assert_eq!(module_short_name(""), UNKNOWN_MODULE_NAME);
        assert_eq!(module_short_name("C:\\trailing\\"), UNKNOWN_MODULE_NAME);
    }

    #[test]
    fn enumerate_modules_for_dead_pid_is_empty() {
        // PID 0 is the idle process and can never be opened; a stale PID
        // behaves the same way.
        assert!(ProcessSnapshot::enumerate_modules(0).is_empty());
    }

    #[cfg(windows)]
    #[test]
    fn live_capture_contains_current_process() {
        let snapshot = ProcessSnapshot::capture();
        let current = std::process::id();
        let own_entry = snapshot
            .processes()
            .iter()
            .find(|process| process.process_id == current)
            .expect("current process present in snapshot");
        assert!(!own_entry.threads.is_empty());

        // Strictly increasing process ids imply uniqueness.
        for pair in snapshot.processes().windows(2) {
            assert!(pair[0].process_id < pair[1].process_id);
        }
    }

    #[cfg(windows)]
    #[test]
    fn live_captures_are_independent() {
        let first = ProcessSnapshot::capture();
        let first_count = first.processes().len();
        let second = ProcessSnapshot::capture();
        drop(second);
        assert_eq!(first.processes().len(), first_count);
    }

    #[cfg(windows)]
    #[test]
    fn live_module_enumeration_is_sorted_by_base() {
        let modules = ProcessSnapshot::enumerate_modules(std::process::id());
        assert!(!modules.is_empty());
        for pair in modules.windows(2) {
            assert!(pair[0].base_address <= pair[1].base_address);
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn capture_off_windows_is_silently_empty() {
        assert!(ProcessSnapshot::capture().processes().is_empty());
    }
}
