//! Call-scoped bridges from snapshot types to their C ABI views
//!
//! A bridge owns every allocation a view points into (flat record
//! arrays, per-process thread arrays, null-terminated UTF-16 names) and
//! hands out a borrowed view. The view's pointers stay valid exactly as
//! long as the bridge is alive, so the host keeps the bridge on the
//! stack for the whole broadcast and drops it only after the last hook
//! has returned.

use std::ptr;

use crate::plugin::api::{
    HandleRecord, HandleSnapshotView, ProcessRecord, ProcessSnapshotView, ThreadRecord,
};
use crate::snapshot::handle::HandleSnapshot;
use crate::snapshot::process::ProcessSnapshot;

/// Owns the flattened form of one process snapshot.
pub(crate) struct ProcessBridge {
    records: Vec<ProcessRecord>,
    // Backing storage the records point into. Both vectors are fully
    // populated before any record takes a pointer, so the inner
    // allocations never move afterwards.
    _names: Vec<Vec<u16>>,
    _thread_arrays: Vec<Vec<ThreadRecord>>,
}

impl ProcessBridge {
    pub fn new(snapshot: &ProcessSnapshot) -> Self {
        let processes = snapshot.processes();

        let names: Vec<Vec<u16>> = processes
            .iter()
            .map(|process| {
                let mut wide: Vec<u16> = process.image_name.encode_utf16().collect();
                wide.push(0);
                wide
            })
            .collect();

        let thread_arrays: Vec<Vec<ThreadRecord>> = processes
            .iter()
            .map(|process| {
                process
                    .threads
                    .iter()
                    .map(|thread| ThreadRecord {
                        thread_id: thread.thread_id,
                        owning_process_id: thread.owning_process_id,
                        priority: thread.priority,
                        state: thread.state,
                        wait_reason: thread.wait_reason,
                        kernel_time_100ns: thread.kernel_time_100ns,
                        user_time_100ns: thread.user_time_100ns,
                    })
                    .collect()
            })
            .collect();

        let records = processes
            .iter()
            .enumerate()
            .map(|(index, process)| ProcessRecord {
                image_name: names[index].as_ptr(),
                process_id: process.process_id,
                thread_count: process.thread_count,
                working_set_bytes: process.working_set_bytes,
                private_bytes: process.private_bytes,
                kernel_time_100ns: process.kernel_time_100ns,
                user_time_100ns: process.user_time_100ns,
                threads: if thread_arrays[index].is_empty() {
                    ptr::null()
                } else {
                    thread_arrays[index].as_ptr()
                },
                thread_record_count: thread_arrays[index].len(),
            })
            .collect();

        Self {
            records,
            _names: names,
            _thread_arrays: thread_arrays,
        }
    }

    pub fn view(&self) -> ProcessSnapshotView {
        ProcessSnapshotView {
            processes: if self.records.is_empty() {
                ptr::null()
            } else {
                self.records.as_ptr()
            },
            process_count: self.records.len(),
        }
    }
}

/// Owns the flattened form of one handle snapshot.
pub(crate) struct HandleBridge {
    records: Vec<HandleRecord>,
}

impl HandleBridge {
    pub fn new(snapshot: &HandleSnapshot) -> Self {
        let records = snapshot
            .handles()
            .iter()
            .map(|handle| HandleRecord {
                process_id: handle.process_id,
                handle_value: handle.handle_value,
                object_type_index: handle.object_type_index,
                attributes: handle.attributes,
                granted_access: handle.granted_access,
            })
            .collect();
        Self { records }
    }

    pub fn view(&self) -> HandleSnapshotView {
        HandleSnapshotView {
            handles: if self.records.is_empty() {
                ptr::null()
            } else {
                self.records.as_ptr()
            },
            handle_count: self.records.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::handle::HandleEntry;
    use crate::snapshot::process::{ProcessEntry, ThreadEntry};

    fn sample_process_snapshot() -> ProcessSnapshot {
        ProcessSnapshot::from_entries(vec![
            ProcessEntry {
                image_name: "init.exe".to_string(),
                process_id: 1,
                parent_process_id: 0,
                thread_count: 1,
                working_set_bytes: 4096,
                private_bytes: 2048,
                kernel_time_100ns: 10,
                user_time_100ns: 20,
                threads: vec![ThreadEntry {
                    thread_id: 11,
                    owning_process_id: 1,
                    priority: 8,
                    state: 5,
                    wait_reason: 0,
                    kernel_time_100ns: 10,
                    user_time_100ns: 20,
                }],
            },
            ProcessEntry {
                image_name: "empty.exe".to_string(),
                process_id: 2,
                parent_process_id: 1,
                thread_count: 0,
                working_set_bytes: 0,
                private_bytes: 0,
                kernel_time_100ns: 0,
                user_time_100ns: 0,
                threads: Vec::new(),
            },
        ])
    }

    /// Reads a null-terminated UTF-16 string back out of a view.
    unsafe fn read_wide_cstr(pointer: *const u16) -> String {
        let mut length = 0;
        while *pointer.add(length) != 0 {
            length += 1;
        }
        String::from_utf16_lossy(std::slice::from_raw_parts(pointer, length))
    }

    #[test]
    fn process_view_round_trips_names_and_threads() {
        let snapshot = sample_process_snapshot();
        let bridge = ProcessBridge::new(&snapshot);
        let view = bridge.view();

        assert_eq!(view.process_count, 2);
        // SAFETY: the bridge outlives every pointer read below.
        unsafe {
            let records = std::slice::from_raw_parts(view.processes, view.process_count);
            assert_eq!(records[0].process_id, 1);
            assert_eq!(read_wide_cstr(records[0].image_name), "init.exe");
            assert_eq!(records[0].thread_record_count, 1);
            let threads =
                std::slice::from_raw_parts(records[0].threads, records[0].thread_record_count);
            assert_eq!(threads[0].thread_id, 11);
            assert_eq!(threads[0].owning_process_id, 1);

            assert_eq!(records[1].thread_record_count, 0);
            assert!(records[1].threads.is_null());
        }
    }

    #[test]
    fn empty_snapshots_produce_null_views() {
        let process_view = ProcessBridge::new(&ProcessSnapshot::default()).view();
        assert!(process_view.processes.is_null());
        assert_eq!(process_view.process_count, 0);

        let handle_view = HandleBridge::new(&HandleSnapshot::default()).view();
        assert!(handle_view.handles.is_null());
        assert_eq!(handle_view.handle_count, 0);
    }

    #[test]
    fn handle_view_maps_all_fields() {
        let snapshot = HandleSnapshot::from_entries(vec![HandleEntry {
            process_id: 4,
            handle_value: 0x1C,
            object_type_index: 7,
            attributes: 0x2,
            granted_access: 0x1F0003,
        }]);
        let bridge = HandleBridge::new(&snapshot);
        let view = bridge.view();

        assert_eq!(view.handle_count, 1);
        // SAFETY: the bridge outlives the pointer read.
        let record = unsafe { *view.handles };
        assert_eq!(record.process_id, 4);
        assert_eq!(record.handle_value, 0x1C);
        assert_eq!(record.object_type_index, 7);
        assert_eq!(record.granted_access, 0x1F0003);
    }
}
