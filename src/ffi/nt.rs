//! Fixed-layout records returned by the native system information queries
//!
//! These mirror the partly undocumented structures behind
//! `NtQuerySystemInformation` for the process and handle information
//! classes, including the timing fields the public SDK headers omit.
//! Layout must match the operating system exactly: the process table is a
//! chain of variable-length records linked by `next_entry_offset`, each
//! immediately followed by `number_of_threads` thread records, and the
//! handle table is a count header followed by a flat record array. The
//! decoders read these out of raw query buffers with bounds-checked
//! cursors rather than pointer arithmetic.

/// Information class for the system-wide process/thread table.
pub const SYSTEM_PROCESS_INFORMATION_CLASS: i32 = 5;

/// Information class for the system-wide handle table.
pub const SYSTEM_HANDLE_INFORMATION_CLASS: i32 = 16;

/// Counted UTF-16 string whose buffer points elsewhere inside the same
/// query buffer. `length` is in bytes, not characters.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UnicodeStringRaw {
    pub length: u16,
    pub maximum_length: u16,
    pub buffer: *const u16,
}

/// One record of the system process table (`SYSTEM_PROCESS_INFORMATION`
/// with the extended timing fields). The thread array for the process
/// starts immediately after this record in the buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SystemProcessRecord {
    /// Forward byte offset to the next record; zero marks the last one
    pub next_entry_offset: u32,
    pub number_of_threads: u32,
    pub working_set_private_size: i64,
    pub hard_fault_count: u32,
    pub number_of_threads_high_watermark: u32,
    pub cycle_time: u64,
    pub create_time: i64,
    pub user_time: i64,
    pub kernel_time: i64,
    pub image_name: UnicodeStringRaw,
    pub base_priority: i32,
    pub unique_process_id: usize,
    pub inherited_from_unique_process_id: usize,
    pub handle_count: u32,
    pub session_id: u32,
    pub unique_process_key: usize,
    pub peak_virtual_size: usize,
    pub virtual_size: usize,
    pub page_fault_count: u32,
    pub peak_working_set_size: usize,
    pub working_set_size: usize,
    pub quota_peak_paged_pool_usage: usize,
    pub quota_paged_pool_usage: usize,
    pub quota_peak_non_paged_pool_usage: usize,
    pub quota_non_paged_pool_usage: usize,
    pub pagefile_usage: usize,
    pub peak_pagefile_usage: usize,
    pub private_page_count: usize,
    pub read_operation_count: i64,
    pub write_operation_count: i64,
    pub other_operation_count: i64,
    pub read_transfer_count: i64,
    pub write_transfer_count: i64,
    pub other_transfer_count: i64,
}

/// One per-thread record trailing a [`SystemProcessRecord`]
/// (`SYSTEM_THREAD_INFORMATION`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SystemThreadRecord {
    pub kernel_time: i64,
    pub user_time: i64,
    pub create_time: i64,
    pub wait_time: u32,
    pub start_address: usize,
    pub client_unique_process: usize,
    pub client_unique_thread: usize,
    pub priority: i32,
    pub base_priority: i32,
    pub context_switches: u32,
    pub thread_state: u32,
    pub wait_reason: u32,
}

/// Header of the system handle table (`SYSTEM_HANDLE_INFORMATION`).
/// Entries start at the first offset aligned for [`SystemHandleRecord`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SystemHandleHeader {
    pub number_of_handles: u32,
}

/// One entry of the system handle table
/// (`SYSTEM_HANDLE_TABLE_ENTRY_INFO`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SystemHandleRecord {
    pub unique_process_id: u16,
    pub creator_back_trace_index: u16,
    pub object_type_index: u8,
    pub handle_attributes: u8,
    pub handle_value: u16,
    pub object: usize,
    pub granted_access: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    // The OS writes these structures; on 64-bit Windows their sizes are
    // fixed and the trailing thread array projection depends on them.
    #[test]
    #[cfg(target_pointer_width = "64")]
    fn record_sizes_match_native_layout() {
        assert_eq!(mem::size_of::<SystemProcessRecord>(), 0x100);
        assert_eq!(mem::size_of::<SystemThreadRecord>(), 0x50);
        assert_eq!(mem::size_of::<SystemHandleRecord>(), 0x18);
        assert_eq!(mem::size_of::<UnicodeStringRaw>(), 0x10);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn key_fields_sit_at_native_offsets() {
        assert_eq!(mem::offset_of!(SystemProcessRecord, image_name), 0x38);
        assert_eq!(mem::offset_of!(SystemProcessRecord, unique_process_id), 0x50);
        assert_eq!(
            mem::offset_of!(SystemProcessRecord, inherited_from_unique_process_id),
            0x58
        );
        assert_eq!(mem::offset_of!(SystemThreadRecord, client_unique_process), 0x28);
        assert_eq!(mem::offset_of!(SystemThreadRecord, client_unique_thread), 0x30);
    }
}
