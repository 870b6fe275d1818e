//! Kernel handle snapshot
//!
//! Captures the system-wide handle table through the native system
//! information query. Unlike the process table, the handle table is a
//! flat array of fixed-size records behind a count header, so decoding is
//! a single bounds-checked array projection.

use std::mem;

use crate::error::CaptureError;
use crate::ffi::nt::{SystemHandleHeader, SystemHandleRecord};
use crate::snapshot::cursor::RecordCursor;

/// Information about one open kernel handle.
#[derive(Debug, Clone)]
pub struct HandleEntry {
    /// Process ID of the owning process
    pub process_id: u32,
    /// Handle value within the owning process
    pub handle_value: u16,
    /// Index into the kernel object-type table
    pub object_type_index: u16,
    /// Handle attribute flags
    pub attributes: u32,
    /// Granted access mask
    pub granted_access: u32,
}

/// Immutable point-in-time snapshot of every open handle on the system.
#[derive(Debug, Default)]
pub struct HandleSnapshot {
    handles: Vec<HandleEntry>,
}

impl HandleSnapshot {
    /// Captures the system-wide handle table.
    ///
    /// Blocks for the duration of the underlying query (typically under
    /// 200ms). On any failure the returned snapshot has zero entries,
    /// indistinguishable from a system that legitimately has zero handles;
    /// no distinct failure signal is exposed from this call.
    pub fn capture() -> Self {
        let buffer = match query_handle_table() {
            Ok(buffer) => buffer,
            Err(error) => {
                tracing::warn!(%error, "handle table query failed, returning empty snapshot");
                return Self::default();
            }
        };

        match decode_handle_table(&buffer) {
            Ok(handles) => {
                tracing::debug!(count = handles.len(), "captured handle snapshot");
                Self { handles }
            }
            Err(error) => {
                tracing::warn!(%error, "handle table decode failed, returning empty snapshot");
                Self::default()
            }
        }
    }

    /// All captured handles.
    pub fn handles(&self) -> &[HandleEntry] {
        &self.handles
    }

    /// Handles owned by `process_id`.
    pub fn handles_for_process(&self, process_id: u32) -> Vec<HandleEntry> {
        self.handles
            .iter()
            .filter(|handle| handle.process_id == process_id)
            .cloned()
            .collect()
    }

    /// Number of handles owned by `process_id`.
    pub fn handle_count_for_process(&self, process_id: u32) -> usize {
        self.handles
            .iter()
            .filter(|handle| handle.process_id == process_id)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn from_entries(handles: Vec<HandleEntry>) -> Self {
        Self { handles }
    }
}

/// Decodes the flat handle table: a count header followed by the entry
/// array at the first record-aligned offset.
fn decode_handle_table(buffer: &[u8]) -> Result<Vec<HandleEntry>, CaptureError> {
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    let cursor = RecordCursor::new(buffer);
    let header: SystemHandleHeader = cursor
        .read_record()
        .ok_or(CaptureError::MalformedRecord { offset: 0 })?;

    let entries_offset = align_up(
        mem::size_of::<SystemHandleHeader>(),
        mem::align_of::<SystemHandleRecord>(),
    );
    let raw: Vec<SystemHandleRecord> = cursor
        .read_array(entries_offset, header.number_of_handles as usize)
        .ok_or(CaptureError::MalformedRecord {
            offset: entries_offset,
        })?;

    Ok(raw
        .iter()
        .map(|record| HandleEntry {
            process_id: record.unique_process_id as u32,
            handle_value: record.handle_value,
            object_type_index: record.object_type_index as u16,
            attributes: record.handle_attributes as u32,
            granted_access: record.granted_access,
        })
        .collect())
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(windows)]
fn query_handle_table() -> Result<Vec<u8>, CaptureError> {
    use windows::Wdk::System::SystemInformation::{
        NtQuerySystemInformation, SYSTEM_INFORMATION_CLASS,
    };
    use windows::Win32::Foundation::STATUS_INFO_LENGTH_MISMATCH;

    use crate::constants::{
        HANDLE_TABLE_INITIAL_BYTES, MAX_QUERY_ATTEMPTS, QUERY_SIZE_SLACK_BYTES,
    };
    use crate::ffi::nt::SYSTEM_HANDLE_INFORMATION_CLASS;

    let mut size = HANDLE_TABLE_INITIAL_BYTES;
    for _ in 0..MAX_QUERY_ATTEMPTS {
        let mut buffer = vec![0u8; size];
        let mut returned = 0u32;
        // SAFETY: buffer points at `size` writable bytes and stays alive
        // for the duration of the call.
        let status = unsafe {
            NtQuerySystemInformation(
                SYSTEM_INFORMATION_CLASS(SYSTEM_HANDLE_INFORMATION_CLASS),
                buffer.as_mut_ptr().cast(),
                size as u32,
                &mut returned,
            )
        };

        if status == STATUS_INFO_LENGTH_MISMATCH {
            // The handle table query reports the size it needed at call
            // time; the table may have grown since, hence the slack.
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
fn query_handle_table() -> Result<Vec<u8>, CaptureError> {
    Err(CaptureError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assembles a synthetic handle table buffer: count header, alignment
    /// padding, then the flat record array.
    fn build_handle_table(records: &[(u16, u16, u8, u32)]) -> Vec<u8> {
        let entries_offset = align_up(
            mem::size_of::<SystemHandleHeader>(),
            mem::align_of::<SystemHandleRecord>(),
        );
        let mut buffer = vec![0u8; entries_offset];
        buffer[..4].copy_from_slice(&(records.len() as u32).to_ne_bytes());

        for &(pid, value, type_index, access) in records {
            // SAFETY: zeroed is a valid value for this plain repr(C) record.
            let mut record: SystemHandleRecord = unsafe { mem::zeroed() };
            record.unique_process_id = pid;
            record.handle_value = value;
            record.object_type_index = type_index;
            record.handle_attributes = 0x2;
            record.granted_access = access;
            // SAFETY: record was zero-initialized, so all bytes including
            // padding are initialized.
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    &record as *const SystemHandleRecord as *const u8,
                    mem::size_of::<SystemHandleRecord>(),
                )
            };
            buffer.extend_from_slice(bytes);
        }
        buffer
    }

    #[test]
    fn decode_maps_all_fields() {
        let buffer = build_handle_table(&[
            (4, 0x10, 7, 0x1F0003),
            (100, 0x44, 28, 0x120089),
        ]);

        let handles = decode_handle_table(&buffer).expect("decode succeeds");
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].process_id, 4);
        assert_eq!(handles[0].handle_value, 0x10);
        assert_eq!(handles[0].object_type_index, 7);
        assert_eq!(handles[0].attributes, 0x2);
        assert_eq!(handles[1].granted_access, 0x120089);
    }

    #[test]
    fn decode_rejects_count_past_buffer_end() {
        let mut buffer = build_handle_table(&[(4, 0x10, 7, 0)]);
        buffer[..4].copy_from_slice(&5000u32.to_ne_bytes());

        assert!(matches!(
            decode_handle_table(&buffer),
            Err(CaptureError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn empty_buffer_decodes_to_zero_entries() {
        assert!(decode_handle_table(&[]).expect("empty is valid").is_empty());
    }

    #[test]
    fn filter_and_count_agree() {
        let snapshot = HandleSnapshot::from_entries(vec![
            HandleEntry {
                process_id: 4,
                handle_value: 1,
                object_type_index: 7,
                attributes: 0,
                granted_access: 0,
            },
            HandleEntry {
                process_id: 8,
                handle_value: 2,
                object_type_index: 7,
                attributes: 0,
                granted_access: 0,
            },
            HandleEntry {
                process_id: 4,
                handle_value: 3,
                object_type_index: 30,
                attributes: 0,
                granted_access: 0,
            },
        ]);

        let filtered = snapshot.handles_for_process(4);
        assert_eq!(filtered.len(), snapshot.handle_count_for_process(4));
        assert!(filtered.iter().all(|handle| handle.process_id == 4));
        assert_eq!(snapshot.handle_count_for_process(u32::MAX), 0);
    }

    #[test]
    fn align_up_rounds_to_record_alignment() {
        assert_eq!(align_up(4, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(4, 4), 4);
    }

    #[cfg(not(windows))]
    #[test]
    fn capture_off_windows_is_silently_empty() {
        assert!(HandleSnapshot::capture().handles().is_empty());
    }
}
