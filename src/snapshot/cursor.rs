//! Bounds-checked reading of fixed-layout records from raw query buffers
//!
//! The native system queries return opaque byte buffers containing
//! variable-length, offset-linked records. `RecordCursor` replaces raw
//! pointer walking with explicit validation: every read checks that the
//! requested range lies inside the buffer before dereferencing, so a
//! corrupt count or forward offset can never read out of bounds.

use std::mem;
use std::ptr;
use std::slice;

/// Cursor over one raw query buffer.
///
/// The cursor tracks the byte offset of the record currently being
/// decoded; reads are relative to that position and never move it.
/// [`advance`](Self::advance) follows the forward offset stored in a
/// record to reach the next one.
pub(crate) struct RecordCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Byte offset of the record currently under the cursor.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Reads one fixed-layout record at the cursor position.
    pub fn read_record<T: Copy>(&self) -> Option<T> {
        self.read_at(0)
    }

    /// Reads `count` consecutive fixed-layout records starting `rel` bytes
    /// past the cursor position.
    pub fn read_array<T: Copy>(&self, rel: usize, count: usize) -> Option<Vec<T>> {
        let stride = mem::size_of::<T>();
        let total = stride.checked_mul(count)?;
        let start = self.offset.checked_add(rel)?;
        let end = start.checked_add(total)?;
        if end > self.data.len() {
            return None;
        }

        let mut records = Vec::with_capacity(count);
        for index in 0..count {
            // SAFETY: start + index * stride + stride <= end <= data.len()
            // was verified above, and T is a plain Copy record that may be
            // read unaligned.
            let record = unsafe {
                ptr::read_unaligned(self.data.as_ptr().add(start + index * stride) as *const T)
            };
            records.push(record);
        }
        Some(records)
    }

    fn read_at<T: Copy>(&self, rel: usize) -> Option<T> {
        let start = self.offset.checked_add(rel)?;
        let end = start.checked_add(mem::size_of::<T>())?;
        if end > self.data.len() {
            return None;
        }
        // SAFETY: [start, end) lies inside `data` and T is a plain Copy
        // record that may be read unaligned.
        Some(unsafe { ptr::read_unaligned(self.data.as_ptr().add(start) as *const T) })
    }

    /// Follows the forward byte offset stored in the current record.
    ///
    /// Returns `false` when the offset would land on or past the end of
    /// the buffer; callers treat that as a malformed chain.
    pub fn advance(&mut self, next_entry_offset: u32) -> bool {
        match self.offset.checked_add(next_entry_offset as usize) {
            Some(next) if next < self.data.len() => {
                self.offset = next;
                true
            }
            _ => false,
        }
    }

    /// Copies a counted UTF-16 string out of the buffer.
    ///
    /// The OS stores image names as absolute pointers into the query
    /// buffer itself; the pointer range is validated to lie inside the
    /// buffer before it is read. `length_bytes` is in bytes, per the
    /// native counted-string convention.
    pub fn read_wide_str(&self, buffer: *const u16, length_bytes: usize) -> Option<String> {
        if buffer.is_null() || length_bytes == 0 {
            return None;
        }
        let base = self.data.as_ptr() as usize;
        let start = buffer as usize;
        let end = start.checked_add(length_bytes)?;
        if start < base || end > base + self.data.len() {
            return None;
        }
        // SAFETY: [start, end) was verified to lie inside `data`.
        let chars = unsafe { slice::from_raw_parts(buffer, length_bytes / 2) };
        Some(String::from_utf16_lossy(chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Pair {
        first: u32,
        second: u32,
    }

    #[test]
    fn read_record_within_bounds() {
        let data = [1u8, 0, 0, 0, 2, 0, 0, 0];
        let cursor = RecordCursor::new(&data);
        let pair: Pair = cursor.read_record().expect("record fits");
        assert_eq!(pair, Pair { first: 1, second: 2 });
    }

    #[test]
    fn read_record_rejects_truncated_buffer() {
        let data = [1u8, 0, 0];
        let cursor = RecordCursor::new(&data);
        assert!(cursor.read_record::<Pair>().is_none());
    }

    #[test]
    fn read_array_rejects_overlong_count() {
        let data = [0u8; 16];
        let cursor = RecordCursor::new(&data);
        assert!(cursor.read_array::<Pair>(0, 2).is_some());
        assert!(cursor.read_array::<Pair>(0, 3).is_none());
        // count * stride overflow must not panic
        assert!(cursor.read_array::<Pair>(0, usize::MAX).is_none());
    }

    #[test]
    fn advance_stops_at_buffer_end() {
        let data = [0u8; 32];
        let mut cursor = RecordCursor::new(&data);
        assert!(cursor.advance(16));
        assert_eq!(cursor.position(), 16);
        assert!(!cursor.advance(16));
        assert!(!cursor.advance(u32::MAX));
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn wide_str_must_lie_inside_buffer() {
        let text: Vec<u16> = "notepad.exe".encode_utf16().collect();
        let bytes: Vec<u8> = text.iter().flat_map(|c| c.to_le_bytes()).collect();
        let cursor = RecordCursor::new(&bytes);

        let inside = cursor.read_wide_str(bytes.as_ptr() as *const u16, bytes.len());
        assert_eq!(inside.as_deref(), Some("notepad.exe"));

        let outside = [0u16; 4];
        assert!(cursor
            .read_wide_str(outside.as_ptr(), outside.len() * 2)
            .is_none());
        assert!(cursor.read_wide_str(std::ptr::null(), 8).is_none());
    }
}
