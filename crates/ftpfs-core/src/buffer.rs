//! Growable byte region used by the read window and the write pipeline.
//!
//! A [`TransferBuffer`] is a plain `Vec<u8>` plus the absolute file offset
//! of its first byte. The offset is only meaningful for read windows; for
//! the write-side stream buffer it stays at zero.

use std::borrow::Cow;

/// Contiguous byte region with an absolute starting offset.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    data: Vec<u8>,
    /// Absolute file offset of `data[0]`.
    begin_offset: u64,
}

impl TransferBuffer {
    /// Empty buffer, no allocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, growing the allocation as needed.
    ///
    /// Returns `false` when the allocator refuses to grow the buffer; the
    /// contents are unchanged in that case.
    pub fn add_mem(&mut self, bytes: &[u8]) -> bool {
        if self.data.try_reserve(bytes.len()).is_err() {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    /// Reset length to zero, retaining capacity. The caller resets
    /// `begin_offset` when repositioning a window.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Drop the first `n` bytes, sliding the window forward.
    ///
    /// `begin_offset` advances by `n`; `begin_offset + len` is unchanged.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
        self.begin_offset += n as u64;
    }

    /// The body as lossy UTF-8, for handing to the listing parser.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn begin_offset(&self) -> u64 {
        self.begin_offset
    }

    pub fn set_begin_offset(&mut self, offset: u64) {
        self.begin_offset = offset;
    }

    /// Absolute offset one past the last buffered byte.
    pub fn end_offset(&self) -> u64 {
        self.begin_offset + self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_empty() {
        let buf = TransferBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.begin_offset(), 0);
        assert_eq!(buf.end_offset(), 0);
    }

    #[test]
    fn add_mem_appends() {
        let mut buf = TransferBuffer::new();
        assert!(buf.add_mem(b"hello"));
        assert!(buf.add_mem(b" world"));
        assert_eq!(buf.as_slice(), b"hello world");
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn clear_retains_capacity_and_offset() {
        let mut buf = TransferBuffer::new();
        buf.add_mem(b"0123456789");
        buf.set_begin_offset(40);
        buf.clear();
        assert!(buf.is_empty());
        // Offset is caller-managed; clear leaves it alone.
        assert_eq!(buf.begin_offset(), 40);
        assert_eq!(buf.end_offset(), 40);
    }

    #[test]
    fn consume_slides_the_window() {
        let mut buf = TransferBuffer::new();
        buf.set_begin_offset(100);
        buf.add_mem(b"abcdefgh");
        let end_before = buf.end_offset();

        buf.consume(5);
        assert_eq!(buf.as_slice(), b"fgh");
        assert_eq!(buf.begin_offset(), 105);
        assert_eq!(buf.end_offset(), end_before);
    }

    #[test]
    fn consume_past_end_is_clamped() {
        let mut buf = TransferBuffer::new();
        buf.add_mem(b"abc");
        buf.consume(10);
        assert!(buf.is_empty());
        assert_eq!(buf.begin_offset(), 3);
    }

    #[test]
    fn text_view_is_lossy() {
        let mut buf = TransferBuffer::new();
        buf.add_mem(b"ok\xffok");
        assert_eq!(buf.text(), "ok\u{fffd}ok");
    }
}
