//! Frame delivery: FIFO hand-off of completed frames to the consumer.

use hd_common::FrameLocation;

use crate::backend::{DecodeStatus, FrameMemory};
use crate::layout::OutputLayout;

/// Read/write cursor over a ring of frame slots.
///
/// `next_out` is the oldest buffered slot; the `buffered` slots after it
/// (wrapping) hold frames not yet handed out.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryCursor {
    buffered: usize,
    next_out: usize,
}

impl DeliveryCursor {
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn next_out(&self) -> usize {
        self.next_out
    }

    /// Slot the next frame goes into, in a ring of `len` slots.
    pub fn write_position(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            (self.next_out + self.buffered) % len
        }
    }

    /// Slot holding the most recently written frame.
    pub fn newest(&self, len: usize) -> Option<usize> {
        if self.buffered == 0 || len == 0 {
            None
        } else {
            Some((self.next_out + self.buffered - 1) % len)
        }
    }

    /// Account for a slot inserted at `at`, shifting the read side if the
    /// insertion landed before it.
    pub fn slot_inserted(&mut self, at: usize) {
        if self.buffered > 0 && at <= self.next_out {
            self.next_out += 1;
        }
    }

    /// A frame was written to the write position.
    pub fn push(&mut self) {
        self.buffered += 1;
    }

    /// Forget the newest frame; its slot becomes the write position again.
    pub fn retract(&mut self) {
        self.buffered = self.buffered.saturating_sub(1);
    }

    /// Hand out the oldest buffered slot.
    pub fn pop(&mut self, len: usize) -> Option<usize> {
        if self.buffered == 0 || len == 0 {
            return None;
        }
        let slot = self.next_out;
        self.next_out = (self.next_out + 1) % len;
        self.buffered -= 1;
        Some(slot)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-frame metadata recorded alongside the pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameMeta {
    pub timestamp: i64,
    /// Position in presentation order, counting every frame written.
    pub index: u64,
    /// Submission order of the source picture, when known.
    pub decode_order: Option<u64>,
    pub status: DecodeStatus,
    pub layout: OutputLayout,
}

/// A decoded frame borrowed from the pool.
///
/// The memory stays owned by the decoder and is reused once the ring wraps
/// around; copy it out before decoding further if it must persist.
#[derive(Debug)]
pub struct Frame<'a, M> {
    pub memory: &'a M,
    pub meta: FrameMeta,
}

impl<'a, M: FrameMemory> Frame<'a, M> {
    pub fn timestamp(&self) -> i64 {
        self.meta.timestamp
    }

    pub fn index(&self) -> u64 {
        self.meta.index
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.meta.layout
    }

    pub fn size(&self) -> usize {
        self.meta.layout.frame_size()
    }

    pub fn location(&self) -> FrameLocation {
        self.memory.location()
    }

    pub fn device_ptr(&self) -> Option<u64> {
        self.memory.device_ptr()
    }

    /// Pixel bytes of a host-resident frame, exactly [`Frame::size`] long.
    pub fn host_bytes(&self) -> Option<&'a [u8]> {
        let size = self.size();
        self.memory.host_bytes().and_then(|b| b.get(..size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_follows_fifo_and_wraps() {
        let mut cursor = DeliveryCursor::default();
        for _ in 0..3 {
            cursor.push();
        }
        assert_eq!(cursor.pop(3), Some(0));
        assert_eq!(cursor.pop(3), Some(1));
        assert_eq!(cursor.write_position(3), 0);
        cursor.push();
        assert_eq!(cursor.pop(3), Some(2));
        assert_eq!(cursor.pop(3), Some(0));
        assert_eq!(cursor.pop(3), None);
    }

    #[test]
    fn newest_tracks_last_write() {
        let mut cursor = DeliveryCursor::default();
        assert_eq!(cursor.newest(4), None);
        cursor.push();
        cursor.push();
        assert_eq!(cursor.newest(4), Some(1));
        cursor.pop(4);
        assert_eq!(cursor.newest(4), Some(1));
    }

    #[test]
    fn insert_before_read_side_shifts_it() {
        // Ring of two full slots, read side at 1: [b, a] with a oldest.
        let mut cursor = DeliveryCursor::default();
        cursor.push();
        cursor.push();
        cursor.pop(2);
        cursor.push();
        assert_eq!(cursor.next_out(), 1);
        assert_eq!(cursor.write_position(2), 1);

        // The new slot goes in at the write position; the oldest moves to 2.
        cursor.slot_inserted(1);
        cursor.push();
        assert_eq!(cursor.pop(3), Some(2));
        assert_eq!(cursor.pop(3), Some(0));
        assert_eq!(cursor.pop(3), Some(1));
    }

    #[test]
    fn insert_into_empty_ring_keeps_read_side() {
        let mut cursor = DeliveryCursor::default();
        cursor.slot_inserted(0);
        cursor.push();
        assert_eq!(cursor.pop(1), Some(0));
    }

    #[test]
    fn retract_frees_the_newest_slot() {
        let mut cursor = DeliveryCursor::default();
        cursor.push();
        cursor.push();
        cursor.retract();
        assert_eq!(cursor.buffered(), 1);
        assert_eq!(cursor.write_position(2), 1);
    }
}
