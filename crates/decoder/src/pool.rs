//! Frame buffer pool.
//!
//! Owns the memory decoded frames are copied into. Slots are allocated
//! lazily, one per frame the consumer has not caught up with, until the
//! configured capacity is reached. From then on the pool stops growing and
//! applies backpressure by overwriting the newest buffered frame: the
//! consumer always sees the oldest frames it has not yet taken plus the
//! latest picture, and never more than `capacity` frames.

use tracing::{debug, trace};

use hd_common::{DecodeResult, FrameLocation};

use crate::backend::{FrameMemory, HwDecodeBackend};
use crate::delivery::{DeliveryCursor, Frame, FrameMeta};

/// How a frame landed in the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotWrite {
    /// Written into a slot whose previous frame was already consumed.
    Reused,
    /// Written into a newly allocated slot.
    Appended,
    /// The pool was full; the newest buffered frame was replaced.
    Overwritten,
}

#[derive(Debug)]
struct FrameSlot<M> {
    memory: M,
    meta: Option<FrameMeta>,
}

/// Bounded ring of frame buffers with a FIFO delivery cursor.
#[derive(Debug)]
pub struct FramePool<M> {
    slots: Vec<FrameSlot<M>>,
    capacity: Option<usize>,
    location: FrameLocation,
    cursor: DeliveryCursor,
    next_index: u64,
}

impl<M: FrameMemory> FramePool<M> {
    pub fn new(capacity: Option<usize>, location: FrameLocation) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
            location,
            cursor: DeliveryCursor::default(),
            next_index: 0,
        }
    }

    /// Allocated slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Frames written but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.cursor.buffered()
    }

    /// Frames written so far, overwritten ones included.
    pub fn frames_written(&self) -> u64 {
        self.next_index
    }

    fn can_grow(&self) -> bool {
        self.capacity.map_or(true, |cap| self.slots.len() < cap)
    }

    /// Write one frame, letting `fill` copy pixels into the destination.
    ///
    /// `meta.index` is assigned by the pool. If `fill` fails nothing becomes
    /// visible to the consumer, except on an overwrite, where the replaced
    /// frame is dropped from the queue as well.
    pub fn store<B, F>(&mut self, backend: &mut B, mut meta: FrameMeta, fill: F) -> DecodeResult<SlotWrite>
    where
        B: HwDecodeBackend<Memory = M>,
        F: FnOnce(&mut B, &mut M) -> DecodeResult<()>,
    {
        let size = meta.layout.frame_size();
        let len = self.slots.len();
        meta.index = self.next_index;

        if self.cursor.buffered() < len {
            let at = self.cursor.write_position(len);
            self.refill(backend, at, size, fill)?;
            self.slots[at].meta = Some(meta);
            self.cursor.push();
            self.next_index += 1;
            trace!(slot = at, index = meta.index, "Reused frame slot");
            return Ok(SlotWrite::Reused);
        }

        if self.can_grow() {
            let at = self.cursor.write_position(len);
            let mut memory = backend.alloc_frame(size, self.location)?;
            fill(backend, &mut memory)?;
            self.slots.insert(
                at,
                FrameSlot {
                    memory,
                    meta: Some(meta),
                },
            );
            self.cursor.slot_inserted(at);
            self.cursor.push();
            self.next_index += 1;
            debug!(
                slot = at,
                slots = self.slots.len(),
                size,
                location = ?self.location,
                "Allocated frame slot"
            );
            return Ok(SlotWrite::Appended);
        }

        let Some(at) = self.cursor.newest(len) else {
            // Only reachable with a zero capacity, which config validation rejects.
            return Ok(SlotWrite::Overwritten);
        };
        if let Err(err) = self.refill(backend, at, size, fill) {
            self.slots[at].meta = None;
            self.cursor.retract();
            return Err(err);
        }
        self.slots[at].meta = Some(meta);
        self.next_index += 1;
        trace!(slot = at, index = meta.index, "Pool full, overwrote newest frame");
        Ok(SlotWrite::Overwritten)
    }

    fn refill<B, F>(&mut self, backend: &mut B, at: usize, size: usize, fill: F) -> DecodeResult<()>
    where
        B: HwDecodeBackend<Memory = M>,
        F: FnOnce(&mut B, &mut M) -> DecodeResult<()>,
    {
        let slot = &mut self.slots[at];
        if slot.memory.len() < size {
            debug!(slot = at, old = slot.memory.len(), new = size, "Growing frame slot");
            slot.memory = backend.alloc_frame(size, self.location)?;
        }
        fill(backend, &mut slot.memory)
    }

    /// Hand out the oldest buffered frame.
    pub fn next_frame(&mut self) -> Option<Frame<'_, M>> {
        let at = self.cursor.pop(self.slots.len())?;
        let slot = &self.slots[at];
        let meta = slot.meta?;
        Some(Frame {
            memory: &slot.memory,
            meta,
        })
    }

    /// Release every slot.
    pub fn clear(&mut self) {
        if !self.slots.is_empty() {
            debug!(slots = self.slots.len(), "Releasing frame pool");
        }
        self.slots.clear();
        self.cursor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DecodeStatus;
    use crate::layout::OutputLayout;
    use crate::sim::SimulatedDevice;
    use hd_common::{DecodeError, SurfaceFormat};

    fn meta(timestamp: i64) -> FrameMeta {
        FrameMeta {
            timestamp,
            index: 0,
            decode_order: None,
            status: DecodeStatus::Success,
            layout: OutputLayout::new(SurfaceFormat::Nv12, 0, 4, 2, 2),
        }
    }

    fn write(pool: &mut FramePool<crate::sim::SimFrame>, dev: &mut SimulatedDevice, ts: i64) -> SlotWrite {
        pool.store(dev, meta(ts), |_, mem| {
            mem.fill(ts as u8);
            Ok(())
        })
        .unwrap()
    }

    fn drain(pool: &mut FramePool<crate::sim::SimFrame>) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(frame) = pool.next_frame() {
            out.push(frame.timestamp());
        }
        out
    }

    #[test]
    fn unbounded_pool_keeps_everything_in_order() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(None, FrameLocation::Host);
        for ts in 0..10 {
            assert_eq!(write(&mut pool, &mut dev, ts), SlotWrite::Appended);
        }
        assert_eq!(pool.len(), 10);
        assert_eq!(drain(&mut pool), (0..10).collect::<Vec<_>>());
        assert!(pool.next_frame().is_none());
    }

    #[test]
    fn consumed_slots_are_reused() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(None, FrameLocation::Host);
        for round in 0..5 {
            write(&mut pool, &mut dev, round);
            assert_eq!(drain(&mut pool), vec![round]);
        }
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.frames_written(), 5);
    }

    #[test]
    fn bounded_pool_overwrites_newest() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(Some(3), FrameLocation::Host);
        for ts in 0..10 {
            let how = write(&mut pool, &mut dev, ts);
            if ts < 3 {
                assert_eq!(how, SlotWrite::Appended);
            } else {
                assert_eq!(how, SlotWrite::Overwritten);
            }
            assert!(pool.buffered() <= 3);
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(drain(&mut pool), vec![0, 1, 9]);
    }

    #[test]
    fn growth_after_partial_drain_preserves_fifo() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(Some(4), FrameLocation::Host);
        write(&mut pool, &mut dev, 0);
        write(&mut pool, &mut dev, 1);
        assert_eq!(pool.next_frame().map(|f| f.timestamp()), Some(0));
        write(&mut pool, &mut dev, 2);
        write(&mut pool, &mut dev, 3);
        write(&mut pool, &mut dev, 4);
        assert_eq!(pool.len(), 4);
        assert_eq!(drain(&mut pool), vec![1, 2, 3, 4]);
    }

    #[test]
    fn frame_index_counts_every_write() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(Some(1), FrameLocation::Host);
        write(&mut pool, &mut dev, 10);
        write(&mut pool, &mut dev, 20);
        let frame = pool.next_frame().unwrap();
        assert_eq!(frame.timestamp(), 20);
        assert_eq!(frame.index(), 1);
        assert_eq!(frame.host_bytes().map(|b| b.len()), Some(12));
    }

    #[test]
    fn failed_fill_is_not_delivered() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(None, FrameLocation::Host);
        write(&mut pool, &mut dev, 0);
        let err = pool
            .store(&mut dev, meta(1), |_, _| Err(DecodeError::NotInitialized))
            .unwrap_err();
        assert!(matches!(err, DecodeError::NotInitialized));
        assert_eq!(pool.buffered(), 1);
        assert_eq!(drain(&mut pool), vec![0]);
    }

    #[test]
    fn failed_overwrite_drops_the_replaced_frame() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(Some(2), FrameLocation::Host);
        write(&mut pool, &mut dev, 0);
        write(&mut pool, &mut dev, 1);
        assert!(pool
            .store(&mut dev, meta(2), |_, _| Err(DecodeError::NotInitialized))
            .is_err());
        assert_eq!(drain(&mut pool), vec![0]);
    }

    #[test]
    fn clear_releases_slots() {
        let mut dev = SimulatedDevice::default();
        let mut pool = FramePool::new(None, FrameLocation::Device);
        write(&mut pool, &mut dev, 0);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.buffered(), 0);
        assert!(pool.next_frame().is_none());
    }
}
