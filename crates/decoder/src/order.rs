//! Picture order tracking.
//!
//! The engine decodes pictures in bitstream order but hands them back in
//! display order through surface indices. Recording the submission order per
//! surface lets a displayed picture be traced back to when it was submitted.

use hd_common::{DecodeError, DecodeResult};

/// Surfaces tracked before the first sequence header sizes the arena.
pub const DEFAULT_TRACKED_SURFACES: usize = 32;

/// Decode-surface index → submission counter.
#[derive(Debug)]
pub struct DecodeOrderTracker {
    slots: Vec<Option<u64>>,
    next: u64,
}

impl Default for DecodeOrderTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_SURFACES)
    }
}

impl DecodeOrderTracker {
    pub fn new(surfaces: usize) -> Self {
        Self {
            slots: vec![None; surfaces],
            next: 0,
        }
    }

    /// Resize the arena for a new session. Entries are cleared; the counter
    /// keeps running so orders stay unique across sessions.
    pub fn reset(&mut self, surfaces: usize) {
        self.slots.clear();
        self.slots.resize(surfaces, None);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of pictures recorded so far.
    pub fn submitted(&self) -> u64 {
        self.next
    }

    /// Stamp the surface with the next submission order.
    pub fn record(&mut self, surface: i32) -> DecodeResult<u64> {
        let order = self.next;
        *self.slot_mut(surface)? = Some(order);
        self.next += 1;
        Ok(order)
    }

    /// Submission order of the picture currently held by the surface.
    pub fn lookup(&self, surface: i32) -> Option<u64> {
        usize::try_from(surface)
            .ok()
            .and_then(|i| self.slots.get(i).copied().flatten())
    }

    fn slot_mut(&mut self, surface: i32) -> DecodeResult<&mut Option<u64>> {
        let capacity = self.slots.len();
        usize::try_from(surface)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(DecodeError::InvalidSurface {
                index: i64::from(surface),
                capacity,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_increase_per_submission() {
        let mut tracker = DecodeOrderTracker::new(4);
        assert_eq!(tracker.record(2).unwrap(), 0);
        assert_eq!(tracker.record(0).unwrap(), 1);
        assert_eq!(tracker.record(2).unwrap(), 2);
        assert_eq!(tracker.lookup(2), Some(2));
        assert_eq!(tracker.lookup(0), Some(1));
        assert_eq!(tracker.lookup(1), None);
        assert_eq!(tracker.submitted(), 3);
    }

    #[test]
    fn out_of_range_surfaces_are_errors() {
        let mut tracker = DecodeOrderTracker::new(4);
        assert!(matches!(
            tracker.record(4),
            Err(DecodeError::InvalidSurface { index: 4, capacity: 4 })
        ));
        assert!(matches!(
            tracker.record(-1),
            Err(DecodeError::InvalidSurface { index: -1, .. })
        ));
        assert_eq!(tracker.lookup(99), None);
        assert_eq!(tracker.submitted(), 0);
    }

    #[test]
    fn reset_resizes_and_keeps_counter() {
        let mut tracker = DecodeOrderTracker::default();
        assert_eq!(tracker.capacity(), DEFAULT_TRACKED_SURFACES);
        tracker.record(31).unwrap();

        tracker.reset(8);
        assert_eq!(tracker.capacity(), 8);
        assert_eq!(tracker.lookup(31), None);
        assert_eq!(tracker.record(7).unwrap(), 1);
    }
}
