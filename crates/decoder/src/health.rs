//! Start-up health tracking.
//!
//! Streams normally fail to produce frames until the first random access
//! point; that is expected. A stream that still has not produced a single
//! frame after many packets almost certainly never will (wrong codec,
//! corrupt input, missing codec configuration).

use tracing::error;

/// Packets without any decoded frame before a stream counts as stuck.
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Health {
    /// At least one frame has been decoded.
    Healthy,
    /// No frame yet, still within the start-up allowance.
    StartupMiss,
    /// No frame after the whole start-up allowance.
    PersistentFailure,
}

#[derive(Debug)]
pub struct StartupMonitor {
    threshold: u64,
    attempts: u64,
    succeeded: bool,
    reported: bool,
}

impl Default for StartupMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl StartupMonitor {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            attempts: 0,
            succeeded: false,
            reported: false,
        }
    }

    /// Record one decode call that produced `frames` frames.
    pub fn observe(&mut self, frames: usize) -> Health {
        self.attempts += 1;
        if frames > 0 {
            self.succeeded = true;
        }
        let health = self.health();
        if health == Health::PersistentFailure && !self.reported {
            self.reported = true;
            error!(
                attempts = self.attempts,
                threshold = self.threshold,
                "Decoder has not produced a single frame, stream is likely undecodable"
            );
        }
        health
    }

    pub fn health(&self) -> Health {
        if self.succeeded {
            Health::Healthy
        } else if self.attempts > self.threshold {
            Health::PersistentFailure
        } else {
            Health::StartupMiss
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}
