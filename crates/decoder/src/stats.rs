//! Decode counters, per instance and aggregated across sessions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::health::Health;

/// Counters for one decoder instance.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub packets_fed: u64,
    pub rejected_packets: u64,
    pub pictures_submitted: u64,
    pub frames_displayed: u64,
    /// Frames that replaced an unconsumed frame in a full pool.
    pub frames_overwritten: u64,
    pub decode_errors: u64,
    pub concealed_errors: u64,
    pub sessions_created: u64,
}

/// Outcome of one stream, reported when its worker finishes.
#[derive(Clone, Debug)]
pub struct StreamReport {
    pub name: String,
    pub frames: u64,
    pub elapsed: Duration,
    pub health: Health,
    pub stats: DecoderStats,
}

impl StreamReport {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct TallyInner {
    total_frames: u64,
    reports: Vec<StreamReport>,
}

/// Frame totals shared by concurrently running decoder sessions.
#[derive(Clone, Debug, Default)]
pub struct SharedTally {
    inner: Arc<Mutex<TallyInner>>,
}

impl SharedTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frames(&self, frames: u64) {
        self.inner.lock().total_frames += frames;
    }

    pub fn total_frames(&self) -> u64 {
        self.inner.lock().total_frames
    }

    pub fn report(&self, report: StreamReport) {
        self.inner.lock().reports.push(report);
    }

    pub fn reports(&self) -> Vec<StreamReport> {
        self.inner.lock().reports.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, frames: u64, ms: u64) -> StreamReport {
        StreamReport {
            name: name.into(),
            frames,
            elapsed: Duration::from_millis(ms),
            health: Health::Healthy,
            stats: DecoderStats::default(),
        }
    }

    #[test]
    fn fps_from_elapsed() {
        assert!((report("a", 300, 10_000).fps() - 30.0).abs() < 1e-9);
        assert_eq!(report("b", 10, 0).fps(), 0.0);
    }

    #[test]
    fn tally_is_shared_between_threads() {
        let tally = SharedTally::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tally = tally.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        tally.add_frames(1);
                    }
                    tally.report(report(&format!("stream{i}"), 250, 1000));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tally.total_frames(), 1000);
        assert_eq!(tally.reports().len(), 4);
    }
}
