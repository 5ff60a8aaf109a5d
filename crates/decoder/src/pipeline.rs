//! Parser event handling: ties negotiation, ordering, pooling and the
//! hardware backend together for one decoder instance.

use tracing::{debug, error, trace, warn};

use hd_common::{DecodeError, DecodeResult, DecoderConfig, FrameLocation};

use crate::backend::{DecodeStatus, DisplayInfo, HwDecodeBackend, MappedSurface};
use crate::delivery::{Frame, FrameMeta};
use crate::layout::{OutputLayout, VideoFormat};
use crate::order::DecodeOrderTracker;
use crate::parser::EventHandler;
use crate::pool::{FramePool, SlotWrite};
use crate::session::{ActiveSession, SessionManager};
use crate::stats::DecoderStats;

/// Lifecycle of a decoder instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecoderState {
    /// No sequence header seen yet.
    Uninitialized,
    /// Handling a sequence header.
    Negotiating,
    /// A hardware decoder exists and pictures flow.
    Active,
    /// A fatal error occurred; the instance accepts no more input.
    Terminated,
}

/// Mutable decode state driven by parser events.
pub struct DecodePipeline<B: HwDecodeBackend> {
    backend: B,
    sessions: SessionManager,
    order: DecodeOrderTracker,
    pool: FramePool<B::Memory>,
    output: FrameLocation,
    state: DecoderState,
    stats: DecoderStats,
    displayed_this_call: usize,
}

impl<B: HwDecodeBackend> DecodePipeline<B> {
    pub fn new(backend: B, config: &DecoderConfig) -> Self {
        Self {
            backend,
            sessions: SessionManager::new(config),
            order: DecodeOrderTracker::default(),
            pool: FramePool::new(config.cache_capacity, config.output),
            output: config.output,
            state: DecoderState::Uninitialized,
            stats: DecoderStats::default(),
            displayed_this_call: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut DecoderStats {
        &mut self.stats
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.sessions.active()
    }

    pub fn layout(&self) -> Option<&OutputLayout> {
        self.sessions.active().map(|s| &s.layout)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn pool(&self) -> &FramePool<B::Memory> {
        &self.pool
    }

    pub fn next_frame(&mut self) -> Option<Frame<'_, B::Memory>> {
        self.pool.next_frame()
    }

    /// Start counting frames for a new decode call.
    pub(crate) fn begin_call(&mut self) {
        self.displayed_this_call = 0;
    }

    /// Frames made available since [`DecodePipeline::begin_call`]. Overwrites
    /// do not count.
    pub(crate) fn displayed_this_call(&self) -> usize {
        self.displayed_this_call
    }

    pub(crate) fn terminate(&mut self, reason: &DecodeError) {
        if self.state != DecoderState::Terminated {
            error!(error = %reason, "Decoder terminated");
            self.state = DecoderState::Terminated;
        }
    }

    fn deliver(&mut self, surface: &MappedSurface, info: &DisplayInfo, layout: OutputLayout) -> DecodeResult<SlotWrite> {
        let status = self.backend.decode_status(info.picture_index);
        let decode_order = self.order.lookup(info.picture_index);
        match status {
            DecodeStatus::Error => {
                self.stats.decode_errors += 1;
                warn!(decode_order, picture = info.picture_index, "Decode error occurred for picture");
            }
            DecodeStatus::ErrorConcealed => {
                self.stats.concealed_errors += 1;
                warn!(decode_order, picture = info.picture_index, "Decode error concealed for picture");
            }
            _ => {}
        }

        let meta = FrameMeta {
            timestamp: info.timestamp,
            index: 0,
            decode_order,
            status,
            layout,
        };
        let copies = layout.plane_copies(surface.pitch);
        let write = self.pool.store(&mut self.backend, meta, |backend, memory| {
            copies
                .iter()
                .try_for_each(|copy| backend.copy_plane(surface, memory, copy))
        })?;

        if self.output == FrameLocation::Host {
            self.backend.synchronize()?;
        }
        Ok(write)
    }
}

impl<B: HwDecodeBackend> EventHandler<B::Picture> for DecodePipeline<B> {
    fn on_format_changed(&mut self, format: &VideoFormat) -> DecodeResult<u32> {
        if self.state == DecoderState::Terminated {
            return Err(DecodeError::Terminated);
        }
        self.state = DecoderState::Negotiating;

        match self.sessions.establish(&mut self.backend, format) {
            Ok(session) => {
                let surfaces = session.decode_surfaces();
                self.order.reset(surfaces as usize);
                self.stats.sessions_created = self.sessions.sessions_created();
                self.state = DecoderState::Active;
                Ok(surfaces)
            }
            Err(err) => {
                self.terminate(&err);
                Err(err)
            }
        }
    }

    fn on_picture_submitted(&mut self, picture: &mut B::Picture) -> DecodeResult<()> {
        if self.state != DecoderState::Active {
            return Err(DecodeError::NotInitialized);
        }
        let surface = B::picture_index(picture);
        let order = match self.order.record(surface) {
            Ok(order) => Some(order),
            Err(err) => {
                warn!(error = %err, "Decode order not tracked for picture");
                None
            }
        };
        self.backend.decode_picture(picture)?;
        self.stats.pictures_submitted += 1;
        trace!(surface, order, "Picture submitted");
        Ok(())
    }

    fn on_picture_displayable(&mut self, info: &DisplayInfo) -> DecodeResult<()> {
        let layout = match (self.state, self.layout()) {
            (DecoderState::Active, Some(layout)) => *layout,
            _ => return Err(DecodeError::NotInitialized),
        };

        let surface = self.backend.map_surface(info)?;
        let delivered = self.deliver(&surface, info, layout);
        let unmapped = self.backend.unmap_surface(surface);
        let write = delivered?;
        unmapped?;

        // An overwrite replaces a buffered frame, so the consumer gains nothing.
        if write == SlotWrite::Overwritten {
            self.stats.frames_overwritten += 1;
        } else {
            self.displayed_this_call += 1;
        }
        self.stats.frames_displayed += 1;
        trace!(
            picture = info.picture_index,
            pts = info.timestamp,
            write = ?write,
            "Frame delivered"
        );
        Ok(())
    }
}

impl<B: HwDecodeBackend> Drop for DecodePipeline<B> {
    fn drop(&mut self) {
        // Decoder before frame memory, both before the backend's own context.
        self.sessions.teardown(&mut self.backend);
        self.pool.clear();
        debug!(
            frames_displayed = self.stats.frames_displayed,
            sessions = self.stats.sessions_created,
            "Decode pipeline released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPicture, SimStream, SimulatedDevice};

    #[test]
    fn untracked_surface_is_still_decoded_and_delivered() {
        let device = SimulatedDevice::default();
        let probe = device.probe();
        let mut pipeline = DecodePipeline::new(device, &DecoderConfig::default());
        pipeline
            .on_format_changed(&SimStream::simple_format(32, 32, 4))
            .unwrap();
        // Tracker arena smaller than the engine's surface count.
        pipeline.order.reset(2);

        let mut picture = SimPicture {
            surface: 3,
            fill: 5,
            status: DecodeStatus::Success,
        };
        pipeline.on_picture_submitted(&mut picture).unwrap();
        assert_eq!(probe.snapshot().pictures_decoded, 1);
        assert_eq!(pipeline.stats().pictures_submitted, 1);

        let info = DisplayInfo {
            picture_index: 3,
            ..DisplayInfo::default()
        };
        pipeline.on_picture_displayable(&info).unwrap();
        let frame = pipeline.next_frame().unwrap();
        assert_eq!(frame.meta.decode_order, None);
    }

    #[test]
    fn overwritten_frames_are_not_counted_as_ready() {
        let config = DecoderConfig::default().with_cache_capacity(1);
        let mut pipeline = DecodePipeline::new(SimulatedDevice::default(), &config);
        pipeline
            .on_format_changed(&SimStream::simple_format(32, 32, 2))
            .unwrap();

        pipeline.begin_call();
        for fill in 0..3u8 {
            let mut picture = SimPicture {
                surface: i32::from(fill % 2),
                fill,
                status: DecodeStatus::Success,
            };
            pipeline.on_picture_submitted(&mut picture).unwrap();
            let info = DisplayInfo {
                picture_index: picture.surface,
                ..DisplayInfo::default()
            };
            pipeline.on_picture_displayable(&info).unwrap();
        }
        assert_eq!(pipeline.displayed_this_call(), 1);
        assert_eq!(pipeline.stats().frames_overwritten, 2);
        assert_eq!(pipeline.stats().frames_displayed, 3);
    }
}
