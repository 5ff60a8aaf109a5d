//! Decode session management: output geometry and hardware decoder
//! (re)creation on every sequence change.

use tracing::{info, warn};

use hd_common::{DecodeResult, DecoderConfig, Rect, Resolution, SurfaceFormat};

use crate::backend::{DecoderCreateParams, DeinterlaceMode, HwDecodeBackend};
use crate::layout::{OutputLayout, VideoFormat};
use crate::negotiate::negotiate;

/// Output surfaces the engine may keep mapped at once.
pub const OUTPUT_SURFACES: u32 = 2;

/// Where decoded pixels land and how large the delivered frame is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetGeometry {
    /// Delivered frame size.
    pub output: Resolution,
    /// Size of the post-processed hardware surface.
    pub target: Resolution,
    /// Source region scaled into the target; all-zero means the full frame.
    pub display_area: Rect,
}

impl TargetGeometry {
    /// Resolve crop and resize against a stream format. A crop always wins
    /// over a resize when both are given.
    pub fn compute(format: &VideoFormat, crop: Option<Rect>, resize: Option<Resolution>) -> Self {
        if crop.is_none() && resize.is_none() {
            return Self {
                output: format.display_size(),
                target: format.coded,
                display_area: Rect::default(),
            };
        }

        let mut output = format.coded;
        let mut display_area = Rect::default();
        if let Some(size) = resize {
            display_area = format.display_area;
            output = size;
        }
        if let Some(rect) = crop {
            display_area = rect;
            output = rect.size();
        }
        Self {
            output,
            target: output,
            display_area,
        }
    }
}

/// The negotiated state of one hardware decoder instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSession {
    pub format: VideoFormat,
    pub geometry: TargetGeometry,
    pub layout: OutputLayout,
    pub params: DecoderCreateParams,
}

impl ActiveSession {
    pub fn decode_surfaces(&self) -> u32 {
        self.params.decode_surfaces
    }
}

/// Owns the lifecycle of the hardware decoder behind a backend.
#[derive(Debug)]
pub struct SessionManager {
    crop: Option<Rect>,
    resize: Option<Resolution>,
    max: Resolution,
    active: Option<ActiveSession>,
    sessions_created: u64,
}

impl SessionManager {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            crop: config.active_crop(),
            resize: config.active_resize(),
            max: Resolution::new(config.max_width, config.max_height),
            active: None,
            sessions_created: 0,
        }
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created
    }

    /// Running maximum of coded sizes seen so far.
    pub fn max_resolution(&self) -> Resolution {
        self.max
    }

    /// Build the creation parameters and frame layout for `format`.
    pub fn plan(&mut self, format: &VideoFormat, output_format: SurfaceFormat) -> ActiveSession {
        self.max.width = self.max.width.max(format.coded.width);
        self.max.height = self.max.height.max(format.coded.height);

        let geometry = TargetGeometry::compute(format, self.crop, self.resize);
        let layout = OutputLayout::new(
            output_format,
            format.bit_depth_minus8,
            geometry.output.width,
            geometry.output.height,
            geometry.target.height,
        );
        let deinterlace = if format.progressive {
            DeinterlaceMode::Weave
        } else {
            DeinterlaceMode::Adaptive
        };
        let params = DecoderCreateParams {
            codec: format.codec,
            chroma: format.chroma,
            bit_depth_minus8: format.bit_depth_minus8,
            output_format,
            deinterlace,
            coded: format.coded,
            max: self.max,
            target: geometry.target,
            display_area: geometry.display_area,
            decode_surfaces: format.min_decode_surfaces.max(1),
            output_surfaces: OUTPUT_SURFACES,
        };

        ActiveSession {
            format: format.clone(),
            geometry,
            layout,
            params,
        }
    }

    /// Negotiate `format` and create a fresh hardware decoder for it.
    ///
    /// The previous session is discarded before anything is attempted, so
    /// a failure leaves no session behind.
    pub fn establish<B: HwDecodeBackend>(
        &mut self,
        backend: &mut B,
        format: &VideoFormat,
    ) -> DecodeResult<&ActiveSession> {
        if self.active.take().is_some() {
            info!("Sequence changed, recreating decoder");
            backend.destroy_decoder();
        }

        let caps = backend.query_caps(format.codec, format.chroma, format.bit_depth_minus8)?;
        let output_format = negotiate(format, &caps)?;
        let session = self.plan(format, output_format);

        if session.geometry.output.width == 0 || session.geometry.output.height == 0 {
            warn!(output = %session.geometry.output, "Negotiated an empty output size");
        }

        backend.create_decoder(&session.params)?;
        self.sessions_created += 1;

        info!(
            codec = %format.codec,
            coded = %format.coded,
            output = %session.geometry.output,
            target = %session.geometry.target,
            max = %self.max,
            surface_format = %output_format,
            decode_surfaces = session.params.decode_surfaces,
            deinterlace = ?session.params.deinterlace,
            "Decoder session created"
        );

        Ok(&*self.active.insert(session))
    }

    /// Destroy the hardware decoder, if any.
    pub fn teardown<B: HwDecodeBackend>(&mut self, backend: &mut B) {
        if self.active.take().is_some() {
            backend.destroy_decoder();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::{ChromaFormat, VideoCodec};

    fn format_1080p() -> VideoFormat {
        VideoFormat {
            codec: VideoCodec::H264,
            chroma: ChromaFormat::Yuv420,
            bit_depth_minus8: 0,
            coded: Resolution::new(1920, 1088),
            progressive: true,
            display_area: Rect::new(0, 0, 1920, 1080),
            min_decode_surfaces: 9,
        }
    }

    #[test]
    fn plain_geometry_maps_full_coded_area() {
        let g = TargetGeometry::compute(&format_1080p(), None, None);
        assert_eq!(g.output, Resolution::new(1920, 1080));
        assert_eq!(g.target, Resolution::new(1920, 1088));
        assert_eq!(g.display_area, Rect::default());
    }

    #[test]
    fn resize_keeps_source_display_area() {
        let g = TargetGeometry::compute(&format_1080p(), None, Some(Resolution::HD));
        assert_eq!(g.output, Resolution::HD);
        assert_eq!(g.target, Resolution::HD);
        assert_eq!(g.display_area, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn crop_wins_over_resize() {
        let crop = Rect::new(100, 50, 740, 530);
        let g = TargetGeometry::compute(&format_1080p(), Some(crop), Some(Resolution::HD));
        assert_eq!(g.output, Resolution::new(640, 480));
        assert_eq!(g.target, Resolution::new(640, 480));
        assert_eq!(g.display_area, crop);
    }

    #[test]
    fn plan_tracks_running_maximum() {
        let mut manager = SessionManager::new(&DecoderConfig::default());
        let first = manager.plan(&format_1080p(), SurfaceFormat::Nv12);
        assert_eq!(first.params.max, Resolution::new(1920, 1088));

        let mut small = format_1080p();
        small.coded = Resolution::new(1280, 720);
        small.display_area = Rect::new(0, 0, 1280, 720);
        let second = manager.plan(&small, SurfaceFormat::Nv12);
        assert_eq!(second.params.max, Resolution::new(1920, 1088));
        assert_eq!(second.params.coded, Resolution::new(1280, 720));

        let mut tall = small.clone();
        tall.coded = Resolution::new(720, 1280);
        let third = manager.plan(&tall, SurfaceFormat::Nv12);
        assert_eq!(third.params.max, Resolution::new(1920, 1280));
    }

    #[test]
    fn configured_maximum_seeds_the_ceiling() {
        let cfg = DecoderConfig {
            max_width: 3840,
            max_height: 2160,
            ..DecoderConfig::default()
        };
        let mut manager = SessionManager::new(&cfg);
        let session = manager.plan(&format_1080p(), SurfaceFormat::Nv12);
        assert_eq!(session.params.max, Resolution::new(3840, 2160));
    }

    #[test]
    fn plan_selects_deinterlace_and_surfaces() {
        let mut manager = SessionManager::new(&DecoderConfig::default());
        let mut interlaced = format_1080p();
        interlaced.progressive = false;
        let session = manager.plan(&interlaced, SurfaceFormat::Nv12);
        assert_eq!(session.params.deinterlace, DeinterlaceMode::Adaptive);
        assert_eq!(session.decode_surfaces(), 9);
        assert_eq!(session.params.output_surfaces, OUTPUT_SURFACES);

        let progressive = manager.plan(&format_1080p(), SurfaceFormat::Nv12);
        assert_eq!(progressive.params.deinterlace, DeinterlaceMode::Weave);
    }

    #[test]
    fn layout_uses_target_height_for_surface() {
        let mut manager = SessionManager::new(&DecoderConfig::default());
        let session = manager.plan(&format_1080p(), SurfaceFormat::Nv12);
        assert_eq!(session.layout.luma_height, 1080);
        assert_eq!(session.layout.surface_height, 1088);
        assert_eq!(session.layout.frame_size(), 1920 * 1620);
    }
}
