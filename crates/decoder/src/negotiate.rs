//! Capability negotiation: validate a stream against hardware limits and
//! pick the output surface layout.

use tracing::{debug, warn};

use hd_common::{ChromaFormat, DecodeError, DecodeResult, SurfaceFormat};

use crate::backend::DecoderCaps;
use crate::layout::VideoFormat;

/// Output layouts tried, in order, when the preferred one is unavailable.
pub const OUTPUT_FALLBACK_ORDER: [SurfaceFormat; 4] = [
    SurfaceFormat::Nv12,
    SurfaceFormat::P016,
    SurfaceFormat::Yuv444,
    SurfaceFormat::Yuv444_16Bit,
];

/// Layout that matches the stream's sampling without conversion.
///
/// 4:2:2 and monochrome have no native output layout and decode to NV12.
pub fn preferred_output_format(chroma: ChromaFormat, bit_depth_minus8: u32) -> SurfaceFormat {
    let high_depth = bit_depth_minus8 > 0;
    match chroma {
        ChromaFormat::Yuv420 if high_depth => SurfaceFormat::P016,
        ChromaFormat::Yuv444 if high_depth => SurfaceFormat::Yuv444_16Bit,
        ChromaFormat::Yuv444 => SurfaceFormat::Yuv444,
        ChromaFormat::Yuv420 | ChromaFormat::Yuv422 | ChromaFormat::Monochrome => {
            SurfaceFormat::Nv12
        }
    }
}

/// Check `format` against `caps` and choose the output layout.
pub fn negotiate(format: &VideoFormat, caps: &DecoderCaps) -> DecodeResult<SurfaceFormat> {
    if !caps.supported {
        return Err(DecodeError::UnsupportedCodec {
            codec: format.codec,
            chroma: format.chroma,
            bit_depth: format.bit_depth(),
        });
    }

    if format.coded.width > caps.max_width || format.coded.height > caps.max_height {
        return Err(DecodeError::UnsupportedResolution {
            width: format.coded.width,
            height: format.coded.height,
            max_width: caps.max_width,
            max_height: caps.max_height,
        });
    }

    let macroblocks = format.coded.macroblocks();
    if macroblocks > caps.max_macroblocks {
        return Err(DecodeError::UnsupportedComplexity {
            macroblocks,
            max_macroblocks: caps.max_macroblocks,
        });
    }

    let preferred = preferred_output_format(format.chroma, format.bit_depth_minus8);
    if caps.supports_output(preferred) {
        debug!(format = %preferred, "Preferred output format supported");
        return Ok(preferred);
    }

    let fallback = OUTPUT_FALLBACK_ORDER
        .iter()
        .copied()
        .find(|f| caps.supports_output(*f))
        .ok_or(DecodeError::NoOutputFormat {
            mask: caps.output_format_mask,
        })?;

    warn!(
        preferred = %preferred,
        chosen = %fallback,
        mask = caps.output_format_mask,
        "Preferred output format unsupported, falling back"
    );
    Ok(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::{Rect, Resolution, VideoCodec};

    fn caps(mask: u16) -> DecoderCaps {
        DecoderCaps {
            supported: true,
            max_width: 4096,
            max_height: 4096,
            max_macroblocks: 65_536,
            min_width: 48,
            min_height: 16,
            output_format_mask: mask,
            engines: 1,
        }
    }

    fn format(chroma: ChromaFormat, bit_depth_minus8: u32, w: u32, h: u32) -> VideoFormat {
        VideoFormat {
            codec: VideoCodec::Hevc,
            chroma,
            bit_depth_minus8,
            coded: Resolution::new(w, h),
            progressive: true,
            display_area: Rect::new(0, 0, w as i32, h as i32),
            min_decode_surfaces: 4,
        }
    }

    const ALL: u16 = 0b10_1011;

    #[test]
    fn preferred_formats() {
        assert_eq!(preferred_output_format(ChromaFormat::Yuv420, 0), SurfaceFormat::Nv12);
        assert_eq!(preferred_output_format(ChromaFormat::Yuv420, 2), SurfaceFormat::P016);
        assert_eq!(preferred_output_format(ChromaFormat::Yuv444, 0), SurfaceFormat::Yuv444);
        assert_eq!(
            preferred_output_format(ChromaFormat::Yuv444, 4),
            SurfaceFormat::Yuv444_16Bit
        );
        assert_eq!(preferred_output_format(ChromaFormat::Yuv422, 2), SurfaceFormat::Nv12);
        assert_eq!(preferred_output_format(ChromaFormat::Monochrome, 0), SurfaceFormat::Nv12);
    }

    #[test]
    fn supported_preferred_format_is_kept() {
        let chosen = negotiate(&format(ChromaFormat::Yuv420, 2, 1920, 1080), &caps(ALL)).unwrap();
        assert_eq!(chosen, SurfaceFormat::P016);
    }

    #[test]
    fn fallback_follows_priority_order() {
        // 10-bit 4:4:4 content on hardware that only emits P016 and YUV444.
        let mask = SurfaceFormat::P016.mask_bit() | SurfaceFormat::Yuv444.mask_bit();
        let chosen = negotiate(&format(ChromaFormat::Yuv444, 2, 1920, 1080), &caps(mask)).unwrap();
        assert_eq!(chosen, SurfaceFormat::P016);

        let mask = SurfaceFormat::Yuv444_16Bit.mask_bit();
        let chosen = negotiate(&format(ChromaFormat::Yuv420, 0, 640, 480), &caps(mask)).unwrap();
        assert_eq!(chosen, SurfaceFormat::Yuv444_16Bit);
    }

    #[test]
    fn empty_mask_has_no_output_format() {
        let err = negotiate(&format(ChromaFormat::Yuv420, 0, 640, 480), &caps(0b1_0100)).unwrap_err();
        assert!(matches!(err, DecodeError::NoOutputFormat { mask: 0b1_0100 }));
    }

    #[test]
    fn unsupported_codec_is_rejected_first() {
        let mut c = caps(ALL);
        c.supported = false;
        let err = negotiate(&format(ChromaFormat::Yuv420, 0, 8192, 8192), &c).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCodec { bit_depth: 8, .. }));
    }

    #[test]
    fn oversized_resolution_is_rejected() {
        let err = negotiate(&format(ChromaFormat::Yuv420, 0, 4097, 1080), &caps(ALL)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedResolution { width: 4097, max_width: 4096, .. }
        ));
    }

    #[test]
    fn macroblock_budget_is_enforced() {
        let mut c = caps(ALL);
        c.max_macroblocks = 8_160;
        // 1920x1088 = 120 x 68 = 8160 macroblocks: exactly at the limit.
        assert!(negotiate(&format(ChromaFormat::Yuv420, 0, 1920, 1088), &c).is_ok());
        let err = negotiate(&format(ChromaFormat::Yuv420, 0, 1920, 1104), &c).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedComplexity { macroblocks: 8_280, max_macroblocks: 8_160 }
        ));
    }
}
