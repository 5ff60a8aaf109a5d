//! Chroma sampling and decoder output surface layouts.

use serde::{Deserialize, Serialize};

/// Chroma subsampling of the coded stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaFormat {
    Monochrome,
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaFormat {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Monochrome => "4:0:0",
            Self::Yuv420 => "4:2:0",
            Self::Yuv422 => "4:2:2",
            Self::Yuv444 => "4:4:4",
        }
    }
}

/// Planar layout of a decoded output surface.
///
/// Every layout stores a full-resolution luma plane first. The semi-planar
/// 4:2:0 layouts follow it with one interleaved half-height chroma plane;
/// the 4:4:4 layouts follow it with two full-height chroma planes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceFormat {
    /// 8-bit semi-planar 4:2:0.
    Nv12,
    /// 16-bit semi-planar 4:2:0 (high bit depth content, MSB aligned).
    P016,
    /// 8-bit planar 4:4:4.
    Yuv444,
    /// 16-bit planar 4:4:4.
    Yuv444_16Bit,
}

impl SurfaceFormat {
    /// Bit in the hardware output-format capability mask for this layout.
    pub fn mask_bit(self) -> u16 {
        let shift = match self {
            Self::Nv12 => 0,
            Self::P016 => 1,
            Self::Yuv444 => 3,
            Self::Yuv444_16Bit => 5,
        };
        1 << shift
    }

    /// Height of one chroma plane for a given luma height.
    pub fn chroma_height(self, luma_height: u32) -> u32 {
        match self {
            Self::Nv12 | Self::P016 => luma_height / 2,
            Self::Yuv444 | Self::Yuv444_16Bit => luma_height,
        }
    }

    /// Number of chroma planes following the luma plane.
    pub fn chroma_plane_count(self) -> u32 {
        match self {
            Self::Nv12 | Self::P016 => 1,
            Self::Yuv444 | Self::Yuv444_16Bit => 2,
        }
    }

    /// Whether samples are stored in 16-bit containers.
    pub fn is_high_depth(self) -> bool {
        matches!(self, Self::P016 | Self::Yuv444_16Bit)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Nv12 => "NV12",
            Self::P016 => "P016",
            Self::Yuv444 => "YUV444",
            Self::Yuv444_16Bit => "YUV444_16Bit",
        }
    }
}

impl std::fmt::Display for SurfaceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bits_follow_hardware_enum() {
        assert_eq!(SurfaceFormat::Nv12.mask_bit(), 0b1);
        assert_eq!(SurfaceFormat::P016.mask_bit(), 0b10);
        assert_eq!(SurfaceFormat::Yuv444.mask_bit(), 0b1000);
        assert_eq!(SurfaceFormat::Yuv444_16Bit.mask_bit(), 0b10_0000);
    }

    #[test]
    fn semi_planar_chroma_is_half_height() {
        assert_eq!(SurfaceFormat::Nv12.chroma_height(1080), 540);
        assert_eq!(SurfaceFormat::P016.chroma_height(1081), 540);
        assert_eq!(SurfaceFormat::Nv12.chroma_plane_count(), 1);
    }

    #[test]
    fn planar_444_has_two_full_planes() {
        assert_eq!(SurfaceFormat::Yuv444.chroma_height(720), 720);
        assert_eq!(SurfaceFormat::Yuv444_16Bit.chroma_plane_count(), 2);
        assert!(SurfaceFormat::Yuv444_16Bit.is_high_depth());
        assert!(!SurfaceFormat::Yuv444.is_high_depth());
    }
}
