//! Stream format descriptors and decoded frame memory layout.

use hd_common::{ChromaFormat, Rect, Resolution, SurfaceFormat, VideoCodec};

use crate::backend::PlaneCopy;

/// Sequence-level description of a stream, as reported by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub codec: VideoCodec,
    pub chroma: ChromaFormat,
    pub bit_depth_minus8: u32,
    pub coded: Resolution,
    pub progressive: bool,
    pub display_area: Rect,
    pub min_decode_surfaces: u32,
}

impl VideoFormat {
    pub fn bit_depth(&self) -> u32 {
        self.bit_depth_minus8 + 8
    }

    /// Visible size; the coded size when the display area is empty.
    pub fn display_size(&self) -> Resolution {
        let size = self.display_area.size();
        if size.is_set() {
            size
        } else {
            self.coded
        }
    }
}

/// Planar layout of one delivered frame.
///
/// Frames are packed: a `width × luma_height` luma plane followed by
/// `chroma_planes` planes of `width × chroma_height`, every row
/// `width × bytes_per_pixel` bytes with no padding. Bytes per pixel follow
/// the stream's luma bit depth, not the surface format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub surface_format: SurfaceFormat,
    pub width: u32,
    pub luma_height: u32,
    pub chroma_height: u32,
    pub chroma_planes: u32,
    pub bytes_per_pixel: u32,
    /// Row count of one plane in the mapped hardware surface.
    pub surface_height: u32,
}

impl OutputLayout {
    pub fn new(
        surface_format: SurfaceFormat,
        bit_depth_minus8: u32,
        width: u32,
        luma_height: u32,
        surface_height: u32,
    ) -> Self {
        Self {
            surface_format,
            width,
            luma_height,
            chroma_height: surface_format.chroma_height(luma_height),
            chroma_planes: surface_format.chroma_plane_count(),
            bytes_per_pixel: if bit_depth_minus8 > 0 { 2 } else { 1 },
            surface_height,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    pub fn frame_size(&self) -> usize {
        let rows = self.luma_height as usize + self.chroma_height as usize * self.chroma_planes as usize;
        self.row_bytes() * rows
    }

    /// Copies that move a mapped surface with the given pitch into a frame.
    ///
    /// Chroma plane `k` starts `k × surface_height` rows into the surface and
    /// `k × luma_height` rows into the frame.
    pub fn plane_copies(&self, src_pitch: u32) -> Vec<PlaneCopy> {
        let src_pitch = src_pitch as usize;
        let row_bytes = self.row_bytes();
        let mut copies = Vec::with_capacity(1 + self.chroma_planes as usize);
        copies.push(PlaneCopy {
            plane: 0,
            src_offset: 0,
            src_pitch,
            dst_offset: 0,
            dst_pitch: row_bytes,
            width_bytes: row_bytes,
            rows: self.luma_height as usize,
        });
        for plane in 1..=self.chroma_planes {
            let k = plane as usize;
            copies.push(PlaneCopy {
                plane,
                src_offset: src_pitch * self.surface_height as usize * k,
                src_pitch,
                dst_offset: row_bytes * self.luma_height as usize * k,
                dst_pitch: row_bytes,
                width_bytes: row_bytes,
                rows: self.chroma_height as usize,
            });
        }
        copies
    }
}
