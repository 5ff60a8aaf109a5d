//! Hardware decode engine abstraction.
//!
//! [`HwDecodeBackend`] is the seam between the pipeline logic (negotiation,
//! ordering, pooling, delivery) and a concrete decode engine. The NVDEC
//! implementation lives in [`crate::nvdec`]; [`crate::sim`] provides a
//! deterministic in-memory engine.

use hd_common::{
    ChromaFormat, DecodeResult, FrameLocation, Rect, Resolution, SurfaceFormat, VideoCodec,
};

/// Hardware limits for one (codec, chroma, bit depth) combination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderCaps {
    pub supported: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub max_macroblocks: u64,
    pub min_width: u32,
    pub min_height: u32,
    /// Bitmask of supported output layouts, see [`SurfaceFormat::mask_bit`].
    pub output_format_mask: u16,
    /// Number of decode engines on the device.
    pub engines: u32,
}

impl DecoderCaps {
    pub fn supports_output(&self, format: SurfaceFormat) -> bool {
        self.output_format_mask & format.mask_bit() != 0
    }
}

/// Deinterlacing applied when the engine post-processes a picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeinterlaceMode {
    Weave,
    Adaptive,
}

/// Everything needed to instantiate a hardware decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderCreateParams {
    pub codec: VideoCodec,
    pub chroma: ChromaFormat,
    pub bit_depth_minus8: u32,
    pub output_format: SurfaceFormat,
    pub deinterlace: DeinterlaceMode,
    pub coded: Resolution,
    /// Reconfiguration ceiling; the running maximum of coded sizes.
    pub max: Resolution,
    /// Post-processed output size.
    pub target: Resolution,
    /// Source region scaled into the target; all-zero means the full frame.
    pub display_area: Rect,
    pub decode_surfaces: u32,
    pub output_surfaces: u32,
}

/// A picture the parser declared ready for presentation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayInfo {
    pub picture_index: i32,
    pub progressive: bool,
    pub top_field_first: bool,
    pub repeat_first_field: i32,
    pub timestamp: i64,
}

/// A decoded surface mapped for reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedSurface {
    pub address: u64,
    pub pitch: u32,
    pub picture_index: i32,
}

/// Completion status of a decoded picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    InProgress,
    Success,
    Error,
    ErrorConcealed,
    Unknown,
}

impl DecodeStatus {
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::ErrorConcealed)
    }
}

/// One pitched 2-D copy from a mapped surface into a frame buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlaneCopy {
    /// 0 = luma, 1 and 2 = chroma.
    pub plane: u32,
    pub src_offset: usize,
    pub src_pitch: usize,
    pub dst_offset: usize,
    pub dst_pitch: usize,
    pub width_bytes: usize,
    pub rows: usize,
}

/// Owned memory backing one frame slot.
pub trait FrameMemory: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn location(&self) -> FrameLocation;

    /// Device address for device-resident frames.
    fn device_ptr(&self) -> Option<u64>;

    /// Readable bytes for host-resident frames.
    fn host_bytes(&self) -> Option<&[u8]>;
}

/// A hardware decode engine.
///
/// Every method is called from the thread driving the decoder, inside the
/// parser callbacks of a single `decode` call or during setup/teardown.
pub trait HwDecodeBackend: Send {
    /// Picture parameters produced by the matching bitstream parser.
    type Picture;
    type Memory: FrameMemory;

    fn query_caps(
        &mut self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth_minus8: u32,
    ) -> DecodeResult<DecoderCaps>;

    /// Create the decoder, replacing any existing one.
    fn create_decoder(&mut self, params: &DecoderCreateParams) -> DecodeResult<()>;

    fn destroy_decoder(&mut self);

    /// Decode surface a picture will be written to.
    fn picture_index(picture: &Self::Picture) -> i32;

    fn decode_picture(&mut self, picture: &mut Self::Picture) -> DecodeResult<()>;

    fn map_surface(&mut self, info: &DisplayInfo) -> DecodeResult<MappedSurface>;

    fn decode_status(&mut self, picture_index: i32) -> DecodeStatus;

    fn alloc_frame(&mut self, size: usize, location: FrameLocation) -> DecodeResult<Self::Memory>;

    /// Enqueue a plane copy on the session stream.
    fn copy_plane(
        &mut self,
        src: &MappedSurface,
        dst: &mut Self::Memory,
        copy: &PlaneCopy,
    ) -> DecodeResult<()>;

    /// Wait for all copies enqueued on the session stream.
    fn synchronize(&mut self) -> DecodeResult<()>;

    fn unmap_surface(&mut self, surface: MappedSurface) -> DecodeResult<()>;

    /// Opaque handle of the stream copies are issued on.
    fn stream_handle(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_mask_lookup() {
        let caps = DecoderCaps {
            output_format_mask: SurfaceFormat::Nv12.mask_bit() | SurfaceFormat::Yuv444.mask_bit(),
            ..DecoderCaps::default()
        };
        assert!(caps.supports_output(SurfaceFormat::Nv12));
        assert!(caps.supports_output(SurfaceFormat::Yuv444));
        assert!(!caps.supports_output(SurfaceFormat::P016));
    }

    #[test]
    fn concealed_counts_as_error() {
        assert!(DecodeStatus::ErrorConcealed.is_error());
        assert!(DecodeStatus::Error.is_error());
        assert!(!DecodeStatus::Success.is_error());
        assert!(!DecodeStatus::Unknown.is_error());
    }
}
