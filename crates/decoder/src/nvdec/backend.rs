//! [`HwDecodeBackend`] over the CUVID decoder API.

use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use cudarc::driver::safe::CudaStream;
use cudarc::driver::sys;
use tracing::{debug, error, info, warn};

use hd_common::{ChromaFormat, DecodeError, DecodeResult, FrameLocation, Rect, VideoCodec};

use super::context::{driver_error, DeviceContext};
use super::ffi::{
    check_cuvid_result, create_flags, decode_status, CUvideoctxlock, CUvideodecoder,
    CudaVideoChromaFormat, CudaVideoCodec, CudaVideoDeinterlaceMode, CudaVideoSurfaceFormat,
    CuvidDecodeCaps, CuvidDecodeCreateInfo, CuvidGetDecodeStatus, CuvidPicParams, CuvidProcParams,
    CuvidRect16, NvcuvidLibrary, CUDA_SUCCESS,
};
use super::frame::NvFrame;
use crate::backend::{
    DecodeStatus, DecoderCaps, DecoderCreateParams, DeinterlaceMode, DisplayInfo, FrameMemory,
    HwDecodeBackend, MappedSurface, PlaneCopy,
};

/// Picture parameters handed out by the parser's decode callback.
///
/// Only valid for the duration of that callback.
pub struct PictureParams(NonNull<CuvidPicParams>);

impl PictureParams {
    /// # Safety
    ///
    /// `params` must stay valid for as long as the returned value is used.
    pub(crate) unsafe fn new(params: NonNull<CuvidPicParams>) -> Self {
        Self(params)
    }

    pub fn surface_index(&self) -> i32 {
        // SAFETY: Valid for the callback this value was created in.
        unsafe { self.0.as_ref().curr_pic_idx }
    }

    fn as_mut_ptr(&mut self) -> *mut CuvidPicParams {
        self.0.as_ptr()
    }
}

/// NVDEC decode engine bound to one CUDA context and stream.
///
/// Owns the context lock and, once a sequence has been negotiated, the
/// hardware decoder.
pub struct NvdecBackend {
    lib: Arc<NvcuvidLibrary>,
    decoder: CUvideodecoder,
    created: Option<DecoderCreateParams>,
    ctx_lock: CUvideoctxlock,
    stream: Arc<CudaStream>,
    device: DeviceContext,
}

// SAFETY: The raw handles are only used through &mut self, from whichever
// single thread currently owns the backend. CUVID handles are not bound to
// the creating thread; every call pushes the owning context first.
unsafe impl Send for NvdecBackend {}

impl NvdecBackend {
    pub fn new(lib: Arc<NvcuvidLibrary>, device: DeviceContext) -> DecodeResult<Self> {
        let stream = device
            .cuda()
            .new_stream()
            .map_err(driver_error("cuStreamCreate"))?;

        let mut ctx_lock: CUvideoctxlock = ptr::null_mut();
        // SAFETY: device.raw() is a live context; the lock handle is written
        // on success and destroyed in Drop.
        let result = unsafe { (lib.cuvidCtxLockCreate)(&mut ctx_lock, device.raw().cast()) };
        check_cuvid_result(result, "cuvidCtxLockCreate")?;

        info!(gpu = %device.name(), ordinal = device.ordinal(), "NVDEC backend ready");
        Ok(Self {
            lib,
            decoder: ptr::null_mut(),
            created: None,
            ctx_lock,
            stream,
            device,
        })
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    /// Parameters of the live decoder, if one exists.
    pub fn decoder_params(&self) -> Option<&DecoderCreateParams> {
        self.created.as_ref()
    }

    fn require_decoder(&self) -> DecodeResult<CUvideodecoder> {
        if self.decoder.is_null() {
            Err(DecodeError::NotInitialized)
        } else {
            Ok(self.decoder)
        }
    }
}

fn rect16(rect: Rect) -> CuvidRect16 {
    let clamp = |v: i32| v.clamp(i16::MIN.into(), i16::MAX.into()) as i16;
    CuvidRect16 {
        left: clamp(rect.left),
        top: clamp(rect.top),
        right: clamp(rect.right),
        bottom: clamp(rect.bottom),
    }
}

impl HwDecodeBackend for NvdecBackend {
    type Picture = PictureParams;
    type Memory = NvFrame;

    fn query_caps(
        &mut self,
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth_minus8: u32,
    ) -> DecodeResult<DecoderCaps> {
        let mut caps = CuvidDecodeCaps::query(
            CudaVideoCodec::from_common(codec),
            CudaVideoChromaFormat::from_common(chroma),
            bit_depth_minus8,
        );

        let _guard = self.device.push()?;
        // SAFETY: caps is a fully initialised query struct.
        let result = unsafe { (self.lib.cuvidGetDecoderCaps)(&mut caps) };
        check_cuvid_result(result, "cuvidGetDecoderCaps")?;

        debug!(
            codec = %codec,
            supported = caps.is_supported,
            max_width = caps.max_width,
            max_height = caps.max_height,
            max_mbs = caps.max_mb_count,
            mask = caps.output_format_mask,
            "Decoder caps queried"
        );
        Ok(DecoderCaps {
            supported: caps.is_supported != 0,
            max_width: caps.max_width,
            max_height: caps.max_height,
            max_macroblocks: u64::from(caps.max_mb_count),
            min_width: u32::from(caps.min_width),
            min_height: u32::from(caps.min_height),
            output_format_mask: caps.output_format_mask,
            engines: u32::from(caps.num_nvdecs),
        })
    }

    fn create_decoder(&mut self, params: &DecoderCreateParams) -> DecodeResult<()> {
        self.destroy_decoder();

        let mut info = CuvidDecodeCreateInfo {
            width: params.coded.width.into(),
            height: params.coded.height.into(),
            num_decode_surfaces: params.decode_surfaces.into(),
            codec_type: CudaVideoCodec::from_common(params.codec),
            chroma_format: CudaVideoChromaFormat::from_common(params.chroma),
            creation_flags: create_flags::PREFER_CUVID,
            bit_depth_minus8: params.bit_depth_minus8.into(),
            max_width: params.max.width.into(),
            max_height: params.max.height.into(),
            display_area: rect16(params.display_area),
            output_format: CudaVideoSurfaceFormat::from_common(params.output_format),
            deinterlace_mode: match params.deinterlace {
                DeinterlaceMode::Weave => CudaVideoDeinterlaceMode::Weave,
                DeinterlaceMode::Adaptive => CudaVideoDeinterlaceMode::Adaptive,
            },
            target_width: params.target.width.into(),
            target_height: params.target.height.into(),
            num_output_surfaces: params.output_surfaces.into(),
            vid_lock: self.ctx_lock,
            ..CuvidDecodeCreateInfo::default()
        };

        let _guard = self.device.push()?;
        let mut decoder: CUvideodecoder = ptr::null_mut();
        // SAFETY: info is fully initialised; the handle is written on success.
        let result = unsafe { (self.lib.cuvidCreateDecoder)(&mut decoder, &mut info) };
        if result != CUDA_SUCCESS {
            return Err(DecodeError::DecoderCreate {
                codec: params.codec,
                reason: format!("cuvidCreateDecoder failed: error {result}"),
            });
        }

        self.decoder = decoder;
        self.created = Some(params.clone());
        Ok(())
    }

    fn destroy_decoder(&mut self) {
        if self.decoder.is_null() {
            return;
        }
        let _guard = self.device.push();
        // SAFETY: decoder is a valid handle from cuvidCreateDecoder.
        let result = unsafe { (self.lib.cuvidDestroyDecoder)(self.decoder) };
        if result != CUDA_SUCCESS {
            error!(error_code = result, "Failed to destroy NVDEC decoder");
        }
        self.decoder = ptr::null_mut();
        self.created = None;
        debug!("NVDEC decoder destroyed");
    }

    fn picture_index(picture: &PictureParams) -> i32 {
        picture.surface_index()
    }

    fn decode_picture(&mut self, picture: &mut PictureParams) -> DecodeResult<()> {
        let decoder = self.require_decoder()?;
        let _guard = self.device.push()?;
        // SAFETY: decoder is live and the picture params come straight from
        // the parser's decode callback.
        let result = unsafe { (self.lib.cuvidDecodePicture)(decoder, picture.as_mut_ptr()) };
        check_cuvid_result(result, "cuvidDecodePicture")
    }

    fn map_surface(&mut self, info: &DisplayInfo) -> DecodeResult<MappedSurface> {
        let decoder = self.require_decoder()?;
        let mut params = CuvidProcParams {
            progressive_frame: info.progressive as i32,
            second_field: info.repeat_first_field + 1,
            top_field_first: info.top_field_first as i32,
            unpaired_field: (info.repeat_first_field < 0) as i32,
            output_stream: self.stream.cu_stream().cast(),
            ..CuvidProcParams::default()
        };

        let _guard = self.device.push()?;
        let mut address = 0u64;
        let mut pitch = 0u32;
        // SAFETY: decoder is live; all out-pointers reference locals.
        let result = unsafe {
            (self.lib.cuvidMapVideoFrame64)(
                decoder,
                info.picture_index,
                &mut address,
                &mut pitch,
                &mut params,
            )
        };
        check_cuvid_result(result, "cuvidMapVideoFrame64")?;

        Ok(MappedSurface {
            address,
            pitch,
            picture_index: info.picture_index,
        })
    }

    fn decode_status(&mut self, picture_index: i32) -> DecodeStatus {
        let Ok(decoder) = self.require_decoder() else {
            return DecodeStatus::Unknown;
        };
        let Ok(_guard) = self.device.push() else {
            return DecodeStatus::Unknown;
        };
        let mut status = CuvidGetDecodeStatus::default();
        // SAFETY: decoder is live; status is a zeroed out-struct.
        let result = unsafe { (self.lib.cuvidGetDecodeStatus)(decoder, picture_index, &mut status) };
        if result != CUDA_SUCCESS {
            return DecodeStatus::Unknown;
        }
        match status.decode_status {
            decode_status::IN_PROGRESS => DecodeStatus::InProgress,
            decode_status::SUCCESS => DecodeStatus::Success,
            decode_status::ERROR => DecodeStatus::Error,
            decode_status::ERROR_CONCEALED => DecodeStatus::ErrorConcealed,
            _ => DecodeStatus::Unknown,
        }
    }

    fn alloc_frame(&mut self, size: usize, location: FrameLocation) -> DecodeResult<NvFrame> {
        NvFrame::alloc(self.device.cuda(), size, location)
    }

    fn copy_plane(
        &mut self,
        src: &MappedSurface,
        dst: &mut NvFrame,
        copy: &PlaneCopy,
    ) -> DecodeResult<()> {
        let end = copy.dst_offset + copy.dst_pitch * copy.rows.saturating_sub(1) + copy.width_bytes;
        if copy.rows > 0 && end > dst.len() {
            return Err(DecodeError::AllocFailed {
                size: end,
                location: dst.location(),
            });
        }

        // SAFETY: All-zero is a valid CUDA_MEMCPY2D; the fields that matter
        // are filled in below.
        let mut desc: sys::CUDA_MEMCPY2D = unsafe { MaybeUninit::zeroed().assume_init() };
        desc.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
        desc.srcDevice = src.address + copy.src_offset as u64;
        desc.srcPitch = copy.src_pitch;
        dst.set_copy_destination(&mut desc, copy.dst_offset);
        desc.dstPitch = copy.dst_pitch;
        desc.WidthInBytes = copy.width_bytes;
        desc.Height = copy.rows;

        let _guard = self.device.push()?;
        // SAFETY: Source is a mapped surface with `src_pitch` rows; the
        // destination range was bound-checked above.
        unsafe { sys::cuMemcpy2DAsync_v2(&desc, self.stream.cu_stream()) }
            .result()
            .map_err(driver_error("cuMemcpy2DAsync"))
    }

    fn synchronize(&mut self) -> DecodeResult<()> {
        // cudarc binds the stream's context itself; the guard restores the
        // caller's context afterwards.
        let _guard = self.device.push()?;
        self.stream
            .synchronize()
            .map_err(driver_error("cuStreamSynchronize"))
    }

    fn unmap_surface(&mut self, surface: MappedSurface) -> DecodeResult<()> {
        let decoder = self.require_decoder()?;
        let _guard = self.device.push()?;
        // SAFETY: address came from cuvidMapVideoFrame64 on this decoder.
        let result = unsafe { (self.lib.cuvidUnmapVideoFrame64)(decoder, surface.address) };
        check_cuvid_result(result, "cuvidUnmapVideoFrame64")
    }

    fn stream_handle(&self) -> u64 {
        self.stream.cu_stream() as u64
    }
}

impl Drop for NvdecBackend {
    fn drop(&mut self) {
        self.destroy_decoder();
        if !self.ctx_lock.is_null() {
            // SAFETY: ctx_lock came from cuvidCtxLockCreate; no decoder
            // references it any more.
            let result = unsafe { (self.lib.cuvidCtxLockDestroy)(self.ctx_lock) };
            if result != CUDA_SUCCESS {
                warn!(error_code = result, "Failed to destroy context lock");
            }
            self.ctx_lock = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for NvdecBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvdecBackend")
            .field("device", &self.device)
            .field("decoder_ready", &!self.decoder.is_null())
            .field("params", &self.created)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_area_clamps_to_short_range() {
        let rect = rect16(Rect::new(0, 8, 70_000, 1080));
        assert_eq!(rect.left, 0);
        assert_eq!(rect.top, 8);
        assert_eq!(rect.right, i16::MAX);
        assert_eq!(rect.bottom, 1080);
    }

    #[test]
    fn empty_rect_stays_zero() {
        assert_eq!(rect16(Rect::default()), CuvidRect16::default());
    }
}
