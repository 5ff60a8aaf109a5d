//! Raw FFI bindings for NVIDIA's CUVID (nvcuvid) library.
//!
//! These bindings are loaded dynamically at runtime via `libloading` and
//! cover the API surface the decode pipeline uses: capability queries,
//! decoder lifetime, picture decode, surface mapping, decode status, the
//! context lock and the bitstream parser.
//!
//! Reference: `nvcuvid.h` and `cuviddec.h` from the NVIDIA Video Codec SDK.

use std::ffi::{c_int, c_uint, c_ulong, c_void};
use std::path::Path;

use libloading::Library;
use tracing::{debug, info};

use hd_common::{ChromaFormat, SurfaceFormat, VideoCodec};

// ---------------------------------------------------------------------------
// CUDA types we reference (these come from the CUDA driver API)
// ---------------------------------------------------------------------------

/// CUDA context handle (opaque pointer).
pub type CUcontext = *mut c_void;

/// CUDA stream handle (opaque pointer).
pub type CUstream = *mut c_void;

/// CUDA device pointer (GPU virtual address).
pub type CUdeviceptr = u64;

/// CUVID API return type: 0 means success.
pub type CUresult = c_int;

/// Success return code.
pub const CUDA_SUCCESS: CUresult = 0;

// ---------------------------------------------------------------------------
// Opaque handles
// ---------------------------------------------------------------------------

/// Opaque NVDEC decoder handle.
pub type CUvideodecoder = *mut c_void;

/// Opaque CUVID video parser handle.
pub type CUvideoparser = *mut c_void;

/// Opaque context lock shared by the decoder and the mapping calls.
pub type CUvideoctxlock = *mut c_void;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Video codec identifier. Matches `cudaVideoCodec` from `cuviddec.h`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoCodec {
    Mpeg1 = 0,
    Mpeg2 = 1,
    Mpeg4 = 2,
    Vc1 = 3,
    H264 = 4,
    Jpeg = 5,
    H264Svc = 6,
    H264Mvc = 7,
    Hevc = 8,
    Vp8 = 9,
    Vp9 = 10,
    Av1 = 11,
}

impl CudaVideoCodec {
    pub fn from_common(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::Mpeg1 => Self::Mpeg1,
            VideoCodec::Mpeg2 => Self::Mpeg2,
            VideoCodec::Mpeg4 => Self::Mpeg4,
            VideoCodec::Vc1 => Self::Vc1,
            VideoCodec::H264 => Self::H264,
            VideoCodec::Hevc => Self::Hevc,
            VideoCodec::Vp8 => Self::Vp8,
            VideoCodec::Vp9 => Self::Vp9,
            VideoCodec::Av1 => Self::Av1,
            VideoCodec::Jpeg => Self::Jpeg,
        }
    }

    /// Map a raw `cudaVideoCodec` value reported by the parser.
    pub fn to_common(raw: c_int) -> Option<VideoCodec> {
        match raw {
            0 => Some(VideoCodec::Mpeg1),
            1 => Some(VideoCodec::Mpeg2),
            2 => Some(VideoCodec::Mpeg4),
            3 => Some(VideoCodec::Vc1),
            4 | 6 | 7 => Some(VideoCodec::H264),
            5 => Some(VideoCodec::Jpeg),
            8 => Some(VideoCodec::Hevc),
            9 => Some(VideoCodec::Vp8),
            10 => Some(VideoCodec::Vp9),
            11 => Some(VideoCodec::Av1),
            _ => None,
        }
    }
}

/// Output surface format. Matches `cudaVideoSurfaceFormat`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoSurfaceFormat {
    Nv12 = 0,
    P016 = 1,
    Yuy2 = 2,
    Yuv444 = 3,
    Nv24 = 4,
    Yuv444_16bit = 5,
}

impl CudaVideoSurfaceFormat {
    pub fn from_common(format: SurfaceFormat) -> Self {
        match format {
            SurfaceFormat::Nv12 => Self::Nv12,
            SurfaceFormat::P016 => Self::P016,
            SurfaceFormat::Yuv444 => Self::Yuv444,
            SurfaceFormat::Yuv444_16Bit => Self::Yuv444_16bit,
        }
    }
}

/// Deinterlace mode. Matches `cudaVideoDeinterlaceMode`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoDeinterlaceMode {
    Weave = 0,
    Bob = 1,
    Adaptive = 2,
}

/// Chroma subsampling format. Matches `cudaVideoChromaFormat`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CudaVideoChromaFormat {
    Monochrome = 0,
    Yuv420 = 1,
    Yuv422 = 2,
    Yuv444 = 3,
}

impl CudaVideoChromaFormat {
    pub fn from_common(chroma: ChromaFormat) -> Self {
        match chroma {
            ChromaFormat::Monochrome => Self::Monochrome,
            ChromaFormat::Yuv420 => Self::Yuv420,
            ChromaFormat::Yuv422 => Self::Yuv422,
            ChromaFormat::Yuv444 => Self::Yuv444,
        }
    }

    pub fn to_common(raw: c_int) -> Option<ChromaFormat> {
        match raw {
            0 => Some(ChromaFormat::Monochrome),
            1 => Some(ChromaFormat::Yuv420),
            2 => Some(ChromaFormat::Yuv422),
            3 => Some(ChromaFormat::Yuv444),
            _ => None,
        }
    }
}

/// Decoder creation flags. Matches `cudaVideoCreateFlags`.
pub mod create_flags {
    pub const DEFAULT: std::ffi::c_ulong = 0x00;
    pub const PREFER_CUDA: std::ffi::c_ulong = 0x01;
    pub const PREFER_DXVA: std::ffi::c_ulong = 0x02;
    pub const PREFER_CUVID: std::ffi::c_ulong = 0x04;
}

/// Values of `cuvidDecodeStatus`.
pub mod decode_status {
    pub const INVALID: std::ffi::c_int = 0;
    pub const IN_PROGRESS: std::ffi::c_int = 1;
    pub const SUCCESS: std::ffi::c_int = 2;
    pub const ERROR: std::ffi::c_int = 8;
    pub const ERROR_CONCEALED: std::ffi::c_int = 9;
}

// ---------------------------------------------------------------------------
// CUVIDDECODECAPS: capability query
// ---------------------------------------------------------------------------

/// Decoder capability query. Matches `CUVIDDECODECAPS`.
///
/// The codec, chroma format and bit depth are inputs; everything after
/// `reserved1` is filled by `cuvidGetDecoderCaps`.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct CuvidDecodeCaps {
    pub codec_type: CudaVideoCodec,
    pub chroma_format: CudaVideoChromaFormat,
    pub bit_depth_minus8: c_uint,
    pub reserved1: [c_uint; 3],
    pub is_supported: u8,
    pub num_nvdecs: u8,
    pub output_format_mask: u16,
    pub max_width: c_uint,
    pub max_height: c_uint,
    pub max_mb_count: c_uint,
    pub min_width: u16,
    pub min_height: u16,
    pub is_histogram_supported: u8,
    pub counter_bit_depth: u8,
    pub max_histogram_bins: u16,
    pub reserved3: [c_uint; 10],
}

impl CuvidDecodeCaps {
    pub fn query(codec: CudaVideoCodec, chroma: CudaVideoChromaFormat, bit_depth_minus8: u32) -> Self {
        Self {
            codec_type: codec,
            chroma_format: chroma,
            bit_depth_minus8,
            reserved1: [0; 3],
            is_supported: 0,
            num_nvdecs: 0,
            output_format_mask: 0,
            max_width: 0,
            max_height: 0,
            max_mb_count: 0,
            min_width: 0,
            min_height: 0,
            is_histogram_supported: 0,
            counter_bit_depth: 0,
            max_histogram_bins: 0,
            reserved3: [0; 10],
        }
    }
}

// ---------------------------------------------------------------------------
// CUVIDDECODECREATEINFO: decoder creation parameters
// ---------------------------------------------------------------------------

/// Short rectangle used by the create-info display area and target rect.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CuvidRect16 {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

/// Decoder creation info struct. Matches `CUVIDDECODECREATEINFO` from `cuviddec.h`.
///
/// `unsigned long` fields are `c_ulong`, which is 8 bytes on 64-bit Linux
/// and 4 bytes on Windows, exactly like the C header.
#[repr(C)]
#[derive(Clone)]
pub struct CuvidDecodeCreateInfo {
    pub width: c_ulong,
    pub height: c_ulong,
    pub num_decode_surfaces: c_ulong,
    pub codec_type: CudaVideoCodec,
    pub chroma_format: CudaVideoChromaFormat,
    pub creation_flags: c_ulong,
    pub bit_depth_minus8: c_ulong,
    pub intra_decode_only: c_ulong,
    pub max_width: c_ulong,
    pub max_height: c_ulong,
    pub reserved1: c_ulong,
    pub display_area: CuvidRect16,
    pub output_format: CudaVideoSurfaceFormat,
    pub deinterlace_mode: CudaVideoDeinterlaceMode,
    pub target_width: c_ulong,
    pub target_height: c_ulong,
    pub num_output_surfaces: c_ulong,
    pub vid_lock: CUvideoctxlock,
    pub target_rect: CuvidRect16,
    pub enable_histogram: c_ulong,
    pub reserved2: [c_ulong; 4],
}

impl Default for CuvidDecodeCreateInfo {
    fn default() -> Self {
        // SAFETY: All-zeros is a valid default state for this POD struct.
        // Enum fields become their zero variants and the lock pointer null.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDPICPARAMS: picture decoding parameters
// ---------------------------------------------------------------------------

/// Picture decode parameters. Matches the head of `CUVIDPICPARAMS`.
///
/// Instances are only ever produced by the parser and handed to the decode
/// callback by pointer; the codec-specific union is carried opaquely.
#[repr(C)]
pub struct CuvidPicParams {
    pub pic_width_in_mbs: c_int,
    pub frame_height_in_mbs: c_int,
    /// Decode surface this picture is written to.
    pub curr_pic_idx: c_int,
    pub field_pic_flag: c_int,
    pub bottom_field_flag: c_int,
    pub second_field: c_int,
    pub bitstream_data_len: c_uint,
    pub bitstream_data: *const u8,
    pub num_slices: c_uint,
    pub slice_data_offsets: *const c_uint,
    pub ref_pic_flag: c_int,
    pub intra_pic_flag: c_int,
    pub reserved: [c_uint; 30],
    pub codec_specific: [c_uint; 1024],
}

// ---------------------------------------------------------------------------
// CUVIDPROCPARAMS: frame mapping parameters
// ---------------------------------------------------------------------------

/// Frame mapping parameters. Matches `CUVIDPROCPARAMS` from `cuviddec.h`.
#[repr(C)]
#[derive(Clone)]
pub struct CuvidProcParams {
    pub progressive_frame: c_int,
    pub second_field: c_int,
    pub top_field_first: c_int,
    pub unpaired_field: c_int,
    pub reserved_flags: c_uint,
    pub reserved_zero: c_uint,
    pub raw_input_dptr: u64,
    pub raw_input_pitch: c_uint,
    pub raw_input_format: c_uint,
    pub raw_output_dptr: u64,
    pub raw_output_pitch: c_uint,
    pub reserved1: c_uint,
    /// Stream the post-processing and mapping run on.
    pub output_stream: CUstream,
    pub reserved: [c_uint; 46],
    pub histogram_dptr: *mut u64,
    pub reserved2: [*mut c_void; 1],
}

impl Default for CuvidProcParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct; pointers become null.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDGETDECODESTATUS: per-picture decode status
// ---------------------------------------------------------------------------

/// Matches `CUVIDGETDECODESTATUS`.
#[repr(C)]
pub struct CuvidGetDecodeStatus {
    pub decode_status: c_int,
    pub reserved: [c_uint; 31],
    pub reserved_ptrs: [*mut c_void; 8],
}

impl Default for CuvidGetDecodeStatus {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDEOFORMAT: video format from sequence callback
// ---------------------------------------------------------------------------

/// Video format information from the parser sequence callback.
/// Matches `CUVIDEOFORMAT` from `nvcuvid.h`. Enum fields are kept raw
/// because the driver may report values newer than these bindings.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct CuVideoFormat {
    pub codec: c_int,
    pub frame_rate_num: c_uint,
    pub frame_rate_den: c_uint,
    pub progressive_sequence: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub min_num_decode_surfaces: u8,
    pub coded_width: c_uint,
    pub coded_height: c_uint,
    pub display_area_left: c_int,
    pub display_area_top: c_int,
    pub display_area_right: c_int,
    pub display_area_bottom: c_int,
    pub chroma_format: c_int,
    pub bitrate: c_uint,
    pub display_aspect_ratio_x: c_int,
    pub display_aspect_ratio_y: c_int,
    pub video_signal_description_flags: c_uint,
    pub seqhdr_data_length: c_uint,
}

impl Default for CuVideoFormat {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// Parser callback types
// ---------------------------------------------------------------------------

/// Sequence header received. Returns the decode surface count to use,
/// 0 on failure, 1 to keep the parser's own choice.
pub type PfnCuvidSequenceCallback =
    unsafe extern "C" fn(user_data: *mut c_void, format: *mut CuVideoFormat) -> c_int;

/// Picture ready to decode. Returns 1 on success, 0 on failure.
pub type PfnCuvidDecodePicture =
    unsafe extern "C" fn(user_data: *mut c_void, pic_params: *mut CuvidPicParams) -> c_int;

/// Picture ready to display; `disp_info` is NULL at end of stream.
pub type PfnCuvidDisplayPicture =
    unsafe extern "C" fn(user_data: *mut c_void, disp_info: *mut CuvidParserDispInfo) -> c_int;

pub type PfnCuvidGetOperatingPoint = unsafe extern "C" fn(user_data: *mut c_void, op_info: *mut c_void) -> c_int;

pub type PfnCuvidGetSeiMsg = unsafe extern "C" fn(user_data: *mut c_void, sei_msg: *mut c_void) -> c_int;

// ---------------------------------------------------------------------------
// CUVIDPARSERPARAMS: parser creation parameters
// ---------------------------------------------------------------------------

/// Parameters for creating a video parser. Matches `CUVIDPARSERPARAMS`.
#[repr(C)]
pub struct CuvidParserParams {
    pub codec_type: CudaVideoCodec,
    pub max_num_decode_surfaces: c_uint,
    /// Timestamp clock rate (0 = 10 MHz default).
    pub clock_rate: c_uint,
    /// Error threshold (0..100, 0 = strict).
    pub error_threshold: c_uint,
    /// Max display delay (0 = no reordering latency).
    pub max_display_delay: c_uint,
    /// `bAnnexb:1`, `bMemoryOptimize:1`, `uReserved:30`.
    pub flags: c_uint,
    pub reserved1: [c_uint; 4],
    pub user_data: *mut c_void,
    pub pfn_sequence_callback: Option<PfnCuvidSequenceCallback>,
    pub pfn_decode_picture: Option<PfnCuvidDecodePicture>,
    pub pfn_display_picture: Option<PfnCuvidDisplayPicture>,
    pub pfn_get_operating_point: Option<PfnCuvidGetOperatingPoint>,
    pub pfn_get_sei_msg: Option<PfnCuvidGetSeiMsg>,
    pub reserved2: [*mut c_void; 5],
    pub ext_video_info: *mut c_void,
}

impl Default for CuvidParserParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid: function pointers become None,
        // raw pointers become null.
        unsafe { std::mem::zeroed() }
    }
}

// ---------------------------------------------------------------------------
// CUVIDPARSERDISPINFO: display info from parser
// ---------------------------------------------------------------------------

/// Display info from the parser's display callback. Matches `CUVIDPARSERDISPINFO`.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct CuvidParserDispInfo {
    pub picture_index: c_int,
    pub progressive_frame: c_int,
    pub top_field_first: c_int,
    /// Number of extra fields to repeat (-1 marks an unpaired field).
    pub repeat_first_field: c_int,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// CUVIDSOURCEDATAPACKET: data packet for parser
// ---------------------------------------------------------------------------

/// Data packet fed to the video parser. Matches `CUVIDSOURCEDATAPACKET`.
#[repr(C)]
pub struct CuvidSourceDataPacket {
    pub flags: c_ulong,
    pub payload_size: c_ulong,
    pub payload: *const u8,
    pub timestamp: i64,
}

/// Flags for `CuvidSourceDataPacket`.
pub mod packet_flags {
    use std::ffi::c_ulong;

    pub const CUVID_PKT_ENDOFSTREAM: c_ulong = 0x01;
    pub const CUVID_PKT_TIMESTAMP: c_ulong = 0x02;
    pub const CUVID_PKT_DISCONTINUITY: c_ulong = 0x04;
    pub const CUVID_PKT_ENDOFPICTURE: c_ulong = 0x08;
    pub const CUVID_PKT_NOTIFY_EOS: c_ulong = 0x10;
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

/// Dynamically loaded nvcuvid library with typed function pointers.
#[allow(non_snake_case)]
pub struct NvcuvidLibrary {
    /// Keeps the shared object mapped while any symbol is in use.
    _lib: Library,

    pub cuvidGetDecoderCaps: unsafe extern "C" fn(caps: *mut CuvidDecodeCaps) -> CUresult,
    pub cuvidCreateDecoder:
        unsafe extern "C" fn(decoder: *mut CUvideodecoder, params: *mut CuvidDecodeCreateInfo) -> CUresult,
    pub cuvidDestroyDecoder: unsafe extern "C" fn(decoder: CUvideodecoder) -> CUresult,
    pub cuvidDecodePicture:
        unsafe extern "C" fn(decoder: CUvideodecoder, params: *mut CuvidPicParams) -> CUresult,
    pub cuvidGetDecodeStatus: unsafe extern "C" fn(
        decoder: CUvideodecoder,
        pic_idx: c_int,
        status: *mut CuvidGetDecodeStatus,
    ) -> CUresult,
    pub cuvidMapVideoFrame64: unsafe extern "C" fn(
        decoder: CUvideodecoder,
        pic_idx: c_int,
        dev_ptr: *mut CUdeviceptr,
        pitch: *mut c_uint,
        params: *mut CuvidProcParams,
    ) -> CUresult,
    pub cuvidUnmapVideoFrame64:
        unsafe extern "C" fn(decoder: CUvideodecoder, dev_ptr: CUdeviceptr) -> CUresult,
    pub cuvidCtxLockCreate:
        unsafe extern "C" fn(lock: *mut CUvideoctxlock, ctx: CUcontext) -> CUresult,
    pub cuvidCtxLockDestroy: unsafe extern "C" fn(lock: CUvideoctxlock) -> CUresult,
    pub cuvidCreateVideoParser:
        unsafe extern "C" fn(parser: *mut CUvideoparser, params: *mut CuvidParserParams) -> CUresult,
    pub cuvidDestroyVideoParser: unsafe extern "C" fn(parser: CUvideoparser) -> CUresult,
    pub cuvidParseVideoData:
        unsafe extern "C" fn(parser: CUvideoparser, packet: *mut CuvidSourceDataPacket) -> CUresult,
}

// SAFETY: The function pointers reference driver entry points that may be
// called from any thread; the Library handle keeps them mapped.
unsafe impl Send for NvcuvidLibrary {}
unsafe impl Sync for NvcuvidLibrary {}

impl std::fmt::Debug for NvcuvidLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvcuvidLibrary").field("loaded", &true).finish()
    }
}

/// Copy a typed symbol out of `lib`.
///
/// # Safety
///
/// `T` must be the exact function pointer type of the named C symbol.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, NvcuvidLoadError> {
    let mut c_name = Vec::with_capacity(name.len() + 1);
    c_name.extend_from_slice(name.as_bytes());
    c_name.push(0);
    lib.get::<T>(&c_name)
        .map(|sym| *sym)
        .map_err(|e| NvcuvidLoadError::SymbolNotFound(format!("{name}: {e}")))
}

impl NvcuvidLibrary {
    /// Load the nvcuvid library from the default system path.
    pub fn load() -> Result<Self, NvcuvidLoadError> {
        let lib_name = Self::library_name();
        info!(library = %lib_name, "Loading NVDEC library");

        // SAFETY: Loading the NVIDIA driver's decode library, which only
        // registers driver entry points on load.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            NvcuvidLoadError::LibraryNotFound(format!(
                "Failed to load {lib_name}: {e}. Is the NVIDIA driver installed?"
            ))
        })?;
        Self::from_library(lib)
    }

    /// Load from a specific path (non-standard installs).
    pub fn load_from(path: &Path) -> Result<Self, NvcuvidLoadError> {
        info!(path = %path.display(), "Loading NVDEC library from custom path");

        // SAFETY: The caller asserts this path is an nvcuvid library.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            NvcuvidLoadError::LibraryNotFound(format!("Failed to load {}: {e}", path.display()))
        })?;
        Self::from_library(lib)
    }

    fn from_library(lib: Library) -> Result<Self, NvcuvidLoadError> {
        // SAFETY: Every type below matches the prototype in the SDK headers.
        unsafe {
            let loaded = Self {
                cuvidGetDecoderCaps: symbol(&lib, "cuvidGetDecoderCaps")?,
                cuvidCreateDecoder: symbol(&lib, "cuvidCreateDecoder")?,
                cuvidDestroyDecoder: symbol(&lib, "cuvidDestroyDecoder")?,
                cuvidDecodePicture: symbol(&lib, "cuvidDecodePicture")?,
                cuvidGetDecodeStatus: symbol(&lib, "cuvidGetDecodeStatus")?,
                cuvidMapVideoFrame64: symbol(&lib, "cuvidMapVideoFrame64")?,
                cuvidUnmapVideoFrame64: symbol(&lib, "cuvidUnmapVideoFrame64")?,
                cuvidCtxLockCreate: symbol(&lib, "cuvidCtxLockCreate")?,
                cuvidCtxLockDestroy: symbol(&lib, "cuvidCtxLockDestroy")?,
                cuvidCreateVideoParser: symbol(&lib, "cuvidCreateVideoParser")?,
                cuvidDestroyVideoParser: symbol(&lib, "cuvidDestroyVideoParser")?,
                cuvidParseVideoData: symbol(&lib, "cuvidParseVideoData")?,
                _lib: lib,
            };
            debug!("All NVDEC symbols loaded successfully");
            Ok(loaded)
        }
    }

    /// Get the platform-specific library filename.
    fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "nvcuvid.dll"
        } else if cfg!(target_os = "linux") {
            "libnvcuvid.so.1"
        } else {
            "libnvcuvid.so"
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur when loading the nvcuvid library.
#[derive(Debug, thiserror::Error)]
pub enum NvcuvidLoadError {
    #[error("NVDEC library not found: {0}")]
    LibraryNotFound(String),

    #[error("Required symbol not found: {0}")]
    SymbolNotFound(String),
}

impl From<NvcuvidLoadError> for hd_common::DecodeError {
    fn from(err: NvcuvidLoadError) -> Self {
        Self::LibraryUnavailable(err.to_string())
    }
}

/// Convert a CUresult into a `Hardware` error naming the call.
pub fn check_cuvid_result(result: CUresult, call: &'static str) -> hd_common::DecodeResult<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(hd_common::DecodeError::Hardware { call, code: result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trip_through_raw_values() {
        for codec in [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Vp9, VideoCodec::Av1] {
            let raw = CudaVideoCodec::from_common(codec) as c_int;
            assert_eq!(CudaVideoCodec::to_common(raw), Some(codec));
        }
        assert_eq!(CudaVideoCodec::to_common(99), None);
    }

    #[test]
    fn surface_format_values_match_mask_bits() {
        for format in [
            SurfaceFormat::Nv12,
            SurfaceFormat::P016,
            SurfaceFormat::Yuv444,
            SurfaceFormat::Yuv444_16Bit,
        ] {
            let raw = CudaVideoSurfaceFormat::from_common(format) as u32;
            assert_eq!(1u16 << raw, format.mask_bit());
        }
    }

    #[test]
    fn default_structs_are_zeroed() {
        let info = CuvidDecodeCreateInfo::default();
        assert_eq!(info.width, 0);
        assert!(info.vid_lock.is_null());

        let proc_params = CuvidProcParams::default();
        assert!(proc_params.output_stream.is_null());

        let status = CuvidGetDecodeStatus::default();
        assert_eq!(status.decode_status, decode_status::INVALID);
    }

    #[cfg(all(target_pointer_width = "64", target_os = "linux"))]
    #[test]
    fn struct_layouts_match_headers() {
        use std::mem::size_of;
        assert_eq!(size_of::<CuvidDecodeCaps>(), 88);
        assert_eq!(size_of::<CuvidGetDecodeStatus>(), 192);
        assert_eq!(size_of::<CuvidSourceDataPacket>(), 32);
        assert_eq!(size_of::<CuvidParserDispInfo>(), 24);
    }

    #[test]
    fn check_result_names_the_call() {
        assert!(check_cuvid_result(CUDA_SUCCESS, "cuvidTest").is_ok());
        let err = check_cuvid_result(1, "cuvidTest").unwrap_err();
        assert!(err.to_string().contains("cuvidTest"));
    }

    #[test]
    fn library_name_is_correct() {
        let name = NvcuvidLibrary::library_name();
        if cfg!(target_os = "windows") {
            assert_eq!(name, "nvcuvid.dll");
        } else {
            assert!(name.starts_with("libnvcuvid"));
        }
    }
}
