//! [`BitstreamParser`] over the CUVID video parser.
//!
//! The C callbacks receive a pointer to a heap-pinned [`ParseScope`]. During
//! a `parse` call the scope points at the caller's event handler together
//! with handler-typed dispatch functions, so events reach the generic
//! [`EventHandler`] synchronously on the calling thread.

use std::ffi::{c_int, c_ulong, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::{debug, error, info};

use hd_common::{DecodeError, DecodeResult, DecoderConfig, Rect, Resolution, VideoCodec};

use super::backend::PictureParams;
use super::context::DeviceContext;
use super::ffi::{
    packet_flags, CUvideoparser, CuVideoFormat, CudaVideoChromaFormat, CudaVideoCodec,
    CuvidParserDispInfo, CuvidParserParams, CuvidPicParams, CuvidSourceDataPacket,
    NvcuvidLibrary, CUDA_SUCCESS,
};
use crate::backend::DisplayInfo;
use crate::layout::VideoFormat;
use crate::parser::{BitstreamParser, EventHandler, Packet};

// ── Callback scope ──

type SequenceFn = unsafe fn(*mut c_void, &CuVideoFormat) -> DecodeResult<u32>;
type DecodeFn = unsafe fn(*mut c_void, NonNull<CuvidPicParams>) -> DecodeResult<()>;
type DisplayFn = unsafe fn(*mut c_void, &CuvidParserDispInfo) -> DecodeResult<()>;

#[derive(Copy, Clone)]
struct Dispatch {
    sequence: SequenceFn,
    decode: DecodeFn,
    display: DisplayFn,
}

impl Dispatch {
    fn for_handler<H: EventHandler<PictureParams>>() -> Self {
        Self {
            sequence: dispatch_sequence::<H>,
            decode: dispatch_decode::<H>,
            display: dispatch_display::<H>,
        }
    }
}

/// What the C callbacks see through `user_data`.
struct ParseScope {
    target: *mut c_void,
    dispatch: Option<Dispatch>,
    /// First handler error of the current packet.
    error: Option<DecodeError>,
}

unsafe fn dispatch_sequence<H: EventHandler<PictureParams>>(
    target: *mut c_void,
    raw: &CuVideoFormat,
) -> DecodeResult<u32> {
    let format = video_format(raw)?;
    // SAFETY: `target` is the `&mut H` installed by NvParser::parse.
    let handler = unsafe { &mut *target.cast::<H>() };
    handler.on_format_changed(&format)
}

unsafe fn dispatch_decode<H: EventHandler<PictureParams>>(
    target: *mut c_void,
    params: NonNull<CuvidPicParams>,
) -> DecodeResult<()> {
    // SAFETY: As above; `params` is valid for the enclosing callback.
    let (handler, mut picture) = unsafe { (&mut *target.cast::<H>(), PictureParams::new(params)) };
    handler.on_picture_submitted(&mut picture)
}

unsafe fn dispatch_display<H: EventHandler<PictureParams>>(
    target: *mut c_void,
    raw: &CuvidParserDispInfo,
) -> DecodeResult<()> {
    // SAFETY: As above.
    let handler = unsafe { &mut *target.cast::<H>() };
    handler.on_picture_displayable(&display_info(raw))
}

/// Run one event against the scope, recording the first failure.
///
/// # Safety
///
/// `user_data` must be the scope pointer registered with the parser.
unsafe fn run_event<T>(
    user_data: *mut c_void,
    event: &'static str,
    call: impl FnOnce(Dispatch, *mut c_void) -> DecodeResult<T>,
) -> Option<T> {
    // SAFETY: Guaranteed by the caller; only touched from the parsing thread.
    let scope = unsafe { &mut *user_data.cast::<ParseScope>() };
    let dispatch = scope.dispatch?;
    if scope.error.is_some() {
        return None;
    }

    let target = scope.target;
    match panic::catch_unwind(AssertUnwindSafe(|| call(dispatch, target))) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            debug!(event, error = %err, "Parser event failed");
            scope.error = Some(err);
            None
        }
        Err(_) => {
            error!(event, "Panic inside parser callback");
            scope.error = Some(DecodeError::ParserRejected(format!("panic in {event} callback")));
            None
        }
    }
}

// ── C callbacks ──

unsafe extern "C" fn sequence_callback(user_data: *mut c_void, format: *mut CuVideoFormat) -> c_int {
    if format.is_null() {
        return 0;
    }
    // SAFETY: The parser passes our scope and a format valid for this call.
    let surfaces = unsafe {
        run_event(user_data, "sequence", |dispatch, target| {
            (dispatch.sequence)(target, &*format)
        })
    };
    surfaces.map_or(0, |n| c_int::try_from(n).unwrap_or(c_int::MAX))
}

unsafe extern "C" fn decode_callback(user_data: *mut c_void, params: *mut CuvidPicParams) -> c_int {
    let Some(params) = NonNull::new(params) else {
        return 0;
    };
    // SAFETY: The parser passes our scope and params valid for this call.
    let done = unsafe {
        run_event(user_data, "decode", |dispatch, target| {
            (dispatch.decode)(target, params)
        })
    };
    done.is_some() as c_int
}

unsafe extern "C" fn display_callback(
    user_data: *mut c_void,
    disp_info: *mut CuvidParserDispInfo,
) -> c_int {
    if disp_info.is_null() {
        // End of stream.
        return 1;
    }
    // SAFETY: The parser passes our scope and a display info valid for this call.
    let done = unsafe {
        run_event(user_data, "display", |dispatch, target| {
            (dispatch.display)(target, &*disp_info)
        })
    };
    done.is_some() as c_int
}

// ── Conversions ──

fn video_format(raw: &CuVideoFormat) -> DecodeResult<VideoFormat> {
    let codec = CudaVideoCodec::to_common(raw.codec)
        .ok_or_else(|| DecodeError::ParserRejected(format!("unknown codec id {}", raw.codec)))?;
    let chroma = CudaVideoChromaFormat::to_common(raw.chroma_format).ok_or_else(|| {
        DecodeError::ParserRejected(format!("unknown chroma format {}", raw.chroma_format))
    })?;

    Ok(VideoFormat {
        codec,
        chroma,
        bit_depth_minus8: u32::from(raw.bit_depth_luma_minus8),
        coded: Resolution::new(raw.coded_width, raw.coded_height),
        progressive: raw.progressive_sequence != 0,
        display_area: Rect::new(
            raw.display_area_left,
            raw.display_area_top,
            raw.display_area_right,
            raw.display_area_bottom,
        ),
        min_decode_surfaces: u32::from(raw.min_num_decode_surfaces),
    })
}

fn display_info(raw: &CuvidParserDispInfo) -> DisplayInfo {
    DisplayInfo {
        picture_index: raw.picture_index,
        progressive: raw.progressive_frame != 0,
        top_field_first: raw.top_field_first != 0,
        repeat_first_field: raw.repeat_first_field,
        timestamp: raw.timestamp,
    }
}

/// Packet flags: every packet carries its timestamp, the final one also
/// marks end of stream.
fn source_packet_flags(end_of_stream: bool) -> c_ulong {
    if end_of_stream {
        packet_flags::CUVID_PKT_TIMESTAMP | packet_flags::CUVID_PKT_ENDOFSTREAM
    } else {
        packet_flags::CUVID_PKT_TIMESTAMP
    }
}

// ── NvParser ──

/// CUVID video parser for one elementary stream.
///
/// Parsing runs with the decoder's context pushed, so every callback and
/// the hardware calls it triggers see the right context.
pub struct NvParser {
    lib: Arc<NvcuvidLibrary>,
    device: DeviceContext,
    handle: CUvideoparser,
    /// Owned; freed in Drop after the parser handle is gone.
    scope: NonNull<ParseScope>,
    codec: VideoCodec,
}

// SAFETY: The parser handle and scope are only used through &mut self,
// and the scope holds no handler outside of a parse call.
unsafe impl Send for NvParser {}

impl NvParser {
    pub fn new(lib: Arc<NvcuvidLibrary>, device: DeviceContext, config: &DecoderConfig) -> DecodeResult<Self> {
        let scope = NonNull::from(Box::leak(Box::new(ParseScope {
            target: ptr::null_mut(),
            dispatch: None,
            error: None,
        })));

        let mut params = CuvidParserParams {
            codec_type: CudaVideoCodec::from_common(config.codec),
            max_num_decode_surfaces: 1,
            clock_rate: config.clock_rate,
            error_threshold: 0,
            max_display_delay: config.display_delay(),
            user_data: scope.as_ptr().cast(),
            pfn_sequence_callback: Some(sequence_callback),
            pfn_decode_picture: Some(decode_callback),
            pfn_display_picture: Some(display_callback),
            ..CuvidParserParams::default()
        };

        let mut handle: CUvideoparser = ptr::null_mut();
        let result = match device.push() {
            // SAFETY: params is initialised and user_data points at the leaked
            // scope, which outlives the parser handle.
            Ok(_guard) => unsafe { (lib.cuvidCreateVideoParser)(&mut handle, &mut params) },
            Err(err) => {
                // SAFETY: The scope was never shared with a live parser.
                drop(unsafe { Box::from_raw(scope.as_ptr()) });
                return Err(err);
            }
        };
        if result != CUDA_SUCCESS {
            // SAFETY: The scope was never shared with a live parser.
            drop(unsafe { Box::from_raw(scope.as_ptr()) });
            return Err(DecodeError::DecoderCreate {
                codec: config.codec,
                reason: format!("cuvidCreateVideoParser failed: error {result}"),
            });
        }

        info!(
            codec = config.codec.display_name(),
            clock_rate = config.clock_rate,
            delay = config.display_delay(),
            "NVDEC parser created"
        );
        Ok(Self {
            lib,
            device,
            handle,
            scope,
            codec: config.codec,
        })
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }
}

impl BitstreamParser for NvParser {
    type Picture = PictureParams;

    fn parse<H>(&mut self, packet: Packet<'_>, handler: &mut H) -> DecodeResult<()>
    where
        H: EventHandler<PictureParams>,
    {
        let _guard = self.device.push()?;

        // SAFETY: The scope is exclusively ours outside of cuvidParseVideoData.
        unsafe {
            let scope = self.scope.as_ptr();
            (*scope).target = (handler as *mut H).cast();
            (*scope).dispatch = Some(Dispatch::for_handler::<H>());
            (*scope).error = None;
        }

        let mut raw = CuvidSourceDataPacket {
            flags: source_packet_flags(packet.is_end_of_stream()),
            payload_size: packet.data.len() as _,
            payload: if packet.data.is_empty() {
                ptr::null()
            } else {
                packet.data.as_ptr()
            },
            timestamp: packet.timestamp,
        };

        // SAFETY: handle is live; raw borrows packet.data for this call only.
        // Callbacks run synchronously on this thread.
        let result = unsafe { (self.lib.cuvidParseVideoData)(self.handle, &mut raw) };

        // SAFETY: The parse call has returned; no callback holds the scope.
        let failure = unsafe {
            let scope = self.scope.as_ptr();
            (*scope).target = ptr::null_mut();
            (*scope).dispatch = None;
            (*scope).error.take()
        };

        if let Some(err) = failure {
            return Err(err);
        }
        if result != CUDA_SUCCESS {
            return Err(DecodeError::ParserRejected(format!(
                "cuvidParseVideoData failed: error {result}"
            )));
        }
        Ok(())
    }
}

impl Drop for NvParser {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            let _guard = self.device.push();
            // SAFETY: handle came from cuvidCreateVideoParser. No callbacks
            // fire after this returns.
            let result = unsafe { (self.lib.cuvidDestroyVideoParser)(self.handle) };
            if result != CUDA_SUCCESS {
                error!(error_code = result, "Failed to destroy video parser");
            }
            self.handle = ptr::null_mut();
        }
        // SAFETY: Allocated with Box in NvParser::new and released once.
        drop(unsafe { Box::from_raw(self.scope.as_ptr()) });
        debug!(codec = self.codec.display_name(), "NVDEC parser destroyed");
    }
}

impl std::fmt::Debug for NvParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvParser").field("codec", &self.codec).finish()
    }
}
