//! Simulated decode engine and bitstream parser.
//!
//! Used by the test-suite and by tooling on machines without decode
//! hardware. The device keeps no pixels; every plane it "decodes" is a
//! constant byte derived from the picture's fill value and the plane number,
//! which makes plane placement checkable byte by byte.
//!
//! The simulated bitstream is a sequence of little-endian records:
//!
//! | tag   | payload                                                    |
//! |-------|------------------------------------------------------------|
//! | `F`   | codec, chroma, depth-8, progressive, surfaces (u8 each), coded w/h (u16), display l/t/r/b (u16) |
//! | `P`   | fill (u8), status (u8): decode and display immediately     |
//! | `S`   | fill (u8), status (u8): decode, hold for display           |
//! | `D`   | n (u8): display the n-th held picture                      |
//! | `X`   | none: the packet is rejected                               |
//!
//! An empty packet displays every held picture in submission order.

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use tracing::debug;

use hd_common::{
    ChromaFormat, DecodeError, DecodeResult, FrameLocation, Rect, Resolution, SurfaceFormat,
    VideoCodec,
};

use crate::backend::{
    DecodeStatus, DecoderCaps, DecoderCreateParams, DisplayInfo, FrameMemory, HwDecodeBackend,
    MappedSurface, PlaneCopy,
};
use crate::layout::VideoFormat;
use crate::parser::{BitstreamParser, EventHandler, Packet};

const CODECS: [VideoCodec; 10] = [
    VideoCodec::Mpeg1,
    VideoCodec::Mpeg2,
    VideoCodec::Mpeg4,
    VideoCodec::Vc1,
    VideoCodec::H264,
    VideoCodec::Hevc,
    VideoCodec::Vp8,
    VideoCodec::Vp9,
    VideoCodec::Av1,
    VideoCodec::Jpeg,
];

const CHROMA: [ChromaFormat; 4] = [
    ChromaFormat::Monochrome,
    ChromaFormat::Yuv420,
    ChromaFormat::Yuv422,
    ChromaFormat::Yuv444,
];

/// Row alignment of simulated surfaces.
pub const SURFACE_PITCH_ALIGN: u32 = 256;

// ── Frame memory ──

/// Frame memory of the simulated device.
#[derive(Clone, Debug)]
pub struct SimFrame {
    bytes: Vec<u8>,
    location: FrameLocation,
}

impl SimFrame {
    /// Raw bytes regardless of location.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }
}

impl FrameMemory for SimFrame {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn location(&self) -> FrameLocation {
        self.location
    }

    fn device_ptr(&self) -> Option<u64> {
        match self.location {
            FrameLocation::Device => Some(self.bytes.as_ptr() as u64),
            FrameLocation::Host => None,
        }
    }

    fn host_bytes(&self) -> Option<&[u8]> {
        match self.location {
            FrameLocation::Host => Some(&self.bytes),
            FrameLocation::Device => None,
        }
    }
}

// ── Device ──

/// A picture as handed from [`SimParser`] to [`SimulatedDevice`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimPicture {
    pub surface: i32,
    pub fill: u8,
    pub status: DecodeStatus,
}

/// Call counters of a [`SimulatedDevice`], readable after it moved into a decoder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub decoders_created: u64,
    pub decoders_destroyed: u64,
    pub pictures_decoded: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub plane_copies: u64,
    pub synchronizes: u64,
    pub allocations: u64,
    /// Surfaces currently mapped.
    pub mapped_now: u64,
    pub last_params: Option<DecoderCreateParams>,
}

/// Shared view of a device's counters.
#[derive(Clone, Debug, Default)]
pub struct SimProbe {
    counters: Arc<Mutex<SimCounters>>,
}

impl SimProbe {
    pub fn snapshot(&self) -> SimCounters {
        self.counters.lock().clone()
    }
}

#[derive(Copy, Clone, Debug)]
struct SimSurface {
    fill: u8,
    status: DecodeStatus,
}

/// In-memory stand-in for a hardware decode engine.
#[derive(Debug)]
pub struct SimulatedDevice {
    caps: DecoderCaps,
    decoder: Option<DecoderCreateParams>,
    surfaces: Vec<Option<SimSurface>>,
    probe: SimProbe,
    alloc_budget: Option<u64>,
    fail_copies: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(Self::default_caps())
    }
}

impl SimulatedDevice {
    pub fn new(caps: DecoderCaps) -> Self {
        Self {
            caps,
            decoder: None,
            surfaces: Vec::new(),
            probe: SimProbe::default(),
            alloc_budget: None,
            fail_copies: false,
        }
    }

    /// A 4K-class engine emitting every output layout.
    pub fn default_caps() -> DecoderCaps {
        DecoderCaps {
            supported: true,
            max_width: 4096,
            max_height: 4096,
            max_macroblocks: 65_536,
            min_width: 48,
            min_height: 16,
            output_format_mask: SurfaceFormat::Nv12.mask_bit()
                | SurfaceFormat::P016.mask_bit()
                | SurfaceFormat::Yuv444.mask_bit()
                | SurfaceFormat::Yuv444_16Bit.mask_bit(),
            engines: 1,
        }
    }

    /// Fail every allocation after `count` successful ones.
    pub fn with_alloc_budget(mut self, count: u64) -> Self {
        self.alloc_budget = Some(count);
        self
    }

    /// Fail every plane copy.
    pub fn with_failing_copies(mut self) -> Self {
        self.fail_copies = true;
        self
    }

    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    fn pitch(params: &DecoderCreateParams) -> u32 {
        let bpp = if params.output_format.is_high_depth() || params.bit_depth_minus8 > 0 {
            2
        } else {
            1
        };
        let row = params.target.width * bpp;
        row.div_ceil(SURFACE_PITCH_ALIGN) * SURFACE_PITCH_ALIGN
    }

    fn surface(&self, index: i32) -> DecodeResult<SimSurface> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.surfaces.get(i).copied().flatten())
            .ok_or(DecodeError::InvalidSurface {
                index: i64::from(index),
                capacity: self.surfaces.len(),
            })
    }

    fn hw_error(call: &'static str) -> DecodeError {
        DecodeError::Hardware { call, code: 1 }
    }
}

impl HwDecodeBackend for SimulatedDevice {
    type Picture = SimPicture;
    type Memory = SimFrame;

    fn query_caps(
        &mut self,
        _codec: VideoCodec,
        _chroma: ChromaFormat,
        _bit_depth_minus8: u32,
    ) -> DecodeResult<DecoderCaps> {
        Ok(self.caps.clone())
    }

    fn create_decoder(&mut self, params: &DecoderCreateParams) -> DecodeResult<()> {
        self.decoder = Some(params.clone());
        self.surfaces = vec![None; params.decode_surfaces as usize];
        let mut counters = self.probe.counters.lock();
        counters.decoders_created += 1;
        counters.last_params = Some(params.clone());
        Ok(())
    }

    fn destroy_decoder(&mut self) {
        if self.decoder.take().is_some() {
            self.surfaces.clear();
            self.probe.counters.lock().decoders_destroyed += 1;
        }
    }

    fn picture_index(picture: &SimPicture) -> i32 {
        picture.surface
    }

    fn decode_picture(&mut self, picture: &mut SimPicture) -> DecodeResult<()> {
        let slot = usize::try_from(picture.surface)
            .ok()
            .and_then(|i| self.surfaces.get_mut(i))
            .ok_or_else(|| Self::hw_error("decode_picture"))?;
        *slot = Some(SimSurface {
            fill: picture.fill,
            status: picture.status,
        });
        self.probe.counters.lock().pictures_decoded += 1;
        Ok(())
    }

    fn map_surface(&mut self, info: &DisplayInfo) -> DecodeResult<MappedSurface> {
        let params = self.decoder.as_ref().ok_or_else(|| Self::hw_error("map_surface"))?;
        let pitch = Self::pitch(params);
        self.surface(info.picture_index)?;
        let mut counters = self.probe.counters.lock();
        counters.maps += 1;
        counters.mapped_now += 1;
        Ok(MappedSurface {
            address: info.picture_index as u64,
            pitch,
            picture_index: info.picture_index,
        })
    }

    fn decode_status(&mut self, picture_index: i32) -> DecodeStatus {
        self.surface(picture_index)
            .map(|s| s.status)
            .unwrap_or(DecodeStatus::Unknown)
    }

    fn alloc_frame(&mut self, size: usize, location: FrameLocation) -> DecodeResult<SimFrame> {
        let mut counters = self.probe.counters.lock();
        if self.alloc_budget.is_some_and(|budget| counters.allocations >= budget) {
            return Err(DecodeError::AllocFailed { size, location });
        }
        counters.allocations += 1;
        Ok(SimFrame {
            bytes: vec![0; size],
            location,
        })
    }

    fn copy_plane(
        &mut self,
        src: &MappedSurface,
        dst: &mut SimFrame,
        copy: &PlaneCopy,
    ) -> DecodeResult<()> {
        if self.fail_copies {
            return Err(Self::hw_error("copy_plane"));
        }
        let params = self.decoder.as_ref().ok_or_else(|| Self::hw_error("copy_plane"))?;
        let surface = self.surface(src.picture_index)?;

        let planes = params.output_format.chroma_plane_count() as usize;
        let surface_bytes = src.pitch as usize * params.target.height as usize * (planes + 1);
        let src_end = copy.src_offset + copy.src_pitch * copy.rows.saturating_sub(1) + copy.width_bytes;
        let dst_end = copy.dst_offset + copy.dst_pitch * copy.rows.saturating_sub(1) + copy.width_bytes;
        if copy.rows > 0 && (src_end > surface_bytes || dst_end > dst.bytes.len()) {
            return Err(Self::hw_error("copy_plane"));
        }

        let value = surface.fill.wrapping_add(copy.plane as u8);
        for row in 0..copy.rows {
            let start = copy.dst_offset + row * copy.dst_pitch;
            dst.bytes[start..start + copy.width_bytes].fill(value);
        }
        self.probe.counters.lock().plane_copies += 1;
        Ok(())
    }

    fn synchronize(&mut self) -> DecodeResult<()> {
        self.probe.counters.lock().synchronizes += 1;
        Ok(())
    }

    fn unmap_surface(&mut self, _surface: MappedSurface) -> DecodeResult<()> {
        let mut counters = self.probe.counters.lock();
        counters.unmaps += 1;
        counters.mapped_now = counters.mapped_now.saturating_sub(1);
        Ok(())
    }

    fn stream_handle(&self) -> u64 {
        0
    }
}

// ── Bitstream ──

fn status_code(status: DecodeStatus) -> u8 {
    match status {
        DecodeStatus::Error => 1,
        DecodeStatus::ErrorConcealed => 2,
        _ => 0,
    }
}

fn status_from_code(code: u8) -> DecodeStatus {
    match code {
        1 => DecodeStatus::Error,
        2 => DecodeStatus::ErrorConcealed,
        _ => DecodeStatus::Success,
    }
}

/// Builders for simulated bitstream records.
pub struct SimStream;

impl SimStream {
    pub fn format(format: &VideoFormat) -> Vec<u8> {
        let codec = CODECS.iter().position(|c| *c == format.codec).unwrap_or(4) as u8;
        let chroma = CHROMA.iter().position(|c| *c == format.chroma).unwrap_or(1) as u8;
        let mut out = vec![
            b'F',
            codec,
            chroma,
            format.bit_depth_minus8 as u8,
            u8::from(format.progressive),
            format.min_decode_surfaces as u8,
        ];
        let area = format.display_area;
        for v in [
            format.coded.width as u16,
            format.coded.height as u16,
            area.left as u16,
            area.top as u16,
            area.right as u16,
            area.bottom as u16,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// 8-bit progressive 4:2:0 H.264 of the given size.
    pub fn simple_format(width: u32, height: u32, surfaces: u32) -> VideoFormat {
        VideoFormat {
            codec: VideoCodec::H264,
            chroma: ChromaFormat::Yuv420,
            bit_depth_minus8: 0,
            coded: Resolution::new(width, height),
            progressive: true,
            display_area: Rect::new(0, 0, width as i32, height as i32),
            min_decode_surfaces: surfaces,
        }
    }

    pub fn picture(fill: u8, status: DecodeStatus) -> Vec<u8> {
        vec![b'P', fill, status_code(status)]
    }

    pub fn held_picture(fill: u8) -> Vec<u8> {
        vec![b'S', fill, 0]
    }

    pub fn display_held(n: u8) -> Vec<u8> {
        vec![b'D', n]
    }

    pub fn reject() -> Vec<u8> {
        vec![b'X']
    }
}

#[derive(Debug)]
struct HeldPicture {
    surface: i32,
    timestamp: i64,
}

/// Parser for the simulated bitstream.
#[derive(Debug, Default)]
pub struct SimParser {
    surfaces: u32,
    next_surface: u32,
    held: VecDeque<HeldPicture>,
}

impl SimParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_format(cur: &mut Cursor<&[u8]>) -> std::io::Result<VideoFormat> {
        let mut head = [0u8; 5];
        cur.read_exact(&mut head)?;
        let mut dims = [0u16; 6];
        for d in &mut dims {
            *d = cur.read_u16::<LittleEndian>()?;
        }
        Ok(VideoFormat {
            codec: CODECS.get(head[0] as usize).copied().unwrap_or(VideoCodec::H264),
            chroma: CHROMA.get(head[1] as usize).copied().unwrap_or(ChromaFormat::Yuv420),
            bit_depth_minus8: u32::from(head[2]),
            progressive: head[3] != 0,
            min_decode_surfaces: u32::from(head[4]),
            coded: Resolution::new(u32::from(dims[0]), u32::from(dims[1])),
            display_area: Rect::new(
                i32::from(dims[2]),
                i32::from(dims[3]),
                i32::from(dims[4]),
                i32::from(dims[5]),
            ),
        })
    }

    fn assign_surface(&mut self) -> i32 {
        let surfaces = self.surfaces.max(1);
        let surface = self.next_surface % surfaces;
        self.next_surface = self.next_surface.wrapping_add(1);
        surface as i32
    }

    fn display<H: EventHandler<SimPicture>>(handler: &mut H, surface: i32, timestamp: i64) -> DecodeResult<()> {
        handler.on_picture_displayable(&DisplayInfo {
            picture_index: surface,
            progressive: true,
            top_field_first: false,
            repeat_first_field: 0,
            timestamp,
        })
    }
}

fn truncated(err: std::io::Error) -> DecodeError {
    DecodeError::ParserRejected(format!("truncated record: {err}"))
}

impl BitstreamParser for SimParser {
    type Picture = SimPicture;

    fn parse<H>(&mut self, packet: Packet<'_>, handler: &mut H) -> DecodeResult<()>
    where
        H: EventHandler<SimPicture>,
    {
        if packet.is_end_of_stream() {
            debug!(held = self.held.len(), "Simulated parser flushing");
            while let Some(held) = self.held.pop_front() {
                Self::display(handler, held.surface, held.timestamp)?;
            }
            return Ok(());
        }

        let mut cur = Cursor::new(packet.data);
        while (cur.position() as usize) < packet.data.len() {
            let tag = cur.read_u8().map_err(truncated)?;
            match tag {
                b'F' => {
                    let format = Self::read_format(&mut cur).map_err(truncated)?;
                    self.surfaces = handler.on_format_changed(&format)?;
                    self.next_surface = 0;
                    self.held.clear();
                }
                b'P' | b'S' => {
                    let fill = cur.read_u8().map_err(truncated)?;
                    let status = status_from_code(cur.read_u8().map_err(truncated)?);
                    let surface = self.assign_surface();
                    let mut picture = SimPicture {
                        surface,
                        fill,
                        status,
                    };
                    handler.on_picture_submitted(&mut picture)?;
                    if tag == b'P' {
                        Self::display(handler, surface, packet.timestamp)?;
                    } else {
                        self.held.push_back(HeldPicture {
                            surface,
                            timestamp: packet.timestamp,
                        });
                    }
                }
                b'D' => {
                    let n = cur.read_u8().map_err(truncated)? as usize;
                    let held = self.held.remove(n).ok_or_else(|| {
                        DecodeError::ParserRejected(format!("no held picture #{n}"))
                    })?;
                    Self::display(handler, held.surface, held.timestamp)?;
                }
                b'X' => {
                    return Err(DecodeError::ParserRejected("simulated rejection".into()));
                }
                other => {
                    return Err(DecodeError::ParserRejected(format!(
                        "unknown record tag 0x{other:02x}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        formats: Vec<VideoFormat>,
        submitted: Vec<SimPicture>,
        displayed: Vec<(i32, i64)>,
    }

    impl EventHandler<SimPicture> for Recorder {
        fn on_format_changed(&mut self, format: &VideoFormat) -> DecodeResult<u32> {
            self.formats.push(format.clone());
            Ok(format.min_decode_surfaces)
        }

        fn on_picture_submitted(&mut self, picture: &mut SimPicture) -> DecodeResult<()> {
            self.submitted.push(picture.clone());
            Ok(())
        }

        fn on_picture_displayable(&mut self, info: &DisplayInfo) -> DecodeResult<()> {
            self.displayed.push((info.picture_index, info.timestamp));
            Ok(())
        }
    }

    #[test]
    fn format_record_survives_parsing() {
        let mut format = SimStream::simple_format(1920, 1088, 6);
        format.codec = VideoCodec::Hevc;
        format.chroma = ChromaFormat::Yuv444;
        format.bit_depth_minus8 = 2;
        format.display_area = Rect::new(0, 0, 1920, 1080);

        let mut parser = SimParser::new();
        let mut rec = Recorder::default();
        parser
            .parse(Packet::new(&SimStream::format(&format), 0), &mut rec)
            .unwrap();
        assert_eq!(rec.formats, vec![format]);
    }

    #[test]
    fn surfaces_rotate_within_negotiated_count() {
        let mut parser = SimParser::new();
        let mut rec = Recorder::default();
        let mut data = SimStream::format(&SimStream::simple_format(64, 64, 2));
        for fill in 0..3 {
            data.extend(SimStream::picture(fill, DecodeStatus::Success));
        }
        parser.parse(Packet::new(&data, 7), &mut rec).unwrap();
        let surfaces: Vec<_> = rec.submitted.iter().map(|p| p.surface).collect();
        assert_eq!(surfaces, vec![0, 1, 0]);
        assert_eq!(rec.displayed, vec![(0, 7), (1, 7), (0, 7)]);
    }

    #[test]
    fn held_pictures_display_out_of_order_and_flush() {
        let mut parser = SimParser::new();
        let mut rec = Recorder::default();
        let fmt = SimStream::format(&SimStream::simple_format(64, 64, 4));
        parser.parse(Packet::new(&fmt, 0), &mut rec).unwrap();
        parser.parse(Packet::new(&SimStream::held_picture(1), 10), &mut rec).unwrap();
        parser.parse(Packet::new(&SimStream::held_picture(2), 20), &mut rec).unwrap();
        parser.parse(Packet::new(&SimStream::display_held(1), 30), &mut rec).unwrap();
        assert_eq!(rec.displayed, vec![(1, 20)]);
        parser.parse(Packet::end_of_stream(), &mut rec).unwrap();
        assert_eq!(rec.displayed, vec![(1, 20), (0, 10)]);
    }

    #[test]
    fn malformed_packets_are_rejected() {
        let mut parser = SimParser::new();
        let mut rec = Recorder::default();
        assert!(matches!(
            parser.parse(Packet::new(&SimStream::reject(), 0), &mut rec),
            Err(DecodeError::ParserRejected(_))
        ));
        assert!(matches!(
            parser.parse(Packet::new(&[b'P', 1], 0), &mut rec),
            Err(DecodeError::ParserRejected(_))
        ));
        assert!(matches!(
            parser.parse(Packet::new(&[0xAB], 0), &mut rec),
            Err(DecodeError::ParserRejected(_))
        ));
    }

    #[test]
    fn device_copies_constant_planes() {
        let mut dev = SimulatedDevice::default();
        let format = SimStream::simple_format(16, 8, 2);
        let params = DecoderCreateParams {
            codec: format.codec,
            chroma: format.chroma,
            bit_depth_minus8: 0,
            output_format: SurfaceFormat::Nv12,
            deinterlace: crate::backend::DeinterlaceMode::Weave,
            coded: format.coded,
            max: format.coded,
            target: format.coded,
            display_area: Rect::default(),
            decode_surfaces: 2,
            output_surfaces: 2,
        };
        dev.create_decoder(&params).unwrap();
        dev.decode_picture(&mut SimPicture {
            surface: 1,
            fill: 40,
            status: DecodeStatus::Success,
        })
        .unwrap();

        let info = DisplayInfo {
            picture_index: 1,
            ..DisplayInfo::default()
        };
        let mapped = dev.map_surface(&info).unwrap();
        assert_eq!(mapped.pitch, SURFACE_PITCH_ALIGN);

        let layout = crate::layout::OutputLayout::new(SurfaceFormat::Nv12, 0, 16, 8, 8);
        let mut frame = dev.alloc_frame(layout.frame_size(), FrameLocation::Host).unwrap();
        for copy in layout.plane_copies(mapped.pitch) {
            dev.copy_plane(&mapped, &mut frame, &copy).unwrap();
        }
        dev.unmap_surface(mapped).unwrap();

        let bytes = frame.host_bytes().unwrap();
        assert!(bytes[..128].iter().all(|b| *b == 40));
        assert!(bytes[128..].iter().all(|b| *b == 41));
        let counters = dev.probe().snapshot();
        assert_eq!(counters.plane_copies, 2);
        assert_eq!(counters.mapped_now, 0);
    }

    #[test]
    fn alloc_budget_is_enforced() {
        let mut dev = SimulatedDevice::default().with_alloc_budget(1);
        assert!(dev.alloc_frame(8, FrameLocation::Device).is_ok());
        assert!(matches!(
            dev.alloc_frame(8, FrameLocation::Device),
            Err(DecodeError::AllocFailed { size: 8, .. })
        ));
    }
}
