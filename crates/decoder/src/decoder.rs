//! Public decoder entry point.
//!
//! [`HwDecoder`] accepts compressed packets and hands back decoded frames:
//!
//! ```ignore
//! let mut decoder = HwDecoder::new(parser, backend, DecoderConfig::default())?;
//! decoder.send_codec_config(&extradata)?;
//! for (data, pts) in packets {
//!     decoder.decode(data, pts)?;
//!     while let Some(frame) = decoder.get_frame() {
//!         consume(frame.device_ptr(), frame.size());
//!     }
//! }
//! decoder.flush()?;
//! while let Some(frame) = decoder.get_frame() { /* ... */ }
//! ```

use tracing::{debug, info, warn};

use hd_common::{DecodeError, DecodeResult, DecoderConfig, SurfaceFormat};

use crate::backend::HwDecodeBackend;
use crate::delivery::Frame;
use crate::health::{Health, StartupMonitor};
use crate::layout::OutputLayout;
use crate::parser::{BitstreamParser, Packet};
use crate::pipeline::{DecodePipeline, DecoderState};
use crate::stats::DecoderStats;

/// A hardware decoder instance: one parser, one engine session, one pool.
///
/// Fields drop in declaration order, so the parser is gone before the
/// pipeline releases the hardware decoder and the frame memory.
pub struct HwDecoder<P, B>
where
    P: BitstreamParser<Picture = B::Picture>,
    B: HwDecodeBackend,
{
    parser: P,
    pipeline: DecodePipeline<B>,
    config: DecoderConfig,
    packets_fed: u64,
    monitor: StartupMonitor,
}

impl<P, B> HwDecoder<P, B>
where
    P: BitstreamParser<Picture = B::Picture>,
    B: HwDecodeBackend,
{
    pub fn new(parser: P, backend: B, config: DecoderConfig) -> DecodeResult<Self> {
        config.validate()?;
        info!(
            codec = %config.codec,
            output = ?config.output,
            cache_capacity = ?config.cache_capacity,
            crop = ?config.active_crop(),
            resize = ?config.active_resize(),
            low_latency = config.low_latency,
            "Hardware decoder created"
        );
        Ok(Self {
            parser,
            pipeline: DecodePipeline::new(backend, &config),
            config,
            packets_fed: 0,
            monitor: StartupMonitor::default(),
        })
    }

    /// Feed one packet; an empty slice flushes the stream.
    ///
    /// Returns how many frames became available to [`HwDecoder::get_frame`]
    /// during this call.
    ///
    /// A packet can fail after some of its pictures were already delivered.
    /// Those frames stay buffered although the error carries no count, so
    /// keep draining [`HwDecoder::get_frame`] after a non-fatal error.
    pub fn decode(&mut self, data: &[u8], timestamp: i64) -> DecodeResult<usize> {
        self.decode_packet(Packet::new(data, timestamp))
    }

    pub fn decode_packet(&mut self, packet: Packet<'_>) -> DecodeResult<usize> {
        if self.pipeline.state() == DecoderState::Terminated {
            return Err(DecodeError::Terminated);
        }

        self.pipeline.begin_call();
        let result = self.parser.parse(packet, &mut self.pipeline);
        let ready = self.pipeline.displayed_this_call();
        self.packets_fed += 1;
        self.pipeline.stats_mut().packets_fed = self.packets_fed;

        match result {
            Ok(()) => {
                self.monitor.observe(ready);
                Ok(ready)
            }
            Err(err) => {
                self.monitor.observe(0);
                if err.is_fatal() {
                    self.pipeline.terminate(&err);
                } else {
                    if matches!(err, DecodeError::ParserRejected(_)) {
                        self.pipeline.stats_mut().rejected_packets += 1;
                    }
                    debug!(error = %err, packet = self.packets_fed, ready, "Packet failed");
                }
                Err(err)
            }
        }
    }

    /// Feed out-of-band codec initialisation bytes (sequence/picture
    /// parameter sets from the container) ahead of the first packet.
    pub fn send_codec_config(&mut self, extradata: &[u8]) -> DecodeResult<usize> {
        if extradata.is_empty() {
            warn!("No codec configuration to send");
            return Ok(0);
        }
        self.decode(extradata, 0)
    }

    /// Signal end of stream so every pending picture is delivered.
    pub fn flush(&mut self) -> DecodeResult<usize> {
        self.decode_packet(Packet::end_of_stream())
    }

    /// Oldest buffered frame, in presentation order.
    pub fn get_frame(&mut self) -> Option<Frame<'_, B::Memory>> {
        self.pipeline.next_frame()
    }

    pub fn layout(&self) -> Option<&OutputLayout> {
        self.pipeline.layout()
    }

    /// Bytes of one delivered frame; `None` before the first sequence header.
    pub fn frame_size(&self) -> Option<usize> {
        self.layout().map(OutputLayout::frame_size)
    }

    pub fn width(&self) -> Option<u32> {
        self.layout().map(|l| l.width)
    }

    pub fn height(&self) -> Option<u32> {
        self.layout().map(|l| l.luma_height)
    }

    pub fn output_format(&self) -> Option<SurfaceFormat> {
        self.layout().map(|l| l.surface_format)
    }

    /// Stream the frame copies are issued on; device-memory consumers
    /// must order their work after it.
    pub fn stream_handle(&self) -> u64 {
        self.pipeline.backend().stream_handle()
    }

    pub fn state(&self) -> DecoderState {
        self.pipeline.state()
    }

    pub fn stats(&self) -> DecoderStats {
        self.pipeline.stats()
    }

    pub fn packets_fed(&self) -> u64 {
        self.packets_fed
    }

    pub fn buffered_frames(&self) -> usize {
        self.pipeline.pool().buffered()
    }

    pub fn health(&self) -> Health {
        self.monitor.health()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        self.pipeline.backend()
    }
}

impl<P, B> std::fmt::Debug for HwDecoder<P, B>
where
    P: BitstreamParser<Picture = B::Picture>,
    B: HwDecodeBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwDecoder")
            .field("codec", &self.config.codec)
            .field("state", &self.state())
            .field("layout", &self.layout())
            .field("packets_fed", &self.packets_fed)
            .field("buffered", &self.buffered_frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DecodeStatus;
    use crate::sim::{SimParser, SimStream, SimulatedDevice};
    use hd_common::{FrameLocation, Rect, Resolution};

    type SimDecoder = HwDecoder<SimParser, SimulatedDevice>;

    fn decoder(config: DecoderConfig) -> SimDecoder {
        HwDecoder::new(SimParser::new(), SimulatedDevice::default(), config).unwrap()
    }

    fn header(w: u32, h: u32) -> Vec<u8> {
        SimStream::format(&SimStream::simple_format(w, h, 4))
    }

    #[test]
    fn geometry_unknown_before_first_header() {
        let dec = decoder(DecoderConfig::default());
        assert_eq!(dec.state(), DecoderState::Uninitialized);
        assert_eq!(dec.frame_size(), None);
        assert_eq!(dec.width(), None);
        assert_eq!(dec.stream_handle(), 0);
    }

    #[test]
    fn header_activates_decoder() {
        let mut dec = decoder(DecoderConfig::default());
        assert_eq!(dec.decode(&header(64, 48), 0).unwrap(), 0);
        assert_eq!(dec.state(), DecoderState::Active);
        assert_eq!(dec.width(), Some(64));
        assert_eq!(dec.height(), Some(48));
        assert_eq!(dec.frame_size(), Some(64 * 72));
        assert_eq!(dec.output_format(), Some(SurfaceFormat::Nv12));
    }

    #[test]
    fn decode_counts_ready_frames() {
        let mut dec = decoder(DecoderConfig::new(hd_common::VideoCodec::H264, FrameLocation::Host));
        let mut data = header(32, 32);
        data.extend(SimStream::picture(1, DecodeStatus::Success));
        data.extend(SimStream::picture(2, DecodeStatus::Success));
        assert_eq!(dec.decode(&data, 100).unwrap(), 2);
        assert_eq!(dec.buffered_frames(), 2);

        let first = dec.get_frame().unwrap();
        assert_eq!(first.timestamp(), 100);
        assert_eq!(first.host_bytes().unwrap()[0], 1);
        let second = dec.get_frame().unwrap();
        assert_eq!(second.host_bytes().unwrap()[0], 2);
        assert!(dec.get_frame().is_none());
        assert_eq!(dec.health(), Health::Healthy);
    }

    #[test]
    fn picture_before_header_is_recoverable() {
        let mut dec = decoder(DecoderConfig::default());
        let err = dec
            .decode(&SimStream::picture(0, DecodeStatus::Success), 0)
            .unwrap_err();
        assert!(matches!(err, DecodeError::NotInitialized));
        assert_eq!(dec.state(), DecoderState::Uninitialized);
        assert_eq!(dec.decode(&header(32, 32), 1).unwrap(), 0);
    }

    #[test]
    fn rejected_packets_are_counted() {
        let mut dec = decoder(DecoderConfig::default());
        assert!(dec.decode(&SimStream::reject(), 0).is_err());
        assert!(dec.decode(&SimStream::reject(), 1).is_err());
        assert_eq!(dec.stats().rejected_packets, 2);
        assert_eq!(dec.packets_fed(), 2);
        assert_eq!(dec.health(), Health::StartupMiss);
    }

    #[test]
    fn negotiation_failure_terminates() {
        let mut dec = decoder(DecoderConfig::default());
        let err = dec.decode(&header(8192, 8192), 0).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedResolution { .. }));
        assert_eq!(dec.state(), DecoderState::Terminated);
        assert!(matches!(dec.decode(&header(64, 64), 1), Err(DecodeError::Terminated)));
    }

    #[test]
    fn crop_drives_frame_geometry() {
        let config = DecoderConfig::default()
            .with_crop(Rect::new(16, 16, 48, 40))
            .with_resize(Resolution::new(128, 128));
        let mut dec = decoder(config);
        dec.decode(&header(64, 64), 0).unwrap();
        assert_eq!(dec.width(), Some(32));
        assert_eq!(dec.height(), Some(24));
    }

    #[test]
    fn empty_codec_config_is_a_no_op() {
        let mut dec = decoder(DecoderConfig::default());
        assert_eq!(dec.send_codec_config(&[]).unwrap(), 0);
        assert_eq!(dec.packets_fed(), 0);
        assert_eq!(dec.send_codec_config(&header(32, 32)).unwrap(), 0);
        assert_eq!(dec.state(), DecoderState::Active);
    }

    #[test]
    fn invalid_config_is_refused() {
        let result = HwDecoder::new(
            SimParser::new(),
            SimulatedDevice::default(),
            DecoderConfig::default().with_cache_capacity(0),
        );
        assert!(matches!(result, Err(DecodeError::InvalidConfig(_))));
    }
}
