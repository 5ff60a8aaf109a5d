//! `hd-decoder`: Hardware video decode pipeline.
//!
//! Compressed packets go in through [`HwDecoder::decode`]; the bitstream
//! parser raises three events synchronously within that call:
//!
//! 1. **Format changed**: the capability negotiator validates the stream
//!    against the engine limits and the session manager (re)creates the
//!    hardware decoder for the new geometry.
//! 2. **Picture submitted**: the order tracker stamps the picture's decode
//!    surface, then the picture goes to the engine.
//! 3. **Picture displayable**: the surface is mapped, copied plane by plane
//!    into a pool slot and queued for [`HwDecoder::get_frame`].
//!
//! The engine sits behind [`HwDecodeBackend`]. Enable the `nvdec` feature
//! for NVIDIA hardware; [`sim`] is always available.

pub mod backend;
pub mod decoder;
pub mod delivery;
pub mod health;
pub mod layout;
pub mod negotiate;
pub mod order;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod session;
pub mod sim;
pub mod stats;

#[cfg(feature = "nvdec")]
pub mod nvdec;

pub use backend::{
    DecodeStatus, DecoderCaps, DecoderCreateParams, DisplayInfo, FrameMemory, HwDecodeBackend,
};
pub use decoder::HwDecoder;
pub use delivery::{Frame, FrameMeta};
pub use health::Health;
pub use layout::{OutputLayout, VideoFormat};
pub use parser::{BitstreamParser, EventHandler, Packet};
pub use pipeline::DecoderState;
pub use stats::{DecoderStats, SharedTally, StreamReport};

/// Decoder running on the simulated engine.
pub type SimDecoder = HwDecoder<sim::SimParser, sim::SimulatedDevice>;

/// Build a decoder on the simulated engine.
pub fn simulated(config: hd_common::DecoderConfig) -> hd_common::DecodeResult<SimDecoder> {
    HwDecoder::new(sim::SimParser::new(), sim::SimulatedDevice::default(), config)
}
