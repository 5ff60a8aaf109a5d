//! `hd-common`: Shared types, configuration and errors for the hd decode pipeline.
//!
//! This crate is the foundation the decoder crate and the tools depend on:
//!
//! - **Codec**: `VideoCodec` (with the FFmpeg codec-id mapping)
//! - **Color**: `ChromaFormat`, `SurfaceFormat` (plane geometry per layout)
//! - **Types**: `Resolution`, `Rect`
//! - **Config**: `DecoderConfig`, `FrameLocation`, `DeviceSelector`
//! - **Errors**: `DecodeError` (thiserror-based, with fatal/recoverable split)

pub mod codec;
pub mod color;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::VideoCodec;
pub use color::{ChromaFormat, SurfaceFormat};
pub use config::{DecoderConfig, DeviceSelector, FrameLocation};
pub use error::{DecodeError, DecodeResult};
pub use types::{Rect, Resolution};
