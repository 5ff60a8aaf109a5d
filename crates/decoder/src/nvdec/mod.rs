//! NVIDIA NVDEC engine.

mod backend;
mod context;
pub mod ffi;
mod frame;
mod parser;

use std::sync::Arc;

pub use backend::{NvdecBackend, PictureParams};
pub use context::{ContextGuard, DeviceContext};
pub use ffi::{NvcuvidLibrary, NvcuvidLoadError};
pub use frame::NvFrame;
pub use parser::NvParser;

use hd_common::{DecodeResult, DecoderConfig};

use crate::decoder::HwDecoder;

/// Decoder running on NVDEC hardware.
pub type NvDecoder = HwDecoder<NvParser, NvdecBackend>;

/// Load nvcuvid, open the configured device and build a decoder.
pub fn open(config: DecoderConfig) -> DecodeResult<NvDecoder> {
    let lib = Arc::new(NvcuvidLibrary::load()?);
    open_with(lib, config)
}

/// Build a decoder sharing an already loaded library.
pub fn open_with(lib: Arc<NvcuvidLibrary>, config: DecoderConfig) -> DecodeResult<NvDecoder> {
    config.validate()?;
    let device = DeviceContext::open(config.device)?;
    let backend = NvdecBackend::new(Arc::clone(&lib), device.clone())?;
    let parser = NvParser::new(lib, device, &config)?;
    HwDecoder::new(parser, backend, config)
}
