//! Decoder configuration.

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::error::DecodeError;
use crate::types::{Rect, Resolution};

/// Where decoded frames are delivered.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameLocation {
    /// Device memory; copies complete asynchronously on the session stream.
    #[default]
    Device,
    /// Page-locked host memory; the decode call waits for copies to land.
    Host,
}

/// Which GPU a decoder session runs on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceSelector {
    /// Whatever device is current on the calling thread.
    #[default]
    Current,
    /// Explicit device ordinal.
    Ordinal(usize),
}

impl DeviceSelector {
    /// Map the conventional `-1 = current` integer form.
    pub fn from_index(index: i64) -> Self {
        match usize::try_from(index) {
            Ok(ordinal) => Self::Ordinal(ordinal),
            Err(_) => Self::Current,
        }
    }
}

/// Hardware decoder configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub codec: VideoCodec,
    pub output: FrameLocation,
    /// Maximum number of frame buffers; `None` grows without bound.
    pub cache_capacity: Option<usize>,
    pub device: DeviceSelector,
    pub crop: Option<Rect>,
    pub resize: Option<Resolution>,
    /// Deliver pictures without reorder delay.
    pub low_latency: bool,
    /// Timestamp clock rate handed to the bitstream parser.
    pub clock_rate: u32,
    /// Initial decoder size for reconfiguration headroom (0 = coded size).
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            output: FrameLocation::Device,
            cache_capacity: None,
            device: DeviceSelector::Current,
            crop: None,
            resize: None,
            low_latency: false,
            clock_rate: 1000,
            max_width: 0,
            max_height: 0,
        }
    }
}

impl DecoderConfig {
    pub fn new(codec: VideoCodec, output: FrameLocation) -> Self {
        Self {
            codec,
            output,
            ..Self::default()
        }
    }

    pub fn with_cache_capacity(mut self, capacity: impl Into<Option<usize>>) -> Self {
        self.cache_capacity = capacity.into();
        self
    }

    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.device = device;
        self
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_resize(mut self, resize: Resolution) -> Self {
        self.resize = Some(resize);
        self
    }

    pub fn with_low_latency(mut self, low_latency: bool) -> Self {
        self.low_latency = low_latency;
        self
    }

    /// Crop rectangle, if one is actually in effect.
    pub fn active_crop(&self) -> Option<Rect> {
        self.crop.filter(|c| c.is_set())
    }

    /// Resize target, if one is actually in effect.
    pub fn active_resize(&self) -> Option<Resolution> {
        self.resize.filter(|r| r.is_set())
    }

    /// Parser reorder delay in pictures.
    pub fn display_delay(&self) -> u32 {
        if self.low_latency {
            0
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.cache_capacity == Some(0) {
            return Err(DecodeError::InvalidConfig(
                "cache capacity must be at least one frame".into(),
            ));
        }
        if let Some(crop) = self.active_crop() {
            if crop.left < 0 || crop.top < 0 || crop.width() == 0 || crop.height() == 0 {
                return Err(DecodeError::InvalidConfig(format!(
                    "crop rectangle {crop} is empty or negative"
                )));
            }
        }
        if self.clock_rate == 0 {
            return Err(DecodeError::InvalidConfig("clock rate must be non-zero".into()));
        }
        Ok(())
    }
}
