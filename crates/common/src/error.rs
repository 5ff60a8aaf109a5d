//! Decode pipeline error types (thiserror-based).

use thiserror::Error;

use crate::codec::VideoCodec;
use crate::color::ChromaFormat;
use crate::config::FrameLocation;

/// Hardware decode errors.
///
/// Variants are split into two classes, see [`DecodeError::is_fatal`]:
/// negotiation and decoder-creation failures terminate the decoder instance,
/// while per-packet failures (including a failed frame allocation) leave it
/// usable for the next call.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Codec not supported by hardware: {codec} {chroma:?} {bit_depth}-bit")]
    UnsupportedCodec {
        codec: VideoCodec,
        chroma: ChromaFormat,
        bit_depth: u32,
    },

    #[error("Resolution {width}x{height} exceeds hardware maximum {max_width}x{max_height}")]
    UnsupportedResolution {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Macroblock count {macroblocks} exceeds hardware maximum {max_macroblocks}")]
    UnsupportedComplexity { macroblocks: u64, max_macroblocks: u64 },

    #[error("No supported output format found (capability mask 0x{mask:04x})")]
    NoOutputFormat { mask: u16 },

    #[error("HW decoder creation failed for {codec}: {reason}")]
    DecoderCreate { codec: VideoCodec, reason: String },

    #[error("Frame buffer allocation failed: {size} bytes of {location:?} memory")]
    AllocFailed { size: usize, location: FrameLocation },

    #[error("Bitstream parser rejected packet: {0}")]
    ParserRejected(String),

    #[error("Picture submitted before any sequence header was negotiated")]
    NotInitialized,

    #[error("Decode surface index {index} out of range (capacity {capacity})")]
    InvalidSurface { index: i64, capacity: usize },

    #[error("{call} failed with error code {code}")]
    Hardware { call: &'static str, code: i32 },

    #[error("Decoder terminated after a fatal error")]
    Terminated,

    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),

    #[error("Hardware decode library unavailable: {0}")]
    LibraryUnavailable(String),
}

impl DecodeError {
    /// Whether this error moves the decoder into its terminal state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedCodec { .. }
                | Self::UnsupportedResolution { .. }
                | Self::UnsupportedComplexity { .. }
                | Self::NoOutputFormat { .. }
                | Self::DecoderCreate { .. }
                | Self::Terminated
                | Self::InvalidConfig(_)
                | Self::LibraryUnavailable(_)
        )
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_failures_are_fatal() {
        let err = DecodeError::UnsupportedResolution {
            width: 8192,
            height: 8192,
            max_width: 4096,
            max_height: 4096,
        };
        assert!(err.is_fatal());
        assert!(DecodeError::NoOutputFormat { mask: 0 }.is_fatal());
    }

    #[test]
    fn packet_failures_are_recoverable() {
        assert!(!DecodeError::ParserRejected("bad slice".into()).is_fatal());
        assert!(!DecodeError::NotInitialized.is_fatal());
        assert!(!DecodeError::AllocFailed {
            size: 3_110_400,
            location: FrameLocation::Host
        }
        .is_fatal());
        assert!(!DecodeError::Hardware {
            call: "cuvidMapVideoFrame64",
            code: 1
        }
        .is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let msg = DecodeError::UnsupportedComplexity {
            macroblocks: 40_000,
            max_macroblocks: 36_864,
        }
        .to_string();
        assert!(msg.contains("40000"));
        assert!(msg.contains("36864"));

        let msg = DecodeError::NoOutputFormat { mask: 0x10 }.to_string();
        assert!(msg.contains("0x0010"));
    }
}
