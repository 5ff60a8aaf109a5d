//! Video codec identifiers.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    Mpeg1,
    Mpeg2,
    Mpeg4,
    Vc1,
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Jpeg,
}

impl VideoCodec {
    /// Human readable codec name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Mpeg1 => "MPEG-1",
            Self::Mpeg2 => "MPEG-2",
            Self::Mpeg4 => "MPEG-4 Part 2",
            Self::Vc1 => "VC-1",
            Self::H264 => "H.264/AVC",
            Self::Hevc => "H.265/HEVC",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
            Self::Jpeg => "JPEG",
        }
    }

    /// Map an FFmpeg `AVCodecID` value to a codec the hardware can decode.
    ///
    /// Demuxers built on libavformat hand out these ids; anything not listed
    /// has no hardware decode path.
    pub fn from_ffmpeg_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::Mpeg1),
            2 => Some(Self::Mpeg2),
            7 => Some(Self::Jpeg),
            12 => Some(Self::Mpeg4),
            27 => Some(Self::H264),
            70 => Some(Self::Vc1),
            139 => Some(Self::Vp8),
            167 => Some(Self::Vp9),
            173 => Some(Self::Hevc),
            _ => None,
        }
    }

    /// Parse a short codec name as accepted on command lines.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mpeg1" | "mpeg1video" => Some(Self::Mpeg1),
            "mpeg2" | "mpeg2video" => Some(Self::Mpeg2),
            "mpeg4" => Some(Self::Mpeg4),
            "vc1" => Some(Self::Vc1),
            "h264" | "avc" => Some(Self::H264),
            "h265" | "hevc" => Some(Self::Hevc),
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            "av1" => Some(Self::Av1),
            "jpeg" | "mjpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
