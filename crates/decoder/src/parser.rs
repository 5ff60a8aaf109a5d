//! Bitstream parser abstraction and the events it raises.

use hd_common::DecodeResult;

use crate::backend::DisplayInfo;
use crate::layout::VideoFormat;

/// A chunk of compressed elementary stream.
#[derive(Copy, Clone, Debug)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    pub timestamp: i64,
}

impl<'a> Packet<'a> {
    pub fn new(data: &'a [u8], timestamp: i64) -> Self {
        Self { data, timestamp }
    }

    /// Empty packet that flushes every pending picture.
    pub fn end_of_stream() -> Self {
        Self {
            data: &[],
            timestamp: 0,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.is_empty()
    }
}

/// Receiver of parser events, invoked synchronously from [`BitstreamParser::parse`].
pub trait EventHandler<P> {
    /// A new sequence header arrived. Returns the number of decode surfaces
    /// the parser may use.
    fn on_format_changed(&mut self, format: &VideoFormat) -> DecodeResult<u32>;

    /// A complete picture is ready to be submitted to the engine.
    fn on_picture_submitted(&mut self, picture: &mut P) -> DecodeResult<()>;

    /// A decoded picture is ready to be presented.
    fn on_picture_displayable(&mut self, info: &DisplayInfo) -> DecodeResult<()>;
}

/// Splits packets into pictures and raises [`EventHandler`] events.
pub trait BitstreamParser: Send {
    type Picture;

    /// Parse one packet. The first handler error aborts the packet and is
    /// returned as-is; a malformed packet yields `ParserRejected`.
    fn parse<H>(&mut self, packet: Packet<'_>, handler: &mut H) -> DecodeResult<()>
    where
        H: EventHandler<Self::Picture>;
}
