//! Packet sources for benchmark streams.

use std::path::Path;

use anyhow::{Context, Result};
use hd_common::Resolution;
use hd_decoder::backend::DecodeStatus;
use hd_decoder::sim::SimStream;

/// Read chunk size for raw elementary streams. The parser reassembles
/// NAL units across chunk boundaries.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Split a raw Annex-B elementary stream file into fixed-size packets.
pub fn file_packets(path: &Path, chunk_size: usize) -> Result<Vec<Vec<u8>>> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    anyhow::ensure!(!data.is_empty(), "{} is empty", path.display());
    Ok(data.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect())
}

/// A simulated stream: one sequence header, then one picture per packet.
pub fn synthetic_packets(size: Resolution, frames: usize) -> Vec<Vec<u8>> {
    let header = SimStream::simple_format(size.width, size.height, 8);
    let mut packets = Vec::with_capacity(frames + 1);
    packets.push(SimStream::format(&header));
    packets.extend((0..frames).map(|i| SimStream::picture(i as u8, DecodeStatus::Success)));
    packets
}
