//! NVDEC hardware tests. Run with
//! `cargo test -p hd-decoder --features nvdec -- --ignored`.
//!
//! `HD_TEST_STREAM` may point at a raw Annex-B H.264 file for the decode test.

#![cfg(feature = "nvdec")]

use std::sync::Arc;

use hd_common::{DecodeError, DecoderConfig, DeviceSelector, FrameLocation, VideoCodec};
use hd_decoder::nvdec::{self, NvcuvidLibrary};
use hd_decoder::DecoderState;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
#[ignore = "requires an NVIDIA GPU"]
fn library_loads() {
    init_tracing();
    NvcuvidLibrary::load().expect("nvcuvid should be installed");
}

#[test]
#[ignore = "requires an NVIDIA GPU"]
fn decoder_opens_without_input() {
    init_tracing();
    let dec = nvdec::open(DecoderConfig::default().with_device(DeviceSelector::Ordinal(0))).unwrap();
    assert_eq!(dec.state(), DecoderState::Uninitialized);
    assert_eq!(dec.frame_size(), None);
    assert_ne!(dec.stream_handle(), 0);
}

#[test]
#[ignore = "requires an NVIDIA GPU"]
fn two_decoders_share_one_library() {
    init_tracing();
    let lib = Arc::new(NvcuvidLibrary::load().unwrap());
    let a = nvdec::open_with(Arc::clone(&lib), DecoderConfig::default()).unwrap();
    let b = nvdec::open_with(lib, DecoderConfig::new(VideoCodec::Hevc, FrameLocation::Host)).unwrap();
    assert_ne!(a.stream_handle(), b.stream_handle());
}

#[test]
#[ignore = "requires an NVIDIA GPU"]
fn garbage_is_rejected_without_terminating() {
    init_tracing();
    let mut dec = nvdec::open(DecoderConfig::default()).unwrap();
    let result = dec.decode(&[0xff; 64], 0);
    assert!(matches!(result, Ok(0) | Err(DecodeError::ParserRejected(_))));
    assert_ne!(dec.state(), DecoderState::Terminated);
}

fn current_context() -> usize {
    let mut ctx = std::ptr::null_mut();
    // SAFETY: Out-pointer references a local.
    unsafe { cudarc::driver::sys::cuCtxGetCurrent(&mut ctx) }
        .result()
        .unwrap();
    ctx as usize
}

#[test]
#[ignore = "requires an NVIDIA GPU"]
fn parsing_leaves_the_callers_context_current() {
    init_tracing();
    let mut dec = nvdec::open(DecoderConfig::default()).unwrap();
    let before = current_context();
    let _ = dec.decode(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e], 0);
    let _ = dec.flush();
    assert_eq!(current_context(), before);
}

#[test]
#[ignore = "requires an NVIDIA GPU and HD_TEST_STREAM"]
fn decodes_annex_b_stream_to_host() {
    init_tracing();
    let Ok(path) = std::env::var("HD_TEST_STREAM") else {
        return;
    };
    let data = std::fs::read(path).unwrap();
    let mut dec = nvdec::open(DecoderConfig::new(VideoCodec::H264, FrameLocation::Host)).unwrap();

    let mut frames = 0usize;
    for (i, chunk) in data.chunks(64 * 1024).enumerate() {
        frames += dec.decode(chunk, i as i64).unwrap();
        while let Some(frame) = dec.get_frame() {
            assert_eq!(frame.host_bytes().unwrap().len(), frame.size());
        }
    }
    frames += dec.flush().unwrap();
    while dec.get_frame().is_some() {}

    assert!(frames > 0);
    assert_eq!(dec.state(), DecoderState::Active);
    assert!(dec.width().unwrap() > 0);
}
