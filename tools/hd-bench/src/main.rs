//! hd-bench
//!
//! Decodes one or more elementary streams concurrently, one decoder per
//! thread, and reports per-stream throughput. `--simulate` runs the
//! pipeline on the simulated engine, so no GPU is needed.

mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam::channel;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hd_common::{DecoderConfig, DeviceSelector, FrameLocation, Rect, Resolution, VideoCodec};
use hd_decoder::{
    BitstreamParser, DecoderState, Health, HwDecodeBackend, HwDecoder, SharedTally, StreamReport,
};

/// Multi-stream hardware decode benchmark
#[derive(Parser, Debug)]
#[command(name = "hd-bench")]
#[command(version)]
struct Args {
    /// Raw Annex-B elementary stream files
    inputs: Vec<PathBuf>,

    /// Run on the simulated engine instead of NVDEC
    #[arg(long)]
    simulate: bool,

    /// Number of concurrent streams (inputs are reused round-robin)
    #[arg(short, long)]
    streams: Option<usize>,

    /// JSON decoder configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Codec name (h264, hevc, vp9, av1, ...)
    #[arg(long)]
    codec: Option<String>,

    /// Maximum buffered frames per decoder (unbounded when omitted)
    #[arg(long)]
    cache_capacity: Option<usize>,

    /// CUDA device ordinal; negative follows the current context
    #[arg(long, allow_hyphen_values = true)]
    device: Option<i64>,

    /// Crop rectangle as left,top,right,bottom
    #[arg(long, value_parser = parse_rect)]
    crop: Option<Rect>,

    /// Output size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_resolution)]
    resize: Option<Resolution>,

    /// Deliver frames to page-locked host memory
    #[arg(long)]
    host: bool,

    /// Disable parser reordering delay
    #[arg(long)]
    low_latency: bool,

    /// Read chunk size in bytes
    #[arg(long, default_value_t = source::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Frames per simulated stream
    #[arg(long, default_value = "600")]
    frames: usize,

    /// Simulated stream size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_resolution, default_value = "1920x1080")]
    sim_size: Resolution,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<i32> = s
        .split(',')
        .map(|p| p.trim().parse::<i32>().map_err(|e| format!("{p}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts[..] {
        [left, top, right, bottom] => Ok(Rect::new(left, top, right, bottom)),
        _ => Err(format!("expected left,top,right,bottom, got {s}")),
    }
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let width = w.trim().parse().map_err(|e| format!("{w}: {e}"))?;
    let height = h.trim().parse().map_err(|e| format!("{h}: {e}"))?;
    Ok(Resolution::new(width, height))
}

fn decoder_config(args: &Args) -> Result<DecoderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<DecoderConfig>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => DecoderConfig::default(),
    };

    if let Some(name) = &args.codec {
        config.codec = VideoCodec::from_name(name)
            .with_context(|| format!("unknown codec '{name}'"))?;
    }
    if let Some(capacity) = args.cache_capacity {
        config = config.with_cache_capacity(capacity);
    }
    if let Some(index) = args.device {
        config = config.with_device(DeviceSelector::from_index(index));
    }
    if let Some(crop) = args.crop {
        config = config.with_crop(crop);
    }
    if let Some(size) = args.resize {
        config = config.with_resize(size);
    }
    if args.host {
        config.output = FrameLocation::Host;
    }
    if args.low_latency {
        config = config.with_low_latency(true);
    }

    config.validate()?;
    Ok(config)
}

/// Which engine the workers build decoders on.
#[derive(Clone)]
enum Engine {
    Simulated,
    #[cfg(feature = "nvdec")]
    Nvdec(Arc<hd_decoder::nvdec::NvcuvidLibrary>),
}

impl Engine {
    fn select(simulate: bool) -> Result<Self> {
        if simulate {
            return Ok(Self::Simulated);
        }
        #[cfg(feature = "nvdec")]
        {
            let lib = hd_decoder::nvdec::NvcuvidLibrary::load()?;
            Ok(Self::Nvdec(Arc::new(lib)))
        }
        #[cfg(not(feature = "nvdec"))]
        bail!("built without the `nvdec` feature; pass --simulate or rebuild with --features nvdec")
    }

    fn run(
        &self,
        name: String,
        config: DecoderConfig,
        packets: &[Vec<u8>],
    ) -> hd_common::DecodeResult<StreamReport> {
        match self {
            Self::Simulated => Ok(run_stream(name, hd_decoder::simulated(config)?, packets)),
            #[cfg(feature = "nvdec")]
            Self::Nvdec(lib) => {
                let decoder = hd_decoder::nvdec::open_with(Arc::clone(lib), config)?;
                Ok(run_stream(name, decoder, packets))
            }
        }
    }
}

fn drain<P, B>(decoder: &mut HwDecoder<P, B>) -> u64
where
    P: BitstreamParser<Picture = B::Picture>,
    B: HwDecodeBackend,
{
    let mut frames = 0;
    while decoder.get_frame().is_some() {
        frames += 1;
    }
    frames
}

/// Feed every packet, pulling frames as they become ready.
fn run_stream<P, B>(name: String, mut decoder: HwDecoder<P, B>, packets: &[Vec<u8>]) -> StreamReport
where
    P: BitstreamParser<Picture = B::Picture>,
    B: HwDecodeBackend,
{
    let start = Instant::now();
    let mut frames = 0u64;

    for (i, packet) in packets.iter().enumerate() {
        match decoder.decode(packet, i as i64) {
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                error!(stream = %name, packet = i, error = %err, "Stream terminated");
                break;
            }
            Err(err) => debug!(stream = %name, packet = i, error = %err, "Packet failed"),
        }
        frames += drain(&mut decoder);
    }

    if decoder.state() != DecoderState::Terminated {
        if let Err(err) = decoder.flush() {
            warn!(stream = %name, error = %err, "Flush failed");
        }
        frames += drain(&mut decoder);
    }

    StreamReport {
        name,
        frames,
        elapsed: start.elapsed(),
        health: decoder.health(),
        stats: decoder.stats(),
    }
}

fn print_report(reports: &[StreamReport], tally: &SharedTally) {
    println!("{:<32} {:>8} {:>10} {:>8} {:>8}", "stream", "frames", "fps", "errors", "dropped");
    for report in reports {
        let errors = report.stats.decode_errors + report.stats.concealed_errors;
        println!(
            "{:<32} {:>8} {:>10.1} {:>8} {:>8}",
            report.name,
            report.frames,
            report.fps(),
            errors,
            report.stats.frames_overwritten
        );
    }

    let avg_fps = if reports.is_empty() {
        0.0
    } else {
        reports.iter().map(StreamReport::fps).sum::<f64>() / reports.len() as f64
    };
    println!(
        "total frames: {}   average fps per stream: {avg_fps:.1}",
        tally.total_frames()
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = decoder_config(&args)?;
    let engine = Engine::select(args.simulate)?;

    let sources: Vec<(String, Arc<Vec<Vec<u8>>>)> = if args.simulate {
        let packets = Arc::new(source::synthetic_packets(args.sim_size, args.frames));
        vec![(format!("sim-{}", args.sim_size), packets)]
    } else {
        if args.inputs.is_empty() {
            bail!("no input files given");
        }
        args.inputs
            .iter()
            .map(|path| {
                let packets = source::file_packets(path, args.chunk_size)?;
                Ok((path.display().to_string(), Arc::new(packets)))
            })
            .collect::<Result<_>>()?
    };

    let streams = args.streams.unwrap_or(sources.len()).max(1);
    info!(
        streams,
        codec = %config.codec,
        output = ?config.output,
        simulate = args.simulate,
        "Starting decode benchmark"
    );

    let tally = SharedTally::new();
    let (tx, rx) = channel::unbounded();
    let mut workers = Vec::with_capacity(streams);
    for n in 0..streams {
        let (source_name, packets) = sources[n % sources.len()].clone();
        let name = format!("#{n} {source_name}");
        let (engine, config, tally, tx) = (engine.clone(), config.clone(), tally.clone(), tx.clone());

        workers.push(std::thread::spawn(move || {
            let outcome = engine.run(name.clone(), config, &packets);
            if let Ok(report) = &outcome {
                tally.add_frames(report.frames);
                tally.report(report.clone());
            }
            // The receiver outlives every worker.
            let _ = tx.send((name, outcome));
        }));
    }
    drop(tx);

    let mut failed = 0usize;
    for (name, outcome) in rx {
        match outcome {
            Ok(report) => {
                info!(stream = %name, frames = report.frames, fps = report.fps(), "Stream finished");
                if report.frames == 0 || report.health == Health::PersistentFailure {
                    warn!(stream = %name, health = ?report.health, "Stream never produced a frame");
                    failed += 1;
                }
            }
            Err(err) => {
                error!(stream = %name, error = %err, "Stream could not start");
                failed += 1;
            }
        }
    }
    for worker in workers {
        if worker.join().is_err() {
            error!("Decode worker panicked");
            failed += 1;
        }
    }

    let mut reports = tally.reports();
    reports.sort_by(|a, b| a.name.cmp(&b.name));
    print_report(&reports, &tally);

    if failed > 0 {
        bail!("{failed} of {streams} streams failed");
    }
    Ok(())
}
