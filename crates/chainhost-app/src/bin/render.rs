//! Offline graph renderer
//!
//! Renders a WAV file through a saved graph document in offline mode
//! (non-real-time), driving the same processor the device callback uses.
//! Useful for checking a saved chain without opening any audio device.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use dasp::Sample as _;
use dasp::sample::I24;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainhost_audio::builtin::{self, BuiltinProvider};
use chainhost_audio::{AudioConfig, AudioGraph, GraphProcessor};
use chainhost_core::{Sample, block_sizes};
use chainhost_patch::{GraphDocument, PatchBay};

/// The graph always renders a stereo pair
const CHANNELS: usize = 2;

/// Offline graph renderer
#[derive(Parser, Debug)]
#[command(name = "chainhost-render")]
#[command(about = "Render a WAV file through a saved plugin graph", long_about = None)]
struct Args {
    /// Graph document (.ron) saved by chainhost
    #[arg(short, long)]
    graph: PathBuf,

    /// Input WAV file
    #[arg(short, long)]
    input: PathBuf,

    /// Output WAV file (32-bit float stereo)
    #[arg(short, long)]
    output: PathBuf,

    /// Processing block size
    #[arg(short, long, default_value_t = block_sizes::BLOCK_512)]
    block_size: usize,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainhost=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.block_size == 0 {
        bail!("Block size must be at least one frame");
    }

    tracing::info!("Input:  {:?}", args.input);
    tracing::info!("Output: {:?}", args.output);
    tracing::info!("Graph:  {:?}", args.graph);

    let (spec, input) = read_wav(&args.input)?;

    let document = GraphDocument::load(&args.graph)
        .with_context(|| format!("Failed to load graph {}", args.graph.display()))?;

    let (mut graph, mut processor) = AudioGraph::new(AudioConfig {
        sample_rate: spec.sample_rate,
        block_size: args.block_size,
        ..AudioConfig::default()
    });
    graph.install_io_endpoints();

    let mut bay = PatchBay::new(graph, BuiltinProvider)
        .with_known_plugins(builtin::descriptors().into_iter().collect());
    let report = bay.load(&document);
    for (id, reason) in &report.dropped_nodes {
        tracing::warn!("Node {} not rendered: {}", id, reason);
    }
    tracing::info!(
        "Rendering through {} nodes and {} wires",
        bay.topology().len(),
        bay.topology().wires().len()
    );

    let output = render(&mut processor, &input, args.block_size);

    let out_spec = WavSpec {
        channels: CHANNELS as u16,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    write_wav(&args.output, &output, out_spec)?;

    tracing::info!("Done! Output written to {:?}", args.output);
    Ok(())
}

/// Read a WAV file as planar stereo. Mono is duplicated, extra channels dropped.
fn read_wav(path: &Path) -> Result<(WavSpec, [Vec<Sample>; CHANNELS])> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let spec = reader.spec();
    tracing::info!(
        "Input format: {} Hz, {} channels, {} bits, {:?}",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );

    let samples: Vec<Sample> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("Failed to read float samples")?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(i16::to_sample::<Sample>))
            .collect::<Result<_, _>>()
            .context("Failed to read 16-bit samples")?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| I24::new_unchecked(v).to_sample::<Sample>()))
            .collect::<Result<_, _>>()
            .context("Failed to read 24-bit samples")?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(i32::to_sample::<Sample>))
            .collect::<Result<_, _>>()
            .context("Failed to read 32-bit samples")?,
        (format, bits) => bail!("Unsupported sample format: {bits}-bit {format:?}"),
    };

    Ok((spec, to_planar_stereo(&samples, usize::from(spec.channels))?))
}

fn to_planar_stereo(interleaved: &[Sample], channels: usize) -> Result<[Vec<Sample>; CHANNELS]> {
    if channels == 0 {
        bail!("Input has no channels");
    }
    let frames = interleaved.len() / channels;
    let mut planar = [Vec::with_capacity(frames), Vec::with_capacity(frames)];

    for frame in interleaved.chunks_exact(channels) {
        let left = frame[0];
        let right = frame.get(1).copied().unwrap_or(left);
        planar[0].push(left);
        planar[1].push(right);
    }
    Ok(planar)
}

/// Drive the processor block by block over the whole input
fn render(
    processor: &mut GraphProcessor,
    input: &[Vec<Sample>; CHANNELS],
    block_size: usize,
) -> [Vec<Sample>; CHANNELS] {
    let frames = input[0].len();
    let mut output = [vec![0.0; frames], vec![0.0; frames]];

    let mut offset = 0;
    while offset < frames {
        let end = (offset + block_size).min(frames);
        let inputs = [&input[0][offset..end], &input[1][offset..end]];
        let [left, right] = &mut output;
        let mut outputs = [&mut left[offset..end], &mut right[offset..end]];
        processor.process(&inputs, &mut outputs);

        offset = end;
        if offset % (block_size * 100) == 0 {
            tracing::debug!("Rendered {}/{} frames", offset, frames);
        }
    }

    tracing::info!("Rendered {} frames total", frames);
    output
}

/// Write planar stereo as interleaved float samples
fn write_wav(path: &Path, planar: &[Vec<Sample>; CHANNELS], spec: WavSpec) -> Result<()> {
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    for (&left, &right) in planar[0].iter().zip(&planar[1]) {
        writer.write_sample(left).context("Failed to write sample")?;
        writer.write_sample(right).context("Failed to write sample")?;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}
