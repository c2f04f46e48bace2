//! Wavelens CLI: waveform envelopes, metadata and spectral metrics as JSON.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use wavelens_core::audio::SymphoniaDecoder;
use wavelens_core::{
    AudioPipeline, AudioSource, DerivedMetric, DownsampleWindow, MetricValue, PipelineConfig,
};

// ─── Top-level CLI ───────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "wavelens",
    about = "Decode audio and render waveform envelopes and spectral metrics",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Min/max waveform envelope for one channel
    Envelope(EnvelopeArgs),
    /// Format, duration and tag metadata
    Metadata(SharedArgs),
    /// Spectral flux onset curve
    Flux(FluxArgs),
    /// Estimated tempo in BPM
    Tempo(SharedArgs),
}

// ─── Shared arguments (embedded in each subcommand) ──────────────

#[derive(Parser, Debug)]
struct SharedArgs {
    /// Input audio file or http(s) URL
    input: String,

    /// Decode on the calling thread before handing PCM to the executor
    #[arg(long, default_value_t = false)]
    native_decode: bool,

    /// JSON pipeline config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct EnvelopeArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Channel index
    #[arg(long, default_value_t = 0)]
    channel: usize,

    /// Number of envelope points
    #[arg(long, default_value_t = 1000)]
    points: usize,

    /// First sample index (inclusive)
    #[arg(long)]
    start: Option<usize>,

    /// Last sample index (exclusive)
    #[arg(long)]
    end: Option<usize>,
}

#[derive(Parser, Debug)]
struct FluxArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Apply moving-average smoothing
    #[arg(long, default_value_t = false)]
    smoothed: bool,
}

impl Command {
    fn shared(&self) -> &SharedArgs {
        match self {
            Command::Envelope(a) => &a.shared,
            Command::Metadata(a) | Command::Tempo(a) => a,
            Command::Flux(a) => &a.shared,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Init logging
    let log_level = if cli.command.shared().verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Command::Envelope(args) => run_envelope(args),
        Command::Metadata(args) => run_metadata(args),
        Command::Flux(args) => run_flux(args),
        Command::Tempo(args) => run_tempo(args),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Resolve the input argument to a source. URLs need the `remote` feature.
fn parse_source(input: &str) -> Result<AudioSource> {
    if input.starts_with("http://") || input.starts_with("https://") {
        return Ok(AudioSource::Url(input.to_string()));
    }
    let path = PathBuf::from(input);
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    Ok(AudioSource::File(path))
}

/// Config file (if any), then env overrides, then command-line flags.
fn build_config(args: &SharedArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            PipelineConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    config.apply_env();
    if args.native_decode {
        config.prefer_native_decode = true;
    }
    Ok(config)
}

/// Spawn the pipeline, wait for the executor and load the input.
fn open(args: &SharedArgs) -> Result<AudioPipeline> {
    let source = parse_source(&args.input)?;
    let config = build_config(args)?;

    let mut pipeline = AudioPipeline::spawn(config).context("Failed to start audio pipeline")?;
    if let Some(ext) = source.extension() {
        pipeline = pipeline.with_native_decoder(Box::new(SymphoniaDecoder::with_hint(ext)));
    }
    pipeline.wait_until_ready().context("Audio executor did not start")?;

    log::info!("Loading {}", args.input);
    let info = pipeline
        .load_audio(source)
        .with_context(|| format!("Failed to load {}", args.input))?;
    log::info!(
        "Loaded {} channels, {} samples at {} Hz ({:.2}s)",
        info.num_channels,
        info.num_samples,
        info.sample_rate,
        info.duration_s
    );
    Ok(pipeline)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{}", out);
    Ok(())
}

// ─── Subcommands ─────────────────────────────────────────────────

fn run_envelope(args: EnvelopeArgs) -> Result<()> {
    let pipeline = open(&args.shared)?;
    let view = pipeline.get_buffer_view()?;

    let window = match (args.start, args.end) {
        (None, None) => DownsampleWindow::Full,
        (start, end) => {
            DownsampleWindow::range(start.unwrap_or(0), end.unwrap_or(view.num_samples()))
        }
    };
    let envelope = view
        .get_downsampled_min_max(args.channel, args.points, window)
        .with_context(|| format!("Channel {} of {}", args.channel, view.num_channels()))?;

    log::info!("Rendered {} envelope points", envelope.len());
    print_json(&envelope)?;
    pipeline.shutdown();
    Ok(())
}

fn run_metadata(args: SharedArgs) -> Result<()> {
    let mut pipeline = open(&args)?;
    let metadata = pipeline.get_metadata()?;
    print_json(&metadata)?;
    pipeline.shutdown();
    Ok(())
}

#[derive(Serialize)]
struct FluxOutput<'a> {
    metric: DerivedMetric,
    frames_per_second: f64,
    values: &'a [f32],
}

fn run_flux(args: FluxArgs) -> Result<()> {
    let metric = if args.smoothed {
        DerivedMetric::SmoothedFlux
    } else {
        DerivedMetric::SpectralFlux
    };
    let mut pipeline = open(&args.shared)?;
    let value = pipeline.get_derived_metric(metric)?;
    let Some(values) = value.as_series() else {
        bail!("{} did not produce a series", metric);
    };

    let sample_rate = pipeline.snapshot().info.map_or(0, |i| i.sample_rate);
    let hop = pipeline.config().flux.hop_size.max(1);
    print_json(&FluxOutput {
        metric,
        frames_per_second: sample_rate as f64 / hop as f64,
        values,
    })?;
    pipeline.shutdown();
    Ok(())
}

#[derive(Serialize)]
struct TempoOutput {
    bpm: f64,
}

fn run_tempo(args: SharedArgs) -> Result<()> {
    let mut pipeline = open(&args)?;
    let bpm = match pipeline.get_derived_metric(DerivedMetric::Tempo)? {
        MetricValue::Scalar(bpm) => bpm,
        MetricValue::Series(_) => bail!("tempo did not produce a scalar"),
    };
    log::info!("Estimated tempo: {:.1} BPM", bpm);
    print_json(&TempoOutput { bpm })?;
    pipeline.shutdown();
    Ok(())
}
