use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tone_stream::tone::prepare_samples;
use tone_stream::{AudioBackend, PlaybackSession, SessionConfig, SimulatedDevice, StreamReport};

#[derive(Parser, Debug)]
#[command(name = "tone-stream")]
#[command(version, about = "Play a sine tone through a queue of device buffers")]
struct Cli {
    /// Output backend
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendChoice>,

    /// Output device name (default device when omitted)
    #[arg(long, global = true)]
    device: Option<String>,

    /// JSON session configuration; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// Software device on a virtual clock
    Simulated,
    /// System audio output
    #[cfg(feature = "streaming")]
    Rodio,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open and release a device session without playing anything
    Check,
    /// Play a short tone from a single buffer
    Simple(ToneArgs),
    /// Stream a tone through the buffer pool
    Stream(StreamArgs),
}

#[derive(Args, Debug)]
struct ToneArgs {
    /// Tone frequency in Hz
    #[arg(long)]
    pitch: Option<f32>,

    /// Tone length in seconds
    #[arg(long)]
    duration: Option<f32>,

    /// Sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Sleep between state polls in microseconds
    #[arg(long)]
    poll_backoff_us: Option<u64>,

    /// Stop after this many milliseconds without progress
    #[arg(long)]
    stall_timeout_ms: Option<u64>,

    /// Also write the tone to a WAV file
    #[arg(long)]
    wav: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StreamArgs {
    #[command(flatten)]
    tone: ToneArgs,

    /// Number of buffers in the pool
    #[arg(long)]
    buffers: Option<usize>,

    /// Samples per buffer fill
    #[arg(long)]
    chunk_size: Option<usize>,
}

const SIMPLE_DURATION_SECS: f32 = 1.0;

impl ToneArgs {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(pitch) = self.pitch {
            config.tone.pitch_hz = pitch;
        }
        if let Some(duration) = self.duration {
            config.tone.duration_secs = duration;
        }
        if let Some(rate) = self.sample_rate {
            config.tone.sample_rate = rate;
            config.stream.sample_rate = rate;
        }
        if let Some(micros) = self.poll_backoff_us {
            config.stream = config.stream.with_poll_backoff(Duration::from_micros(micros));
        }
        if let Some(millis) = self.stall_timeout_ms {
            config.stream = config.stream.with_stall_timeout(Duration::from_millis(millis));
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if cli.device.is_some() {
        config.device = cli.device.clone();
    }

    match &cli.command {
        Command::Check => {}
        Command::Simple(args) => {
            // Single-buffer playback keeps the tone short unless a file or flag says otherwise
            if cli.config.is_none() {
                config.tone.duration_secs = SIMPLE_DURATION_SECS;
            }
            args.apply(&mut config);
            config.stream.buffer_count = 1;
        }
        Command::Stream(args) => {
            args.tone.apply(&mut config);
            if let Some(buffers) = args.buffers {
                config.stream.buffer_count = buffers;
            }
            if let Some(chunk) = args.chunk_size {
                config.stream.chunk_size = chunk;
            }
        }
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[cfg(feature = "export-wav")]
fn export_wav(path: &Path, samples: &[i16], sample_rate: u32) -> anyhow::Result<()> {
    tone_stream::export::write_wav(path, samples, sample_rate, 1)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Tone written to {}", path.display());
    Ok(())
}

#[cfg(not(feature = "export-wav"))]
fn export_wav(path: &Path, _samples: &[i16], _sample_rate: u32) -> anyhow::Result<()> {
    anyhow::bail!(
        "cannot write {}: rebuild with `--features export-wav` to enable WAV export",
        path.display()
    )
}

fn print_report(report: &StreamReport) {
    println!(
        "Played {}/{} samples in {} fills ({} plays, {} restarts, {} errors, {} polls), final state {:?}",
        report.samples_queued,
        report.total_samples,
        report.fills,
        report.plays,
        report.restarts,
        report.errors,
        report.polls,
        report.final_state,
    );
}

fn run<B: AudioBackend>(
    backend: B,
    command: &Command,
    config: &SessionConfig,
) -> anyhow::Result<ExitCode> {
    let mut stderr = std::io::stderr();
    let Ok(mut session) = PlaybackSession::open(backend, config, &mut stderr) else {
        return Ok(ExitCode::FAILURE);
    };

    let (samples, wav) = match command {
        Command::Check => {
            session.close();
            println!("Audio device session opened and released successfully");
            return Ok(ExitCode::SUCCESS);
        }
        Command::Simple(args) => (
            prepare_samples(&config.tone, config.tone.sample_count(), &mut stderr),
            args.wav.as_deref(),
        ),
        Command::Stream(args) => (
            prepare_samples(&config.tone, config.tone.sample_count(), &mut stderr),
            args.tone.wav.as_deref(),
        ),
    };

    if let Some(path) = wav {
        export_wav(path, &samples, config.tone.sample_rate)?;
    }

    let report = match command {
        Command::Simple(_) => session.play_static(&samples, &config.stream, std::io::stderr())?,
        _ => session.stream(&samples, &config.stream, std::io::stderr())?,
    };
    session.close();

    print_report(&report);
    Ok(if report.errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> anyhow::Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    #[cfg(feature = "streaming")]
    let backend = cli.backend.unwrap_or(BackendChoice::Rodio);
    #[cfg(not(feature = "streaming"))]
    let backend = cli.backend.unwrap_or(BackendChoice::Simulated);

    tracing::debug!(?backend, ?config, "starting");
    match backend {
        BackendChoice::Simulated => run(SimulatedDevice::new(), &cli.command, &config),
        #[cfg(feature = "streaming")]
        BackendChoice::Rodio => run(tone_stream::RodioDevice::new(), &cli.command, &config),
    }
}
