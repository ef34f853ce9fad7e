//! Audio transcoder
//!
//! Converts the single audio stream of an input file to stereo AAC in the
//! container implied by the output file's extension.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use audio_transcoder::{LogFormat, TranscodeConfig};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "audio-transcoder";

#[derive(Parser, Debug, Clone)]
#[command(name = "audio-transcoder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file with exactly one audio stream
    input: PathBuf,

    /// Output file; its extension picks the container
    output: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a JSON run report on stdout after a successful run
    #[arg(long)]
    report: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match TranscodeConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}: {}", APP_NAME, e);
                return ExitCode::FAILURE;
            }
        },
        None => TranscodeConfig::default(),
    };

    init_logging(&config);
    tracing::debug!("{} v{} starting", APP_NAME, VERSION);

    if let Err(e) = audio_transcoder::init() {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }
    audio_transcoder::install_log_filter();
    tracing::debug!("FFmpeg version: {}", audio_transcoder::ffmpeg_version_info());

    match audio_transcoder::transcode_file(&cli.input, &cli.output, &config) {
        Ok(report) => {
            if cli.report {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::warn!("could not serialize report: {}", e),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with tracing
///
/// `RUST_LOG` overrides the configured level. Logs go to stderr so that the
/// report on stdout stays machine-readable.
fn init_logging(config: &TranscodeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}
