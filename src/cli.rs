use clap::{Args, Parser, Subcommand};
use ffswitch::engine::Codec;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffswitch")]
#[command(
    about = "Convert videos with the best available encoder, falling back to software when hardware fails",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub overrides: Overrides,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print outcomes as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

/// Per-run overrides of the config file's defaults
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Output codec (hevc, h264, av1, vp9)
    #[arg(long, global = true, value_name = "CODEC")]
    pub codec: Option<Codec>,

    /// Quality level (CRF-like; clamped to the codec's range)
    #[arg(long, global = true, value_name = "N")]
    pub quality: Option<u32>,

    /// Convert HDR inputs to SDR output
    #[arg(long, global = true)]
    pub no_hdr: bool,

    /// Directory for converted files (defaults to next to the input)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Convert even if the output file already exists
    #[arg(long, global = true)]
    pub overwrite: bool,

    /// Never try GPU encoders
    #[arg(long, global = true)]
    pub software_only: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a single file
    Convert {
        /// Path to the video file
        file: PathBuf,
    },

    /// Convert every matching video under a directory
    Batch {
        /// Directory to scan (defaults to current directory)
        directory: Option<PathBuf>,

        /// Show the fallback chain for each file without encoding
        #[arg(long)]
        dry_run: bool,

        /// Only convert inputs with this codec ("any" disables the filter)
        #[arg(long, value_name = "CODEC")]
        input_codec: Option<String>,
    },

    /// Show detected encoder backends, hwaccels and HDR filters
    Caps,

    /// Probe a video file for codec, duration and HDR signaling
    Probe {
        /// Path to the video file
        file: PathBuf,
    },

    /// Check if ffmpeg and ffprobe are installed
    CheckFfmpeg,

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}
