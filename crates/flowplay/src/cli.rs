use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "flowplay", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Packet queue capacity (packets). Larger absorbs more demux burst.
    #[arg(long, default_value_t = 512)]
    pub packet_queue_capacity: usize,

    /// How long the demuxer waits for queue space before dropping (ms)
    #[arg(long, default_value_t = 500)]
    pub enqueue_patience_ms: u64,

    /// Resampler input chunk size in frames
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Status line refresh interval (ms)
    #[arg(long, default_value_t = 250)]
    pub refresh_ms: u64,

    /// Print a machine-readable playback summary on exit
    #[arg(long)]
    pub stats_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local media file
    Play {
        /// Path to the media file
        path: PathBuf,
    },

    /// Print stream information for a local media file
    Probe {
        /// Path to the media file
        path: PathBuf,
    },
}
