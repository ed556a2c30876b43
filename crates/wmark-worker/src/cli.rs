use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wmark_models::{RequesterId, WatermarkPosition, WatermarkSize};

#[derive(Parser)]
#[command(name = "wmark-worker")]
#[command(author, version, about = "Add image watermarks to videos")]
pub struct Cli {
    /// Root directory for downloads and working files
    #[arg(long, global = true, env = "WMARK_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watermark a local video and drop the result in the outbox
    Run {
        /// Video to watermark
        #[arg(required = true)]
        video: PathBuf,

        /// Requester the job runs for
        #[arg(long, default_value = "1")]
        requester: RequesterId,

        /// Store this image as the requester's watermark first
        #[arg(long)]
        watermark: Option<PathBuf>,

        /// Watermark corner (top_left, top_right, bottom_left, bottom_right)
        #[arg(long)]
        position: Option<WatermarkPosition>,

        /// Watermark width as a percentage of the video width
        #[arg(long)]
        size: Option<WatermarkSize>,

        /// Where finished videos are written
        #[arg(long, default_value = "./outbox")]
        outbox: PathBuf,

        /// Directory used as the large-file host when it is enabled
        #[arg(long)]
        large_file_dir: Option<PathBuf>,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which job holds admission
    Status {
        #[arg(long, default_value = "1")]
        requester: RequesterId,
    },

    /// Check that FFmpeg and FFprobe are available
    CheckTools,
}
