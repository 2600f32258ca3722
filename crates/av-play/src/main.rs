//! av-play: plays a local media file through the av-player pipeline.
//!
//! Audio goes to a CPAL output device; video frames, when the backend decodes
//! any, are paced and counted. Control commands are read from stdin, one per
//! line: `pause`, `resume`, `seek <0..1>`, `speed <x>`, `status`, `quit`.

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use av_play::cli::Args;
use av_play::config::{FileConfig, PlayConfig};
use av_play::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,av_player=info,av_play=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let path = args
        .path
        .clone()
        .ok_or_else(|| anyhow!("a media file path is required"))?;
    let file = match &args.config {
        Some(p) => FileConfig::load(p)?,
        None => FileConfig::default(),
    };
    runtime::run_play(PlayConfig::resolve(path, &args, &file), true)
}
