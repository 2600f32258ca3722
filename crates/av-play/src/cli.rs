use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "av-play", version)]
pub struct Args {
    /// Media file to play
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// TOML file with pipeline overrides
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Open the file but wait for `resume` before playing
    #[arg(long)]
    pub paused: bool,

    /// Playback speed applied once the session starts (0 < speed <= 4)
    #[arg(long)]
    pub speed: Option<f32>,

    /// PCM ring buffer size in bytes
    #[arg(long)]
    pub ring_bytes: Option<usize>,

    /// Compressed units buffered per stream
    #[arg(long)]
    pub packet_queue: Option<usize>,

    /// Print a JSON status line at this interval in milliseconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub status_interval_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_required_unless_listing() {
        assert!(Args::try_parse_from(["av-play"]).is_err());
        let args = Args::try_parse_from(["av-play", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.path.is_none());
    }

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "av-play",
            "movie.mkv",
            "--speed",
            "1.5",
            "--ring-bytes",
            "65536",
            "--paused",
        ])
        .unwrap();
        assert_eq!(args.path, Some(PathBuf::from("movie.mkv")));
        assert_eq!(args.speed, Some(1.5));
        assert_eq!(args.ring_bytes, Some(65536));
        assert!(args.paused);
        assert_eq!(args.status_interval_ms, 0);
    }
}
