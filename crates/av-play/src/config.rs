//! Configuration loading and parsing.
//!
//! Every field of the TOML file is optional; anything left out keeps the
//! library default. Command-line flags win over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use av_player::{PipelineConfig, SampleFormat};

use crate::cli::Args;

/// Pipeline overrides loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Output device substring.
    pub device: Option<String>,
    pub packet_queue_capacity: Option<usize>,
    pub frame_queue_capacity: Option<usize>,
    pub ring_buffer_bytes: Option<usize>,
    pub poll_timeout_ms: Option<u64>,
    pub transient_retry_ms: Option<u64>,
    pub ring_write_timeout_ms: Option<u64>,
    pub demux_join_timeout_ms: Option<u64>,
    pub video_join_timeout_ms: Option<u64>,
    pub audio_join_timeout_ms: Option<u64>,
    pub seek_grace_ms: Option<u64>,
    pub seek_settle_ms: Option<u64>,
    pub frame_delay_ms: Option<u64>,
    pub resample_chunk_frames: Option<usize>,
    /// PCM encoding written into the ring buffer.
    pub sample_format: Option<PcmFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmFormat {
    S16,
    F32,
}

impl From<PcmFormat> for SampleFormat {
    fn from(value: PcmFormat) -> Self {
        match value {
            PcmFormat::S16 => SampleFormat::S16,
            PcmFormat::F32 => SampleFormat::F32,
        }
    }
}

impl FileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg =
            toml::from_str::<FileConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Apply the file's overrides on top of the library defaults.
    pub fn pipeline(&self) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        let ms = Duration::from_millis;

        if let Some(v) = self.packet_queue_capacity {
            cfg.packet_queue_capacity = v;
        }
        if let Some(v) = self.frame_queue_capacity {
            cfg.frame_queue_capacity = v;
        }
        if let Some(v) = self.ring_buffer_bytes {
            cfg.ring_buffer_bytes = v;
        }
        if let Some(v) = self.poll_timeout_ms {
            cfg.poll_timeout = ms(v);
        }
        if let Some(v) = self.transient_retry_ms {
            cfg.transient_retry_delay = ms(v);
        }
        if let Some(v) = self.ring_write_timeout_ms {
            cfg.ring_write_timeout = ms(v);
        }
        if let Some(v) = self.demux_join_timeout_ms {
            cfg.demux_join_timeout = ms(v);
        }
        if let Some(v) = self.video_join_timeout_ms {
            cfg.video_join_timeout = ms(v);
        }
        if let Some(v) = self.audio_join_timeout_ms {
            cfg.audio_join_timeout = ms(v);
        }
        if let Some(v) = self.seek_grace_ms {
            cfg.seek_grace = ms(v);
        }
        if let Some(v) = self.seek_settle_ms {
            cfg.seek_settle = ms(v);
        }
        if let Some(v) = self.frame_delay_ms {
            cfg.base_frame_delay = ms(v);
        }
        if let Some(v) = self.resample_chunk_frames {
            cfg.resample_chunk_frames = v;
        }
        if let Some(v) = self.sample_format {
            cfg.output.sample_format = v.into();
        }
        cfg
    }
}

/// Everything `runtime::run_play` needs.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub pipeline: PipelineConfig,
    pub start_paused: bool,
    pub speed: Option<f32>,
    pub status_interval: Option<Duration>,
}

impl PlayConfig {
    /// Merge command-line flags over an optional config file.
    pub fn resolve(path: PathBuf, args: &Args, file: &FileConfig) -> Self {
        let mut pipeline = file.pipeline();
        if let Some(v) = args.ring_bytes {
            pipeline.ring_buffer_bytes = v;
        }
        if let Some(v) = args.packet_queue {
            pipeline.packet_queue_capacity = v;
        }
        let status_interval =
            (args.status_interval_ms > 0).then(|| Duration::from_millis(args.status_interval_ms));
        Self {
            path,
            device: args.device.clone().or_else(|| file.device.clone()),
            pipeline,
            start_paused: args.paused,
            speed: args.speed,
            status_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn empty_file_keeps_defaults() {
        let file: FileConfig = toml::from_str("").unwrap();
        let cfg = file.pipeline();
        let defaults = PipelineConfig::default();
        assert_eq!(cfg.packet_queue_capacity, defaults.packet_queue_capacity);
        assert_eq!(cfg.ring_buffer_bytes, defaults.ring_buffer_bytes);
        assert_eq!(cfg.output, defaults.output);
    }

    #[test]
    fn file_overrides_apply() {
        let file: FileConfig = toml::from_str(
            r#"
            device = "USB"
            ring_buffer_bytes = 4096
            seek_settle_ms = 5
            sample_format = "f32"
            "#,
        )
        .unwrap();
        let cfg = file.pipeline();
        assert_eq!(cfg.ring_buffer_bytes, 4096);
        assert_eq!(cfg.seek_settle, Duration::from_millis(5));
        assert_eq!(cfg.output.sample_format, SampleFormat::F32);
        assert_eq!(file.device.as_deref(), Some("USB"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("ring_bytes = 1").is_err());
    }

    #[test]
    fn flags_win_over_file() {
        let file: FileConfig =
            toml::from_str("ring_buffer_bytes = 4096\ndevice = \"Speakers\"").unwrap();
        let args = Args::try_parse_from([
            "av-play",
            "a.flac",
            "--ring-bytes",
            "8192",
            "--device",
            "DAC",
            "--status-interval-ms",
            "250",
        ])
        .unwrap();
        let play = PlayConfig::resolve(PathBuf::from("a.flac"), &args, &file);
        assert_eq!(play.pipeline.ring_buffer_bytes, 8192);
        assert_eq!(play.device.as_deref(), Some("DAC"));
        assert_eq!(play.status_interval, Some(Duration::from_millis(250)));
    }
}
