//! Concurrent audio/video playback pipeline.
//!
//! ```text
//! source ─► Demuxer ─┬─► video packets ─► VideoDecodeWorker ─► frame queue ─► VideoOutput
//!                    └─► audio packets ─► AudioDecodeWorker ─► ring buffer ─► AudioOutput
//! ```
//!
//! Every stage runs on its own thread and talks to its neighbours only through
//! [`queue::BoundedQueue`] and [`ring_buffer::AudioRingBuffer`]. The
//! [`controller::PlaybackController`] owns one session at a time and drives
//! start/stop/pause/seek/speed across all of them.

pub mod audio;
pub mod codec;
pub mod config;
pub mod controller;
pub mod convert;
pub mod decode;
pub mod demux;
pub mod error;
pub mod media;
pub mod output;
pub mod queue;
pub mod ring_buffer;
pub mod source;
pub mod speed;
pub mod state;
pub mod video;
pub mod worker;

mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use av_player_types::{PlaybackState, PlayerStatus, QueueLevels, StopOutcome};
pub use config::PipelineConfig;
pub use controller::{MediaBackend, PlaybackController, SeekReport, SessionId, StopReport};
pub use decode::SymphoniaBackend;
pub use error::{DecodeError, PlayerError, SourceError};
pub use media::{OutputFormat, SampleFormat};
pub use output::{AudioOutput, FramePoll, VideoOutput};
