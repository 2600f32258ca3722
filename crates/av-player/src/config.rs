use std::time::Duration;

use crate::media::OutputFormat;
use crate::worker::WorkerTiming;

/// Capacities and timings shared by every stage of a session.
///
/// All blocking operations in the pipeline are bounded by one of these values so
/// worker loops can re-check their stop flag; tests shrink them for speed.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Compressed units buffered per elementary stream.
    pub packet_queue_capacity: usize,
    /// Decoded video frames buffered for the presentation sink.
    pub frame_queue_capacity: usize,
    /// Size of the PCM ring buffer in bytes.
    pub ring_buffer_bytes: usize,
    /// Bound for every blocking pop/read inside a worker loop.
    pub poll_timeout: Duration,
    /// Sleep between source reads that produced no data.
    pub transient_retry_delay: Duration,
    /// Bound for each PCM write into the ring buffer.
    pub ring_write_timeout: Duration,
    pub demux_join_timeout: Duration,
    pub video_join_timeout: Duration,
    pub audio_join_timeout: Duration,
    /// Pause between raising `Seeking` and touching the source, so presenters
    /// stop rendering first.
    pub seek_grace: Duration,
    /// Pause after flushing so decoders can produce post-seek data before
    /// `Seeking` is cleared.
    pub seek_settle: Duration,
    /// Presentation interval at 1x speed.
    pub base_frame_delay: Duration,
    /// Fixed PCM layout written into the ring buffer.
    pub output: OutputFormat,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            packet_queue_capacity: 100,
            frame_queue_capacity: 100,
            ring_buffer_bytes: 1024 * 1024,
            poll_timeout: Duration::from_millis(100),
            transient_retry_delay: Duration::from_millis(10),
            ring_write_timeout: Duration::from_millis(100),
            demux_join_timeout: Duration::from_millis(500),
            video_join_timeout: Duration::from_millis(500),
            audio_join_timeout: Duration::from_secs(3),
            seek_grace: Duration::from_millis(20),
            seek_settle: Duration::from_millis(100),
            base_frame_delay: Duration::from_millis(42),
            output: OutputFormat::default(),
            resample_chunk_frames: 1024,
        }
    }
}

impl PipelineConfig {
    pub fn demux_timing(&self) -> WorkerTiming {
        WorkerTiming {
            poll: self.transient_retry_delay,
            join_timeout: self.demux_join_timeout,
        }
    }

    pub fn video_timing(&self) -> WorkerTiming {
        WorkerTiming {
            poll: self.poll_timeout,
            join_timeout: self.video_join_timeout,
        }
    }

    pub fn audio_timing(&self) -> WorkerTiming {
        WorkerTiming {
            poll: self.poll_timeout,
            join_timeout: self.audio_join_timeout,
        }
    }
}
