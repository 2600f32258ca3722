//! Pull-side handles for presentation sinks.
//!
//! A renderer thread calls [`VideoOutput::next_frame`] and sleeps
//! [`VideoOutput::frame_delay`] between frames; an audio device callback calls
//! [`AudioOutput::fill`], which never blocks.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use av_player_types::PlaybackState;

use crate::media::{DecodedFrame, OutputFormat};
use crate::queue::BoundedQueue;
use crate::ring_buffer::AudioRingBuffer;
use crate::speed;
use crate::state::SharedPlayback;

/// Result of one [`VideoOutput::next_frame`] call.
#[derive(Debug)]
pub enum FramePoll {
    /// A frame ready to present now.
    Frame(DecodedFrame),
    /// Nothing to present (paused, seeking, or no frame in time).
    Idle,
    /// The session ended; stop polling.
    Ended,
}

/// Presentation handle over a session's decoded frame queue.
pub struct VideoOutput {
    frames: Arc<BoundedQueue<DecodedFrame>>,
    shared: Arc<SharedPlayback>,
    base_delay: Duration,
    drives_clock: bool,
    seen_epoch: u64,
    awaiting_key: bool,
    /// Frame popped while a seek began; re-examined on the next call.
    held: Option<DecodedFrame>,
}

impl VideoOutput {
    pub(crate) fn new(
        frames: Arc<BoundedQueue<DecodedFrame>>,
        shared: Arc<SharedPlayback>,
        base_delay: Duration,
        drives_clock: bool,
    ) -> Self {
        let seen_epoch = shared.epoch();
        Self {
            frames,
            shared,
            base_delay,
            drives_clock,
            seen_epoch,
            awaiting_key: false,
            held: None,
        }
    }

    /// Wait at most `timeout` for the next presentable frame.
    ///
    /// Frames from before the latest seek, frames without a usable PTS and,
    /// after each seek, every frame before the next key frame are discarded.
    pub fn next_frame(&mut self, timeout: Duration) -> FramePoll {
        if self.shared.base_state() == PlaybackState::Stopped {
            return FramePoll::Ended;
        }
        if !self.shared.should_present() {
            thread::sleep(timeout);
            return FramePoll::Idle;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let frame = match self.held.take() {
                Some(frame) => frame,
                None => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let Some(frame) = self.frames.pop(remaining) else {
                        if self.frames.is_closed() {
                            return FramePoll::Ended;
                        }
                        return FramePoll::Idle;
                    };
                    frame
                }
            };

            if self.shared.is_seeking() {
                self.held = Some(frame);
                return FramePoll::Idle;
            }
            if frame.epoch < self.shared.epoch() {
                tracing::trace!(epoch = frame.epoch, "discarding pre-seek frame");
                continue;
            }
            let pts = match frame.pts {
                Some(pts) if pts >= 0 => pts,
                _ => {
                    tracing::trace!("discarding frame without pts");
                    continue;
                }
            };
            if frame.epoch > self.seen_epoch {
                self.seen_epoch = frame.epoch;
                self.awaiting_key = true;
            }
            if self.awaiting_key {
                if !frame.key {
                    tracing::trace!(pts, "waiting for key frame after seek");
                    continue;
                }
                self.awaiting_key = false;
            }

            if self.drives_clock {
                self.shared.clock().publish(pts);
            }
            return FramePoll::Frame(frame);
        }
    }

    /// Interval between frames at the current speed.
    pub fn frame_delay(&self) -> Duration {
        let speed = self.shared.speed().get();
        if speed == 1.0 || speed <= 0.0 {
            return self.base_delay;
        }
        Duration::from_secs_f64(self.base_delay.as_secs_f64() / speed as f64)
    }
}

/// Real-time handle over a session's PCM ring buffer.
pub struct AudioOutput {
    ring: Arc<AudioRingBuffer>,
    shared: Arc<SharedPlayback>,
    format: OutputFormat,
    drives_clock: bool,
    tick_remainder: f64,
}

impl AudioOutput {
    pub(crate) fn new(
        ring: Arc<AudioRingBuffer>,
        shared: Arc<SharedPlayback>,
        format: OutputFormat,
        drives_clock: bool,
    ) -> Self {
        Self {
            ring,
            shared,
            format,
            drives_clock,
            tick_remainder: 0.0,
        }
    }

    /// Layout of the bytes produced by [`fill`](Self::fill).
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Fill `buf` completely: buffered PCM first, silence for the rest.
    ///
    /// Outputs only silence while paused, seeking or stopped. Returns the number
    /// of PCM bytes taken from the ring buffer.
    pub fn fill(&mut self, buf: &mut [u8]) -> usize {
        if !self.shared.should_present() {
            buf.fill(0);
            return 0;
        }
        let n = self.ring.try_read(buf);
        buf[n..].fill(0);
        if self.drives_clock && n > 0 {
            self.advance_clock(n);
        }
        n
    }

    /// Best-effort non-blocking read, bypassing the pause/seek gate.
    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        self.ring.try_read(buf)
    }

    fn advance_clock(&mut self, bytes: usize) {
        let bpf = self.format.bytes_per_frame();
        if bpf == 0 || self.format.sample_rate == 0 {
            return;
        }
        let frames = (bytes / bpf) as f64;
        // The ring holds transformed PCM; scale by what the transform consumed.
        let ratio = speed::effective_ratio(self.shared.speed().get());
        let media_secs = frames * ratio / self.format.sample_rate as f64;

        let clock = self.shared.clock();
        let tb = clock.time_base();
        if !tb.is_valid() {
            return;
        }
        let exact = media_secs * tb.den as f64 / tb.num as f64 + self.tick_remainder;
        let ticks = exact.floor();
        self.tick_remainder = exact - ticks;
        clock.advance(ticks as i64);
    }
}
