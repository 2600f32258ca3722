//! Session lifecycle and transport control.
//!
//! ```text
//!            start            pause(true)
//! Stopped ─────────► Starting ───► Playing ◄──────────► Paused
//!    ▲                                 │   pause(false)    │
//!    └──────────── stop ───────────────┴───────────────────┘
//! ```
//!
//! `Seeking` overlays `Playing`/`Paused` for the duration of [`PlaybackController::seek`]
//! and always returns to the state it was entered from.
//!
//! Every control call goes through one session mutex, so `start`, `stop` and
//! `seek` never interleave. Pause and speed are lock-free flag updates.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use av_player_types::{PlaybackState, PlayerStatus, QueueLevels, StopOutcome};

use crate::audio::AudioDecodeWorker;
use crate::codec::{AudioDecoder, VideoDecoder};
use crate::config::PipelineConfig;
use crate::demux::{Demuxer, StreamRoute};
use crate::error::{PlayerError, Result};
use crate::media::{CompressedUnit, DecodedFrame, StreamParameters};
use crate::output::{AudioOutput, VideoOutput};
use crate::queue::BoundedQueue;
use crate::ring_buffer::AudioRingBuffer;
use crate::source::{MediaSource, SelectedStreams, SharedSource};
use crate::speed::validate_speed;
use crate::state::SharedPlayback;
use crate::status::{self, SessionSummary};
use crate::video::VideoDecodeWorker;

/// Factory for the per-session source and decoders.
///
/// A decoder factory returns `None` when it cannot handle the stream's codec;
/// playback then continues with the other stream if there is one.
pub trait MediaBackend: Send + Sync {
    fn create_source(&self) -> Box<dyn MediaSource>;

    fn create_video_decoder(&self, params: &StreamParameters) -> Option<Box<VideoDecoder>>;

    fn create_audio_decoder(&self, params: &StreamParameters) -> Option<Box<AudioDecoder>>;
}

/// Identifier of one playback session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What a completed seek did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeekReport {
    /// Position the source was repositioned to, in seconds.
    pub target_secs: f64,
    /// Seek epoch data must carry to be presented after this seek.
    pub epoch: u64,
    /// Buffered data thrown away by the flush.
    pub discarded: QueueLevels,
    /// Occupancy right after the flush, before the decoder flush markers were
    /// queued.
    pub after_flush: QueueLevels,
}

/// How each worker ended during [`PlaybackController::stop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopReport {
    pub demux: StopOutcome,
    pub video: StopOutcome,
    pub audio: StopOutcome,
}

impl Default for StopReport {
    fn default() -> Self {
        Self {
            demux: StopOutcome::NotRunning,
            video: StopOutcome::NotRunning,
            audio: StopOutcome::NotRunning,
        }
    }
}

impl StopReport {
    /// `true` if any worker had to be left running.
    pub fn any_detached(&self) -> bool {
        [self.demux, self.video, self.audio].contains(&StopOutcome::Detached)
    }
}

/// Components of one running session.
struct Session {
    id: SessionId,
    uri: String,
    source: SharedSource,
    /// Streams with a running decoder.
    active: SelectedStreams,
    demuxer: Demuxer,
    video: Option<VideoDecodeWorker>,
    audio: Option<AudioDecodeWorker>,
    video_packets: Arc<BoundedQueue<CompressedUnit>>,
    audio_packets: Arc<BoundedQueue<CompressedUnit>>,
    frames: Arc<BoundedQueue<DecodedFrame>>,
    ring: Arc<AudioRingBuffer>,
}

impl Session {
    fn levels(&self) -> QueueLevels {
        QueueLevels {
            video_packets: self.video_packets.len(),
            audio_packets: self.audio_packets.len(),
            frames: self.frames.len(),
            ring_bytes: self.ring.available_data(),
        }
    }

    /// Drop everything buffered between the source and the presentation sinks.
    fn flush_buffers(&self) -> QueueLevels {
        let ring_bytes = self.ring.available_data();
        self.ring.flush();
        QueueLevels {
            video_packets: self.video_packets.flush(),
            audio_packets: self.audio_packets.flush(),
            frames: self.frames.flush(),
            ring_bytes,
        }
    }

    /// Queue a flush marker for every running decoder.
    fn flush_decoders(&self) {
        if self.video.as_ref().is_some_and(|v| !v.flush()) {
            tracing::warn!(session = %self.id, "video flush marker not queued");
        }
        if self.audio.as_ref().is_some_and(|a| !a.flush()) {
            tracing::warn!(session = %self.id, "audio flush marker not queued");
        }
    }

    fn summary(&self) -> SessionSummary<'_> {
        SessionSummary {
            id: self.id.0,
            uri: &self.uri,
            has_video: self.video.is_some(),
            has_audio: self.audio.is_some(),
            levels: self.levels(),
            ring_capacity: self.ring.capacity(),
        }
    }

    /// Stop flags, then unblock every buffer, then bounded joins, then close
    /// the source.
    fn shutdown(mut self) -> StopReport {
        self.demuxer.signal();
        if let Some(v) = &self.video {
            v.signal();
        }
        if let Some(a) = &self.audio {
            a.signal();
        }

        self.video_packets.close();
        self.audio_packets.close();
        self.frames.close();
        self.ring.stop();

        let report = StopReport {
            demux: self.demuxer.stop(),
            video: self.video.as_mut().map_or(StopOutcome::NotRunning, |v| v.stop()),
            audio: self.audio.as_mut().map_or(StopOutcome::NotRunning, |a| a.stop()),
        };

        // A detached demuxer may still be inside a source call.
        if self.source.try_with_source(|s| s.close()).is_none() {
            tracing::warn!(session = %self.id, "source busy; leaving it to the detached reader");
        }
        report
    }
}

/// Owner of at most one playback session at a time.
pub struct PlaybackController {
    backend: Arc<dyn MediaBackend>,
    config: PipelineConfig,
    session: Mutex<Option<Session>>,
    shared: Arc<SharedPlayback>,
    next_id: AtomicU64,
}

impl PlaybackController {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            session: Mutex::new(None),
            shared: Arc::new(SharedPlayback::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn speed(&self) -> f32 {
        self.shared.speed().get()
    }

    /// Open `uri` and start every pipeline stage.
    pub fn start(&self, uri: &str) -> Result<SessionId> {
        let mut guard = self.lock();
        let state = self.shared.base_state();
        if state != PlaybackState::Stopped {
            return Err(PlayerError::InvalidState(self.shared.state()));
        }
        if let Some(stale) = guard.take() {
            stale.shutdown();
        }

        self.shared.set_state(PlaybackState::Starting);
        self.shared.set_seeking(false);
        self.shared.speed().set(1.0);
        self.shared.clock().reset();

        match self.build_session(uri) {
            Ok(session) => {
                let id = session.id;
                tracing::info!(
                    session = %id,
                    uri,
                    video = session.video.is_some(),
                    audio = session.audio.is_some(),
                    duration_secs = ?self.shared.clock().duration_secs(),
                    "playback started"
                );
                *guard = Some(session);
                self.shared.set_state(PlaybackState::Playing);
                Ok(id)
            }
            Err(e) => {
                tracing::error!(uri, "start failed: {e}");
                self.shared.clock().reset();
                self.shared.set_state(PlaybackState::Stopped);
                Err(e)
            }
        }
    }

    fn build_session(&self, uri: &str) -> Result<Session> {
        let cfg = &self.config;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let source = SharedSource::new(self.backend.create_source());
        let mut demuxer = Demuxer::open(source.clone(), uri)?;
        let selected = demuxer.streams().clone();

        let video_packets = Arc::new(BoundedQueue::new(cfg.packet_queue_capacity));
        let audio_packets = Arc::new(BoundedQueue::new(cfg.packet_queue_capacity));
        let frames = Arc::new(BoundedQueue::new(cfg.frame_queue_capacity));
        let ring = Arc::new(AudioRingBuffer::new(cfg.ring_buffer_bytes));

        let mut video = selected.video.as_ref().and_then(|params| {
            let Some(decoder) = self.backend.create_video_decoder(params) else {
                tracing::warn!(
                    stream = %params.index,
                    codec = %params.codec,
                    "no video decoder; video disabled"
                );
                return None;
            };
            let mut worker = VideoDecodeWorker::new(
                decoder,
                video_packets.clone(),
                frames.clone(),
                self.shared.clone(),
                cfg.video_timing(),
            );
            match worker.start(Some(params)) {
                Ok(()) => Some(worker),
                Err(e) => {
                    tracing::warn!(stream = %params.index, "video decoder unavailable: {e}");
                    None
                }
            }
        });

        let mut audio = selected.audio.as_ref().and_then(|params| {
            let Some(decoder) = self.backend.create_audio_decoder(params) else {
                tracing::warn!(
                    stream = %params.index,
                    codec = %params.codec,
                    "no audio decoder; audio disabled"
                );
                return None;
            };
            let mut worker = AudioDecodeWorker::new(
                decoder,
                audio_packets.clone(),
                ring.clone(),
                self.shared.clone(),
                cfg,
            );
            match worker.start(Some(params)) {
                Ok(()) => Some(worker),
                Err(e) => {
                    tracing::warn!(stream = %params.index, "audio decoder unavailable: {e}");
                    None
                }
            }
        });

        let active = SelectedStreams {
            video: selected.video.clone().filter(|_| video.is_some()),
            audio: selected.audio.clone().filter(|_| audio.is_some()),
        };
        let Some(clock_stream) = active.clock_stream() else {
            source.with_source(|s| s.close());
            return Err(PlayerError::NoUsableStream);
        };

        let duration = demuxer
            .duration()
            .map(|d| d.as_secs_f64())
            .or_else(|| clock_stream.duration_secs());
        self.shared.clock().configure(clock_stream.time_base, duration);

        let mut routes = Vec::new();
        if let Some(v) = &active.video {
            routes.push(StreamRoute {
                stream: v.index,
                queue: video_packets.clone(),
            });
        }
        if let Some(a) = &active.audio {
            routes.push(StreamRoute {
                stream: a.index,
                queue: audio_packets.clone(),
            });
        }

        if let Err(e) = demuxer.start(routes, self.shared.clone(), cfg.demux_timing()) {
            video_packets.close();
            audio_packets.close();
            if let Some(v) = video.as_mut() {
                v.stop();
            }
            if let Some(a) = audio.as_mut() {
                a.stop();
            }
            source.with_source(|s| s.close());
            return Err(e);
        }

        Ok(Session {
            id,
            uri: uri.to_string(),
            source,
            active,
            demuxer,
            video,
            audio,
            video_packets,
            audio_packets,
            frames,
            ring,
        })
    }

    /// Pause or resume presentation. Decoding continues until buffers fill.
    pub fn pause(&self, paused: bool) -> Result<()> {
        let (from, to) = if paused {
            (PlaybackState::Playing, PlaybackState::Paused)
        } else {
            (PlaybackState::Paused, PlaybackState::Playing)
        };
        if self.shared.transition(from, to) || self.shared.base_state() == to {
            tracing::debug!(paused, "pause state changed");
            return Ok(());
        }
        Err(PlayerError::InvalidState(self.shared.state()))
    }

    /// Reposition to `fraction` of the duration and flush the whole pipeline.
    pub fn seek(&self, fraction: f64) -> Result<SeekReport> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(PlayerError::InvalidPosition(fraction));
        }
        let guard = self.lock();
        let Some(session) = guard.as_ref() else {
            return Err(PlayerError::InvalidState(self.shared.state()));
        };
        let duration = self.shared.clock().duration_secs().ok_or(PlayerError::DurationUnknown)?;
        let target_secs = (fraction * duration).clamp(0.0, duration);
        tracing::info!(session = %session.id, target_secs, "seek requested");

        self.shared.clock().hold();
        self.shared.set_seeking(true);
        thread::sleep(self.config.seek_grace);

        // Flush and queue the decoder flush markers before the demuxer can read
        // a post-seek unit, so no new unit ever reaches a decoder unflushed.
        let flushed = session.source.with_source(|s| {
            s.seek(Duration::from_secs_f64(target_secs))?;
            s.discard_buffered();
            let epoch = self.shared.advance_epoch();
            let discarded = session.flush_buffers();
            let after_flush = session.levels();
            session.flush_decoders();
            Ok::<_, crate::error::SourceError>((epoch, discarded, after_flush))
        });
        let (epoch, discarded, after_flush) = match flushed {
            Ok(flushed) => flushed,
            Err(e) => {
                self.shared.set_seeking(false);
                tracing::warn!(session = %session.id, "seek failed: {e}");
                return Err(e.into());
            }
        };

        thread::sleep(self.config.seek_settle);

        let clock = self.shared.clock();
        clock.set_position(clock.time_base().seconds_to_pts(target_secs));
        self.shared.set_seeking(false);
        tracing::debug!(session = %session.id, epoch, ?discarded, "seek complete");

        Ok(SeekReport {
            target_secs,
            epoch,
            discarded,
            after_flush,
        })
    }

    /// Set the playback speed; returns the value actually applied.
    pub fn set_speed(&self, value: f32) -> Result<f32> {
        let speed = validate_speed(value)?;
        self.shared.speed().set(speed);
        tracing::debug!(speed, "speed changed");
        Ok(speed)
    }

    /// Tear down the current session. A no-op from `Stopped`.
    pub fn stop(&self) -> StopReport {
        let mut guard = self.lock();
        let Some(session) = guard.take() else {
            return StopReport::default();
        };
        let id = session.id;
        self.shared.set_state(PlaybackState::Stopped);

        let report = session.shutdown();

        self.shared.set_seeking(false);
        self.shared.clock().reset();
        if report.any_detached() {
            tracing::warn!(session = %id, ?report, "playback stopped with detached workers");
        } else {
            tracing::info!(session = %id, "playback stopped");
        }
        report
    }

    pub fn position_secs(&self) -> f64 {
        if self.shared.base_state() == PlaybackState::Stopped {
            return 0.0;
        }
        self.shared.clock().position_secs(self.shared.is_seeking())
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.shared.clock().duration_secs()
    }

    /// Presentation handle for the current session's video, if it has any.
    pub fn video_output(&self) -> Option<VideoOutput> {
        let guard = self.lock();
        let session = guard.as_ref()?;
        session.active.video.as_ref()?;
        Some(VideoOutput::new(
            session.frames.clone(),
            self.shared.clone(),
            self.config.base_frame_delay,
            true,
        ))
    }

    /// Real-time handle for the current session's audio, if it has any.
    pub fn audio_output(&self) -> Option<AudioOutput> {
        let guard = self.lock();
        let session = guard.as_ref()?;
        session.active.audio.as_ref()?;
        Some(AudioOutput::new(
            session.ring.clone(),
            self.shared.clone(),
            self.config.output,
            session.active.video.is_none(),
        ))
    }

    pub fn status(&self) -> PlayerStatus {
        let guard = self.lock();
        status::snapshot(
            &self.shared,
            self.position_secs(),
            guard.as_ref().map(Session::summary),
        )
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}
