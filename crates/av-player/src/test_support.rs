//! Scripted source, fake decoders and a fake backend for pipeline tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::codec::{AudioDecoder, Decoder, Received, SubmitStatus, VideoDecoder};
use crate::controller::MediaBackend;
use crate::error::{DecodeError, SourceError};
use crate::media::{
    AudioBlock, AudioParams, CompressedUnit, DecodedFrame, MediaKind, StreamIndex, StreamParameters,
    TimeBase, VideoParams,
};
use crate::source::{MediaSource, ReadOutcome};

/// Milliseconds between two units of the same stream.
pub const UNIT_MS: i64 = 40;
/// Every n-th video unit is a key unit.
pub const KEY_INTERVAL: i64 = 5;

pub fn video_stream(idx: u32) -> StreamParameters {
    let mut s = StreamParameters::new(StreamIndex(idx), MediaKind::Video, "fake-video");
    s.time_base = TimeBase::new(1, 1000);
    s.video = Some(VideoParams {
        width: 4,
        height: 2,
    });
    s
}

pub fn audio_stream(idx: u32) -> StreamParameters {
    let mut s = StreamParameters::new(StreamIndex(idx), MediaKind::Audio, "fake-audio");
    s.time_base = TimeBase::new(1, 1000);
    s.audio = Some(AudioParams {
        sample_rate: 44_100,
        channels: 2,
    });
    s
}

pub fn video_unit(idx: u32, pts: i64, key: bool) -> CompressedUnit {
    CompressedUnit::new(StreamIndex(idx), Some(pts), key, pts.to_le_bytes().to_vec())
}

pub fn audio_unit(idx: u32, pts: i64) -> CompressedUnit {
    CompressedUnit::new(StreamIndex(idx), Some(pts), true, pts.to_le_bytes().to_vec())
}

/// What tests can observe about every source a backend created.
#[derive(Default)]
pub struct SourceEvents {
    pub seeks: Mutex<Vec<Duration>>,
    pub closed: AtomicUsize,
    pub discards: AtomicUsize,
    pub failed_reads: AtomicUsize,
}

/// A source producing an endless interleaved sequence of units up to its duration.
pub struct ScriptedSource {
    streams: Vec<StreamParameters>,
    duration: Option<Duration>,
    fail_open: bool,
    fail_seek: bool,
    /// Reads that fail before units start flowing.
    fail_reads: usize,
    open: bool,
    /// Next unit number per stream, in stream order.
    cursors: Vec<i64>,
    turn: usize,
    events: Arc<SourceEvents>,
}

impl ScriptedSource {
    pub fn new(streams: Vec<StreamParameters>) -> Self {
        let cursors = vec![0; streams.len()];
        Self {
            streams,
            duration: Some(Duration::from_secs(10)),
            fail_open: false,
            fail_seek: false,
            fail_reads: 0,
            open: false,
            cursors,
            turn: 0,
            events: Arc::new(SourceEvents::default()),
        }
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(vec![])
        }
    }

    /// A source whose first `reads` reads fail.
    pub fn failing_reads(streams: Vec<StreamParameters>, reads: usize) -> Self {
        Self {
            fail_reads: reads,
            ..Self::new(streams)
        }
    }

    pub fn events(&self) -> Arc<SourceEvents> {
        self.events.clone()
    }

    fn end_units(&self) -> i64 {
        self.duration
            .map(|d| d.as_millis() as i64 / UNIT_MS)
            .unwrap_or(i64::MAX)
    }
}

impl MediaSource for ScriptedSource {
    fn open(&mut self, uri: &str) -> Result<Vec<StreamParameters>, SourceError> {
        if self.fail_open {
            return Err(SourceError::Open {
                uri: uri.to_string(),
                reason: "scripted failure".into(),
            });
        }
        self.open = true;
        Ok(self.streams.clone())
    }

    fn read_next(&mut self) -> Result<ReadOutcome, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            self.events.failed_reads.fetch_add(1, Ordering::SeqCst);
            return Err(SourceError::Read("scripted failure".into()));
        }
        if self.streams.is_empty() {
            return Ok(ReadOutcome::EndOfStream);
        }
        let end = self.end_units();
        for _ in 0..self.streams.len() {
            let slot = self.turn % self.streams.len();
            self.turn += 1;
            let n = self.cursors[slot];
            if n >= end {
                continue;
            }
            self.cursors[slot] += 1;
            let stream = &self.streams[slot];
            let pts = n * UNIT_MS;
            let unit = match stream.kind {
                MediaKind::Video => video_unit(stream.index.0, pts, n % KEY_INTERVAL == 0),
                MediaKind::Audio => audio_unit(stream.index.0, pts),
            };
            return Ok(ReadOutcome::Unit(unit));
        }
        Ok(ReadOutcome::EndOfStream)
    }

    fn seek(&mut self, position: Duration) -> Result<(), SourceError> {
        if self.fail_seek {
            return Err(SourceError::Seek("scripted failure".into()));
        }
        self.events
            .seeks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(position);
        let unit = position.as_millis() as i64 / UNIT_MS;
        let key_unit = unit - unit % KEY_INTERVAL;
        for c in &mut self.cursors {
            *c = key_unit;
        }
        Ok(())
    }

    fn discard_buffered(&mut self) {
        self.events.discards.fetch_add(1, Ordering::SeqCst);
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn close(&mut self) {
        self.open = false;
        self.events.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a fake video decoder was asked to do, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeEvent {
    Unit { pts: Option<i64>, key: bool },
    Flush,
}

pub type DecodeLog = Arc<Mutex<Vec<DecodeEvent>>>;

/// One frame per submitted unit (or `frames_per_unit`), copying unit metadata.
#[derive(Default)]
pub struct FakeVideoDecoder {
    pending: Vec<DecodedFrame>,
    frames_per_unit: usize,
    flushes: Arc<AtomicUsize>,
    log: DecodeLog,
}

impl FakeVideoDecoder {
    pub fn with_frames_per_unit(n: usize) -> Self {
        Self {
            frames_per_unit: n,
            ..Self::default()
        }
    }

    pub fn logging_to(log: DecodeLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn flush_counter(&self) -> Arc<AtomicUsize> {
        self.flushes.clone()
    }

    fn record(&self, event: DecodeEvent) {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

impl Decoder for FakeVideoDecoder {
    type Frame = DecodedFrame;

    fn open(&mut self, params: &StreamParameters) -> Result<(), DecodeError> {
        if params.kind != MediaKind::Video {
            return Err(DecodeError::Unsupported("not video".into()));
        }
        Ok(())
    }

    fn submit(&mut self, unit: &CompressedUnit) -> Result<SubmitStatus, DecodeError> {
        self.record(DecodeEvent::Unit {
            pts: unit.pts,
            key: unit.key,
        });
        for i in 0..self.frames_per_unit.max(1) {
            self.pending.push(DecodedFrame {
                planes: vec![unit.payload.clone()],
                width: 4,
                height: 2,
                pts: unit.pts.map(|p| p + i as i64),
                key: unit.key && i == 0,
                epoch: 0,
            });
        }
        Ok(SubmitStatus::Accepted)
    }

    fn receive(&mut self) -> Result<Received<DecodedFrame>, DecodeError> {
        if self.pending.is_empty() {
            return Ok(Received::None);
        }
        Ok(Received::Frame(self.pending.remove(0)))
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.record(DecodeEvent::Flush);
    }
}

/// 441 stereo frames (10 ms at 44.1 kHz) of a constant level per unit.
#[derive(Default)]
pub struct FakeAudioDecoder {
    pending: Option<AudioBlock>,
}

impl Decoder for FakeAudioDecoder {
    type Frame = AudioBlock;

    fn open(&mut self, params: &StreamParameters) -> Result<(), DecodeError> {
        if params.kind != MediaKind::Audio {
            return Err(DecodeError::Unsupported("not audio".into()));
        }
        Ok(())
    }

    fn submit(&mut self, unit: &CompressedUnit) -> Result<SubmitStatus, DecodeError> {
        self.pending = Some(AudioBlock {
            samples: vec![0.25; 441 * 2],
            channels: 2,
            sample_rate: 44_100,
            pts: unit.pts,
        });
        Ok(SubmitStatus::Accepted)
    }

    fn receive(&mut self) -> Result<Received<AudioBlock>, DecodeError> {
        Ok(self.pending.take().map_or(Received::None, Received::Frame))
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

/// Rejects every stream at `open`.
pub struct UnsupportedDecoder;

impl Decoder for UnsupportedDecoder {
    type Frame = AudioBlock;

    fn open(&mut self, _params: &StreamParameters) -> Result<(), DecodeError> {
        Err(DecodeError::Unsupported("scripted".into()))
    }

    fn submit(&mut self, _unit: &CompressedUnit) -> Result<SubmitStatus, DecodeError> {
        Err(DecodeError::Codec("not open".into()))
    }

    fn receive(&mut self) -> Result<Received<AudioBlock>, DecodeError> {
        Ok(Received::None)
    }

    fn flush(&mut self) {}
}

/// A video decoder whose `submit` ignores the stop flag until released.
pub struct BlockingDecoder {
    release: mpsc::Receiver<()>,
}

impl BlockingDecoder {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (Self { release: rx }, tx)
    }
}

impl Decoder for BlockingDecoder {
    type Frame = DecodedFrame;

    fn open(&mut self, _params: &StreamParameters) -> Result<(), DecodeError> {
        Ok(())
    }

    fn submit(&mut self, _unit: &CompressedUnit) -> Result<SubmitStatus, DecodeError> {
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        Ok(SubmitStatus::NeedMoreInput)
    }

    fn receive(&mut self) -> Result<Received<DecodedFrame>, DecodeError> {
        Ok(Received::None)
    }

    fn flush(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoChoice {
    Fake,
    Missing,
    Blocking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioChoice {
    Fake,
    Missing,
    Unsupported,
}

/// Backend producing [`ScriptedSource`]s and fake decoders.
pub struct FakeBackend {
    pub streams: Vec<StreamParameters>,
    pub duration: Option<Duration>,
    pub fail_open: bool,
    pub fail_seek: AtomicBool,
    pub video: VideoChoice,
    pub audio: AudioChoice,
    pub events: Arc<SourceEvents>,
    /// Shared by every fake video decoder handed out.
    pub video_log: DecodeLog,
    /// Release handles of blocking decoders handed out so far.
    pub releases: Mutex<Vec<mpsc::Sender<()>>>,
}

impl FakeBackend {
    pub fn new(streams: Vec<StreamParameters>) -> Self {
        Self {
            streams,
            duration: Some(Duration::from_secs(10)),
            fail_open: false,
            fail_seek: AtomicBool::new(false),
            video: VideoChoice::Fake,
            audio: AudioChoice::Fake,
            events: Arc::new(SourceEvents::default()),
            video_log: DecodeLog::default(),
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn av() -> Self {
        Self::new(vec![video_stream(0), audio_stream(1)])
    }

    pub fn release_blocked(&self) {
        let releases = self
            .releases
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for tx in releases.iter() {
            let _ = tx.send(());
        }
    }
}

impl MediaBackend for FakeBackend {
    fn create_source(&self) -> Box<dyn MediaSource> {
        let mut source = ScriptedSource::new(self.streams.clone());
        source.duration = self.duration;
        source.fail_open = self.fail_open;
        source.fail_seek = self.fail_seek.load(Ordering::SeqCst);
        source.events = self.events.clone();
        Box::new(source)
    }

    fn create_video_decoder(&self, _params: &StreamParameters) -> Option<Box<VideoDecoder>> {
        match self.video {
            VideoChoice::Fake => {
                let decoder = FakeVideoDecoder::logging_to(self.video_log.clone());
                Some(Box::new(decoder))
            }
            VideoChoice::Missing => None,
            VideoChoice::Blocking => {
                let (decoder, release) = BlockingDecoder::new();
                self.releases
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(release);
                Some(Box::new(decoder))
            }
        }
    }

    fn create_audio_decoder(&self, _params: &StreamParameters) -> Option<Box<AudioDecoder>> {
        match self.audio {
            AudioChoice::Fake => Some(Box::new(FakeAudioDecoder::default())),
            AudioChoice::Missing => None,
            AudioChoice::Unsupported => Some(Box::new(UnsupportedDecoder)),
        }
    }
}
