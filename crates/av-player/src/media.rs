//! Data carried between pipeline stages.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Kind of an elementary stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Identity of an elementary stream, assigned by the source at open time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamIndex(pub u32);

impl fmt::Display for StreamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rational unit of a stream's timestamps (`num / den` seconds per tick).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const MICROS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000,
    };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn pts_to_seconds(&self, pts: i64) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        pts as f64 * self.num as f64 / self.den as f64
    }

    pub fn seconds_to_pts(&self, seconds: f64) -> i64 {
        if !self.is_valid() || !seconds.is_finite() {
            return 0;
        }
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase::MICROS
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
}

/// Everything a decoder needs to bind to one elementary stream.
#[derive(Clone)]
pub struct StreamParameters {
    pub index: StreamIndex,
    pub kind: MediaKind,
    /// Codec label, best-effort.
    pub codec: String,
    pub time_base: TimeBase,
    /// Stream duration in `time_base` ticks, when known.
    pub duration_pts: Option<i64>,
    /// Container marks this stream as the default of its kind.
    pub default: bool,
    pub audio: Option<AudioParams>,
    pub video: Option<VideoParams>,
    /// Codec-private data owned by the source implementation.
    pub extra: Option<Arc<dyn Any + Send + Sync>>,
}

impl StreamParameters {
    pub fn new(index: StreamIndex, kind: MediaKind, codec: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec: codec.into(),
            time_base: TimeBase::default(),
            duration_pts: None,
            default: false,
            audio: None,
            video: None,
            extra: None,
        }
    }

    /// Stream duration in seconds, when known.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_pts
            .filter(|d| *d > 0)
            .map(|d| self.time_base.pts_to_seconds(d))
    }
}

impl fmt::Debug for StreamParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamParameters")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("codec", &self.codec)
            .field("time_base", &self.time_base)
            .field("duration_pts", &self.duration_pts)
            .field("default", &self.default)
            .field("audio", &self.audio)
            .field("video", &self.video)
            .field("extra", &self.extra.is_some())
            .finish()
    }
}

/// One demultiplexed chunk of exactly one elementary stream.
///
/// A zero-length payload is the flush marker: the worker that receives it
/// flushes its decoder instead of submitting it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedUnit {
    pub stream: StreamIndex,
    pub pts: Option<i64>,
    pub key: bool,
    pub payload: Vec<u8>,
    /// Seek epoch the unit was read in.
    pub epoch: u64,
}

impl CompressedUnit {
    pub fn new(stream: StreamIndex, pts: Option<i64>, key: bool, payload: Vec<u8>) -> Self {
        Self {
            stream,
            pts,
            key,
            payload,
            epoch: 0,
        }
    }

    pub fn flush_marker(stream: StreamIndex) -> Self {
        Self::new(stream, None, false, Vec::new())
    }

    pub fn is_flush(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A decoded video picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Image planes, layout defined by the decoder.
    pub planes: Vec<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub key: bool,
    /// Seek epoch of the unit this frame was decoded from.
    pub epoch: u64,
}

/// Decoded audio before conversion to the output format.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBlock {
    /// Interleaved samples.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub pts: Option<i64>,
}

impl AudioBlock {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Sample encoding of the PCM written into the ring buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Fixed PCM layout produced by the audio worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl OutputFormat {
    /// Size of one sample frame (all channels) in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            sample_format: SampleFormat::S16,
        }
    }
}
