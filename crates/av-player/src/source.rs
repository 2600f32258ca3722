//! Source capability consumed by the demultiplexer and by seek.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use crate::error::SourceError;
use crate::media::{CompressedUnit, MediaKind, StreamParameters};

/// Outcome of one [`MediaSource::read_next`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    Unit(CompressedUnit),
    /// No data available yet; retry later.
    Pending,
    /// The source is exhausted at its current position.
    EndOfStream,
}

/// A demultiplexing media source.
///
/// Implementations are not required to be reentrant; the pipeline serializes
/// every call through [`SharedSource`].
pub trait MediaSource: Send {
    /// Open `uri` and describe its elementary streams.
    fn open(&mut self, uri: &str) -> Result<Vec<StreamParameters>, SourceError>;

    fn read_next(&mut self) -> Result<ReadOutcome, SourceError>;

    /// Reposition to the key unit at or before `position`.
    fn seek(&mut self, position: Duration) -> Result<(), SourceError>;

    /// Drop any data the source buffered internally before the last seek.
    fn discard_buffered(&mut self) {}

    /// Container duration, when known.
    fn duration(&self) -> Option<Duration>;

    fn close(&mut self);
}

/// The source handle shared by the demux loop and the controller's seek.
///
/// This is the only lock two pipeline components contend on. Its guard is never
/// held across a queue operation.
#[derive(Clone)]
pub struct SharedSource {
    inner: Arc<Mutex<Box<dyn MediaSource>>>,
}

impl SharedSource {
    pub fn new(source: Box<dyn MediaSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn MediaSource>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the source; the lock is released on return.
    pub fn with_source<R>(&self, f: impl FnOnce(&mut dyn MediaSource) -> R) -> R {
        let mut guard = self.lock();
        f(&mut **guard)
    }

    /// Like [`with_source`](Self::with_source) but gives up if the lock is held.
    pub fn try_with_source<R>(&self, f: impl FnOnce(&mut dyn MediaSource) -> R) -> Option<R> {
        let mut guard = match self.inner.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(f(&mut **guard))
    }
}

/// Streams chosen for one session.
#[derive(Clone, Debug, Default)]
pub struct SelectedStreams {
    pub video: Option<StreamParameters>,
    pub audio: Option<StreamParameters>,
}

impl SelectedStreams {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// Stream whose timestamps drive the playback clock: video when present.
    pub fn clock_stream(&self) -> Option<&StreamParameters> {
        self.video.as_ref().or(self.audio.as_ref())
    }
}

/// Pick the best video and audio stream: the one flagged default, else the first.
pub fn select_streams(streams: &[StreamParameters]) -> SelectedStreams {
    let best = |kind: MediaKind| {
        streams
            .iter()
            .filter(|s| s.kind == kind)
            .find(|s| s.default)
            .or_else(|| streams.iter().find(|s| s.kind == kind))
            .cloned()
    };
    SelectedStreams {
        video: best(MediaKind::Video),
        audio: best(MediaKind::Audio),
    }
}
