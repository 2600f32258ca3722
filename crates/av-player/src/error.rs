//! Error types for the playback pipeline.
//!
//! Only session-fatal conditions and rejected control requests are errors.
//! Back-pressure, timeouts and transient emptiness are reported as return
//! values by the queues, the ring buffer and the presentation handles.

use thiserror::Error;

use av_player_types::PlaybackState;

/// Failure reported by a [`crate::source::MediaSource`].
#[derive(Error, Debug)]
pub enum SourceError {
    /// The URI could not be opened or its container could not be parsed.
    #[error("open {uri}: {reason}")]
    Open { uri: String, reason: String },

    /// Reading the next compressed unit failed.
    #[error("read: {0}")]
    Read(String),

    /// Repositioning failed.
    #[error("seek: {0}")]
    Seek(String),

    /// The source was used before `open` succeeded.
    #[error("source not open")]
    NotOpen,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reported by a [`crate::codec::Decoder`].
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Parameters missing, mismatched, or rejected by the codec.
    #[error("unsupported stream: {0}")]
    Unsupported(String),

    /// A unit could not be decoded; it is skipped.
    #[error("malformed unit: {0}")]
    Malformed(String),

    /// The decoder is in a state where it cannot make progress.
    #[error("codec failure: {0}")]
    Codec(String),
}

/// Errors surfaced by the control surface.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("operation not allowed while {0:?}")]
    InvalidState(PlaybackState),

    #[error("speed {0} outside (0, 4]")]
    InvalidSpeed(f32),

    #[error("seek position {0} outside [0, 1]")]
    InvalidPosition(f64),

    #[error("no usable audio or video stream")]
    NoUsableStream,

    #[error("source duration unknown")]
    DurationUnknown,

    #[error("worker already running")]
    AlreadyRunning,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Decoder(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
