use serde::{Deserialize, Serialize};

/// Transport state of a playback session.
///
/// `Seeking` is an overlay: it is entered from `Playing` or `Paused` and always
/// returns to the state it was entered from.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No session is active.
    #[default]
    Stopped,
    /// A session is being constructed by `start`.
    Starting,
    /// Workers are running and presentation consumers render.
    Playing,
    /// Workers are running but presentation consumers output nothing.
    Paused,
    /// The source is being repositioned and every buffer flushed.
    Seeking,
}

impl PlaybackState {
    /// Stable numeric tag, used to store the state in an atomic.
    pub fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Starting => 1,
            PlaybackState::Playing => 2,
            PlaybackState::Paused => 3,
            PlaybackState::Seeking => 4,
        }
    }

    /// Inverse of [`PlaybackState::as_u8`]; unknown tags map to `Stopped`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Starting,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            4 => PlaybackState::Seeking,
            _ => PlaybackState::Stopped,
        }
    }

    /// `true` while a session owns running workers.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Seeking
        )
    }
}

/// How a worker thread ended when it was asked to stop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The thread exited and was joined within its bound.
    Joined,
    /// The thread did not exit in time and was left running detached.
    Detached,
    /// There was nothing to stop (never started, or already stopped).
    NotRunning,
}

/// Occupancy of the session's inter-thread buffers.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueLevels {
    /// Compressed video units waiting for the video decoder.
    pub video_packets: usize,
    /// Compressed audio units waiting for the audio decoder.
    pub audio_packets: usize,
    /// Decoded frames waiting for the presentation sink.
    pub frames: usize,
    /// PCM bytes buffered in the audio ring buffer.
    pub ring_bytes: usize,
}

impl QueueLevels {
    /// `true` when every buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.video_packets == 0
            && self.audio_packets == 0
            && self.frames == 0
            && self.ring_bytes == 0
    }
}

/// Point-in-time status of the player, suitable for logs and front ends.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Transport state (with the seeking overlay applied).
    pub state: PlaybackState,
    /// Identifier of the active session, if any.
    pub session_id: Option<u64>,
    /// URI the active session was started with.
    pub uri: Option<String>,
    /// Current position in seconds.
    pub position_secs: f64,
    /// Total duration in seconds, when the source reports one.
    pub duration_secs: Option<f64>,
    /// Current playback speed multiplier.
    pub speed: f32,
    /// Whether the session decodes a video stream.
    pub has_video: bool,
    /// Whether the session decodes an audio stream.
    pub has_audio: bool,
    /// Buffer occupancy.
    pub levels: QueueLevels,
    /// Audio ring buffer capacity in bytes.
    pub ring_capacity_bytes: Option<usize>,
}
