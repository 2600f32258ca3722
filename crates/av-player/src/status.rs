use av_player_types::{PlayerStatus, QueueLevels};

use crate::state::SharedPlayback;

/// The parts of a running session that show up in a status snapshot.
pub(crate) struct SessionSummary<'a> {
    pub id: u64,
    pub uri: &'a str,
    pub has_video: bool,
    pub has_audio: bool,
    pub levels: QueueLevels,
    pub ring_capacity: usize,
}

/// Build a snapshot suitable for logs and front ends.
pub(crate) fn snapshot(
    shared: &SharedPlayback,
    position_secs: f64,
    session: Option<SessionSummary<'_>>,
) -> PlayerStatus {
    let mut status = PlayerStatus {
        state: shared.state(),
        position_secs,
        duration_secs: shared.clock().duration_secs(),
        speed: shared.speed().get(),
        ..PlayerStatus::default()
    };
    if let Some(s) = session {
        status.session_id = Some(s.id);
        status.uri = Some(s.uri.to_string());
        status.has_video = s.has_video;
        status.has_audio = s.has_audio;
        status.levels = s.levels;
        status.ring_capacity_bytes = Some(s.ring_capacity);
    }
    status
}
