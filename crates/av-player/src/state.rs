//! Playback state shared lock-free between the controller, workers and presenters.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, AtomicU64, Ordering};

use av_player_types::PlaybackState;

use crate::media::TimeBase;
use crate::speed::SharedSpeed;

const DURATION_UNKNOWN: u64 = u64::MAX;

/// Flags and counters of the current session.
///
/// Only the controller writes the state, the seeking overlay and the epoch;
/// everything else reads them.
#[derive(Debug)]
pub struct SharedPlayback {
    state: AtomicU8,
    seeking: AtomicBool,
    epoch: AtomicU64,
    speed: SharedSpeed,
    clock: PlaybackClock,
}

impl Default for SharedPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedPlayback {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped.as_u8()),
            seeking: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            speed: SharedSpeed::default(),
            clock: PlaybackClock::default(),
        }
    }

    /// State as seen by observers, with the seeking overlay applied.
    pub fn state(&self) -> PlaybackState {
        let base = self.base_state();
        if base.is_active() && self.is_seeking() {
            PlaybackState::Seeking
        } else {
            base
        }
    }

    /// State underneath the seeking overlay.
    pub fn base_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Atomically move from `from` to `to`; `false` if the state was not `from`.
    pub(crate) fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_paused(&self) -> bool {
        self.base_state() == PlaybackState::Paused
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking.load(Ordering::Acquire)
    }

    pub(crate) fn set_seeking(&self, seeking: bool) {
        self.seeking.store(seeking, Ordering::Release);
    }

    /// Whether presentation consumers should output anything right now.
    pub fn should_present(&self) -> bool {
        self.base_state() == PlaybackState::Playing && !self.is_seeking()
    }

    /// Number of seeks completed or in flight in this session.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn speed(&self) -> &SharedSpeed {
        &self.speed
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }
}

/// `currentPts` / `lastValidPts` in the clock stream's time base.
#[derive(Debug)]
pub struct PlaybackClock {
    current_pts: AtomicI64,
    last_valid_pts: AtomicI64,
    /// Position reported while a seek is in flight.
    held_pts: AtomicI64,
    tb_num: AtomicU32,
    tb_den: AtomicU32,
    duration_bits: AtomicU64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            current_pts: AtomicI64::new(0),
            last_valid_pts: AtomicI64::new(0),
            held_pts: AtomicI64::new(0),
            tb_num: AtomicU32::new(TimeBase::MICROS.num),
            tb_den: AtomicU32::new(TimeBase::MICROS.den),
            duration_bits: AtomicU64::new(DURATION_UNKNOWN),
        }
    }
}

impl PlaybackClock {
    pub(crate) fn configure(&self, time_base: TimeBase, duration_secs: Option<f64>) {
        self.tb_num.store(time_base.num, Ordering::Relaxed);
        self.tb_den.store(time_base.den, Ordering::Relaxed);
        let bits = duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(f64::to_bits)
            .unwrap_or(DURATION_UNKNOWN);
        self.duration_bits.store(bits, Ordering::Relaxed);
        self.set_position(0);
        self.held_pts.store(0, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.configure(TimeBase::MICROS, None);
    }

    pub fn time_base(&self) -> TimeBase {
        TimeBase::new(
            self.tb_num.load(Ordering::Relaxed),
            self.tb_den.load(Ordering::Relaxed),
        )
    }

    pub fn duration_secs(&self) -> Option<f64> {
        match self.duration_bits.load(Ordering::Relaxed) {
            DURATION_UNKNOWN => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Set both timestamps, e.g. to a seek target.
    pub(crate) fn set_position(&self, pts: i64) {
        self.current_pts.store(pts, Ordering::Release);
        self.last_valid_pts.store(pts, Ordering::Release);
    }

    /// Freeze the position reported while seeking at the last confirmed PTS.
    ///
    /// Called before the seeking flag is raised; `set_position` to the target
    /// does not show through until the flag is cleared.
    pub(crate) fn hold(&self) {
        self.held_pts.store(self.last_valid_pts(), Ordering::Release);
    }

    /// Record the PTS of a presented frame.
    pub fn publish(&self, pts: i64) {
        self.current_pts.store(pts, Ordering::Release);
        if pts > 0 {
            self.last_valid_pts.store(pts, Ordering::Release);
        }
    }

    /// Move the clock forward by `ticks` (used when audio drives the clock).
    pub fn advance(&self, ticks: i64) {
        let now = self.current_pts.fetch_add(ticks, Ordering::AcqRel) + ticks;
        if now > 0 {
            self.last_valid_pts.store(now, Ordering::Release);
        }
    }

    pub fn current_pts(&self) -> i64 {
        self.current_pts.load(Ordering::Acquire)
    }

    pub fn last_valid_pts(&self) -> i64 {
        self.last_valid_pts.load(Ordering::Acquire)
    }

    /// Position in seconds. While `seeking`, the position confirmed before the
    /// seek began is reported instead of the in-flight one.
    pub fn position_secs(&self, seeking: bool) -> f64 {
        let pts = if seeking {
            self.held_pts.load(Ordering::Acquire)
        } else {
            match self.current_pts() {
                p if p > 0 => p,
                _ => self.last_valid_pts(),
            }
        };
        if pts <= 0 {
            return 0.0;
        }
        self.time_base().pts_to_seconds(pts).max(0.0)
    }
}
