//! Playback speed: validation, shared storage, and the PCM speed transform.
//!
//! The transform is deliberately cheap: above 1x it keeps every `floor(speed)`-th
//! sample frame, below 1x it repeats each frame `floor(1 / speed)` times. Pitch
//! changes with speed. It works on whole frames so channels never drift apart.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::PlayerError;

pub const MAX_SPEED: f32 = 4.0;

const SNAP_STEPS: [f32; 4] = [0.5, 1.0, 2.0, 3.0];
const SNAP_EPSILON: f32 = 0.01;

/// Check that `value` lies in `(0, 4]` and snap near-misses to common steps.
pub fn validate_speed(value: f32) -> Result<f32, PlayerError> {
    if !value.is_finite() || value <= 0.0 || value > MAX_SPEED {
        return Err(PlayerError::InvalidSpeed(value));
    }
    Ok(SNAP_STEPS
        .iter()
        .copied()
        .find(|step| (value - step).abs() < SNAP_EPSILON)
        .unwrap_or(value))
}

/// Speed multiplier shared between the controller, the audio worker and presenters.
#[derive(Clone, Debug)]
pub struct SharedSpeed(Arc<AtomicU32>);

impl SharedSpeed {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store an already validated value.
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for SharedSpeed {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// How the PCM transform realizes a speed: every frame, every n-th frame,
/// or each frame n times.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameStep {
    Every,
    Skip(usize),
    Repeat(usize),
}

fn frame_step(speed: f32) -> FrameStep {
    if speed > 1.0 {
        match speed.floor() as usize {
            0 | 1 => FrameStep::Every,
            n => FrameStep::Skip(n),
        }
    } else if speed < 1.0 && speed > 0.0 {
        match (1.0 / speed).floor() as usize {
            0 | 1 => FrameStep::Every,
            n => FrameStep::Repeat(n),
        }
    } else {
        FrameStep::Every
    }
}

/// Media frames consumed per output frame by [`apply_speed`] at `speed`.
///
/// This is the rate the audio clock must advance at: 1.5x plays like 1x and
/// 0.4x like 0.5x.
pub fn effective_ratio(speed: f32) -> f64 {
    match frame_step(speed) {
        FrameStep::Every => 1.0,
        FrameStep::Skip(n) => n as f64,
        FrameStep::Repeat(n) => 1.0 / n as f64,
    }
}

/// Apply the speed transform to interleaved PCM made of `bytes_per_frame` frames.
///
/// Trailing bytes that do not form a whole frame are dropped. At an effective
/// ratio of 1 the input is returned borrowed; otherwise a buffer sized exactly to
/// the transformed output is allocated.
pub fn apply_speed(pcm: &[u8], bytes_per_frame: usize, speed: f32) -> Cow<'_, [u8]> {
    if bytes_per_frame == 0 {
        return Cow::Borrowed(&[]);
    }
    let frames = pcm.len() / bytes_per_frame;
    let whole = &pcm[..frames * bytes_per_frame];

    match frame_step(speed) {
        FrameStep::Every => Cow::Borrowed(whole),
        FrameStep::Skip(step) => {
            let out_frames = frames / step;
            let mut out = Vec::with_capacity(out_frames * bytes_per_frame);
            for frame in whole.chunks_exact(bytes_per_frame).step_by(step).take(out_frames) {
                out.extend_from_slice(frame);
            }
            Cow::Owned(out)
        }
        FrameStep::Repeat(repeat) => {
            let mut out = Vec::with_capacity(frames * repeat * bytes_per_frame);
            for frame in whole.chunks_exact(bytes_per_frame) {
                for _ in 0..repeat {
                    out.extend_from_slice(frame);
                }
            }
            Cow::Owned(out)
        }
    }
}
