//! Decoder capability consumed by the decode workers.
//!
//! Any codec satisfying this contract can be plugged in; the pipeline never looks
//! inside the payloads.

use std::time::Duration;

use crate::error::DecodeError;
use crate::media::{AudioBlock, CompressedUnit, DecodedFrame, StreamParameters};
use crate::queue::BoundedQueue;
use crate::state::SharedPlayback;
use crate::worker::StopFlag;

/// Result of handing one unit to the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The unit was consumed; frames may now be available.
    Accepted,
    /// The unit was consumed but more input is needed before any frame.
    NeedMoreInput,
}

/// Result of asking the decoder for output.
#[derive(Debug, PartialEq)]
pub enum Received<F> {
    Frame(F),
    /// Nothing buffered right now.
    None,
    EndOfStream,
}

/// A stateful decoder bound to one elementary stream.
///
/// One submitted unit may yield zero, one, or several frames; callers drain
/// [`receive`](Decoder::receive) until it returns something other than a frame.
pub trait Decoder: Send {
    type Frame: Send;

    /// Bind to a stream. Called once, before any other method.
    fn open(&mut self, params: &StreamParameters) -> Result<(), DecodeError>;

    fn submit(&mut self, unit: &CompressedUnit) -> Result<SubmitStatus, DecodeError>;

    fn receive(&mut self) -> Result<Received<Self::Frame>, DecodeError>;

    /// Drop all internal state (reference frames, partial input).
    fn flush(&mut self);
}

pub type VideoDecoder = dyn Decoder<Frame = DecodedFrame>;
pub type AudioDecoder = dyn Decoder<Frame = AudioBlock>;

/// Downstream half of a decode worker: receives every decoded frame.
pub(crate) trait FrameSink<F> {
    /// Called for every popped unit, before it is checked against the seek
    /// epoch and submitted.
    fn unit_popped(&mut self) {}

    /// Deliver one frame decoded from a unit of seek epoch `epoch`.
    fn accept(&mut self, frame: F, epoch: u64, stop: &StopFlag);

    /// The decoder was flushed; drop any carried state.
    fn reset(&mut self) {}
}

/// Loop shared by the video and audio decode workers.
///
/// Pops one unit per iteration (bounded by `poll`), handles flush markers,
/// drops units read before the latest seek, submits the rest and drains every
/// frame the decoder has ready. Decoder errors skip the unit.
pub(crate) fn run_decode_loop<F, S>(
    label: &'static str,
    decoder: &mut dyn Decoder<Frame = F>,
    packets: &BoundedQueue<CompressedUnit>,
    shared: &SharedPlayback,
    sink: &mut S,
    poll: Duration,
    stop: &StopFlag,
) where
    F: Send,
    S: FrameSink<F>,
{
    while !stop.is_stopped() {
        let Some(unit) = packets.pop(poll) else {
            continue;
        };

        if unit.is_flush() {
            decoder.flush();
            sink.reset();
            tracing::debug!(worker = label, "decoder flushed");
            continue;
        }
        // Before the epoch check: a sink that observes post-flush state here
        // also observes the epoch bump that preceded the flush.
        sink.unit_popped();
        if unit.epoch < shared.epoch() {
            tracing::trace!(worker = label, epoch = unit.epoch, "dropping pre-seek unit");
            continue;
        }

        match decoder.submit(&unit) {
            Ok(SubmitStatus::Accepted) => {}
            Ok(SubmitStatus::NeedMoreInput) => {
                tracing::trace!(worker = label, "decoder needs more input");
            }
            Err(e) => {
                tracing::warn!(worker = label, stream = %unit.stream, "submit failed: {e}");
                continue;
            }
        }

        while !stop.is_stopped() {
            match decoder.receive() {
                Ok(Received::Frame(frame)) => sink.accept(frame, unit.epoch, stop),
                Ok(Received::None) => break,
                Ok(Received::EndOfStream) => {
                    tracing::debug!(worker = label, "decoder reached end of stream");
                    break;
                }
                Err(e) => {
                    tracing::warn!(worker = label, stream = %unit.stream, "receive failed: {e}");
                    break;
                }
            }
        }
    }
    tracing::debug!(worker = label, "decode loop exited");
}
