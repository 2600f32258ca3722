//! Audio decode worker: compressed units in, fixed-format PCM into the ring buffer.

use std::sync::Arc;
use std::time::Duration;

use av_player_types::StopOutcome;

use crate::codec::{AudioDecoder, FrameSink, run_decode_loop};
use crate::config::PipelineConfig;
use crate::convert::PcmConverter;
use crate::error::{DecodeError, PlayerError, Result};
use crate::media::{AudioBlock, CompressedUnit, MediaKind, StreamIndex, StreamParameters};
use crate::queue::BoundedQueue;
use crate::ring_buffer::AudioRingBuffer;
use crate::speed::apply_speed;
use crate::state::SharedPlayback;
use crate::worker::{StopFlag, Worker, WorkerTiming};

pub struct AudioDecodeWorker {
    decoder: Option<Box<AudioDecoder>>,
    packets: Arc<BoundedQueue<CompressedUnit>>,
    ring: Arc<AudioRingBuffer>,
    shared: Arc<SharedPlayback>,
    timing: WorkerTiming,
    writer: Option<PcmWriter>,
    stream: Option<StreamIndex>,
    worker: Option<Worker>,
}

impl AudioDecodeWorker {
    pub fn new(
        decoder: Box<AudioDecoder>,
        packets: Arc<BoundedQueue<CompressedUnit>>,
        ring: Arc<AudioRingBuffer>,
        shared: Arc<SharedPlayback>,
        config: &PipelineConfig,
    ) -> Self {
        let writer = PcmWriter {
            converter: PcmConverter::new(config.output, config.resample_chunk_frames),
            ring: ring.clone(),
            shared: shared.clone(),
            bytes_per_frame: config.output.bytes_per_frame(),
            write_timeout: config.ring_write_timeout,
            generation: 0,
        };
        Self {
            decoder: Some(decoder),
            packets,
            ring,
            shared,
            timing: config.audio_timing(),
            writer: Some(writer),
            stream: None,
            worker: None,
        }
    }

    /// Bind the decoder to `params` and start decoding.
    ///
    /// Fails if the worker was already started, or if `params` is absent or
    /// describes a non-audio stream.
    pub fn start(&mut self, params: Option<&StreamParameters>) -> Result<()> {
        if self.worker.is_some() {
            return Err(PlayerError::AlreadyRunning);
        }
        let params = params
            .ok_or_else(|| DecodeError::Unsupported("no audio stream parameters".into()))?;
        if params.kind != MediaKind::Audio {
            let reason = format!("stream {} is not audio", params.index);
            return Err(DecodeError::Unsupported(reason).into());
        }
        let (Some(mut decoder), Some(mut writer)) = (self.decoder.take(), self.writer.take()) else {
            return Err(PlayerError::AlreadyRunning);
        };
        if let Err(e) = decoder.open(params) {
            self.decoder = Some(decoder);
            self.writer = Some(writer);
            return Err(e.into());
        }

        let packets = self.packets.clone();
        let shared = self.shared.clone();
        let poll = self.timing.poll;
        let worker = Worker::spawn("av-audio-decode", move |stop| {
            run_decode_loop("audio", &mut *decoder, &packets, &shared, &mut writer, poll, &stop)
        })
        .map_err(|e| DecodeError::Codec(format!("spawn audio worker: {e}")))?;

        tracing::info!(
            stream = %params.index,
            codec = %params.codec,
            source_rate = ?params.audio.map(|a| a.sample_rate),
            ring_bytes = self.ring.capacity(),
            "audio decoder started"
        );
        self.stream = Some(params.index);
        self.worker = Some(worker);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    /// Queue a flush marker; the worker flushes its decoder and resampler when
    /// it pops it.
    pub fn flush(&self) -> bool {
        let Some(stream) = self.stream else {
            return false;
        };
        self.packets
            .push_timeout(CompressedUnit::flush_marker(stream), self.timing.poll)
            .is_ok()
    }

    pub fn signal(&self) {
        if let Some(w) = &self.worker {
            w.signal();
        }
    }

    pub fn stop(&mut self) -> StopOutcome {
        match self.worker.as_mut() {
            Some(w) => w.stop(self.timing.join_timeout),
            None => StopOutcome::NotRunning,
        }
    }
}

/// Converts, speed-adjusts and writes decoded blocks into the ring buffer.
struct PcmWriter {
    converter: PcmConverter,
    ring: Arc<AudioRingBuffer>,
    shared: Arc<SharedPlayback>,
    bytes_per_frame: usize,
    write_timeout: Duration,
    /// Ring generation observed when the current unit was popped.
    generation: u64,
}

impl PcmWriter {
    /// Write `pcm` in whole-frame chunks, retrying on back-pressure until the
    /// ring is flushed or stopped.
    fn write_all(&self, pcm: &[u8], stop: &StopFlag) {
        let frames_per_chunk = (self.ring.max_write() / self.bytes_per_frame).max(1);
        let max_chunk = frames_per_chunk * self.bytes_per_frame;
        for chunk in pcm.chunks(max_chunk) {
            loop {
                if self.ring.write_in_generation(chunk, self.write_timeout, self.generation) > 0 {
                    break;
                }
                let flushed = self.ring.generation() != self.generation;
                if flushed || stop.is_stopped() || self.ring.is_stopped() {
                    tracing::debug!(bytes = chunk.len(), "dropping pcm after flush or stop");
                    return;
                }
            }
        }
    }
}

impl FrameSink<AudioBlock> for PcmWriter {
    fn unit_popped(&mut self) {
        self.generation = self.ring.generation();
    }

    fn accept(&mut self, block: AudioBlock, _epoch: u64, stop: &StopFlag) {
        let pcm = match self.converter.convert(&block) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!("audio conversion failed: {e}");
                return;
            }
        };
        if pcm.is_empty() {
            return;
        }
        let out = apply_speed(&pcm, self.bytes_per_frame, self.shared.speed().get());
        self.write_all(&out, stop);
    }

    fn reset(&mut self) {
        self.converter.reset();
    }
}
