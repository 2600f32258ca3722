//! Video decode worker: compressed units in, [`DecodedFrame`]s out.

use std::sync::Arc;
use std::time::Duration;

use av_player_types::StopOutcome;

use crate::codec::{FrameSink, VideoDecoder, run_decode_loop};
use crate::error::{DecodeError, PlayerError, Result};
use crate::media::{CompressedUnit, DecodedFrame, MediaKind, StreamIndex, StreamParameters};
use crate::queue::{BoundedQueue, PushError};
use crate::state::SharedPlayback;
use crate::worker::{StopFlag, Worker, WorkerTiming};

pub struct VideoDecodeWorker {
    decoder: Option<Box<VideoDecoder>>,
    packets: Arc<BoundedQueue<CompressedUnit>>,
    frames: Arc<BoundedQueue<DecodedFrame>>,
    shared: Arc<SharedPlayback>,
    timing: WorkerTiming,
    stream: Option<StreamIndex>,
    worker: Option<Worker>,
}

impl VideoDecodeWorker {
    pub fn new(
        decoder: Box<VideoDecoder>,
        packets: Arc<BoundedQueue<CompressedUnit>>,
        frames: Arc<BoundedQueue<DecodedFrame>>,
        shared: Arc<SharedPlayback>,
        timing: WorkerTiming,
    ) -> Self {
        Self {
            decoder: Some(decoder),
            packets,
            frames,
            shared,
            timing,
            stream: None,
            worker: None,
        }
    }

    /// Bind the decoder to `params` and start decoding.
    ///
    /// Fails if the worker was already started, or if `params` is absent or
    /// describes a non-video stream.
    pub fn start(&mut self, params: Option<&StreamParameters>) -> Result<()> {
        if self.worker.is_some() {
            return Err(PlayerError::AlreadyRunning);
        }
        let params = params
            .ok_or_else(|| DecodeError::Unsupported("no video stream parameters".into()))?;
        if params.kind != MediaKind::Video {
            let reason = format!("stream {} is not video", params.index);
            return Err(DecodeError::Unsupported(reason).into());
        }
        let Some(mut decoder) = self.decoder.take() else {
            return Err(PlayerError::AlreadyRunning);
        };
        if let Err(e) = decoder.open(params) {
            self.decoder = Some(decoder);
            return Err(e.into());
        }

        let packets = self.packets.clone();
        let shared = self.shared.clone();
        let mut sink = FrameForwarder {
            frames: self.frames.clone(),
            shared: self.shared.clone(),
            wait: self.timing.poll,
        };
        let poll = self.timing.poll;
        let worker = Worker::spawn("av-video-decode", move |stop| {
            run_decode_loop("video", &mut *decoder, &packets, &shared, &mut sink, poll, &stop)
        })
        .map_err(|e| DecodeError::Codec(format!("spawn video worker: {e}")))?;

        tracing::info!(stream = %params.index, codec = %params.codec, "video decoder started");
        self.stream = Some(params.index);
        self.worker = Some(worker);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    /// Queue a flush marker; the worker flushes its decoder when it pops it.
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

struct FrameForwarder {
    frames: Arc<BoundedQueue<DecodedFrame>>,
    shared: Arc<SharedPlayback>,
    wait: Duration,
}

impl FrameSink<DecodedFrame> for FrameForwarder {
    fn accept(&mut self, mut frame: DecodedFrame, epoch: u64, stop: &StopFlag) {
        frame.epoch = epoch;
        loop {
            let shared = &self.shared;
            match self.frames.push_timeout_unless(frame, self.wait, || epoch < shared.epoch()) {
                Ok(()) | Err(PushError::Closed(_)) | Err(PushError::Stale(_)) => return,
                Err(PushError::Timeout(f)) => {
                    if stop.is_stopped() {
                        return;
                    }
                    frame = f;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        BlockingDecoder, FakeVideoDecoder, audio_stream, video_stream, video_unit,
    };

    fn timing() -> WorkerTiming {
        WorkerTiming {
            poll: Duration::from_millis(5),
            join_timeout: Duration::from_millis(500),
        }
    }

    type Harness = (
        VideoDecodeWorker,
        Arc<BoundedQueue<CompressedUnit>>,
        Arc<BoundedQueue<DecodedFrame>>,
    );

    fn worker(decoder: Box<VideoDecoder>) -> Harness {
        let packets = Arc::new(BoundedQueue::new(16));
        let frames = Arc::new(BoundedQueue::new(16));
        let w = VideoDecodeWorker::new(
            decoder,
            packets.clone(),
            frames.clone(),
            Arc::new(SharedPlayback::new()),
            timing(),
        );
        (w, packets, frames)
    }

    #[test]
    fn start_rejects_missing_or_mismatched_params() {
        let (mut w, _, _) = worker(Box::new(FakeVideoDecoder::default()));
        assert!(matches!(w.start(None), Err(PlayerError::Decoder(DecodeError::Unsupported(_)))));
        assert!(matches!(
            w.start(Some(&audio_stream(1))),
            Err(PlayerError::Decoder(DecodeError::Unsupported(_)))
        ));
        // Still startable with the right parameters.
        w.start(Some(&video_stream(0))).unwrap();
        assert!(matches!(w.start(Some(&video_stream(0))), Err(PlayerError::AlreadyRunning)));
        assert_eq!(w.stop(), StopOutcome::Joined);
    }

    #[test]
    fn decodes_units_into_frames_in_order() {
        let (mut w, packets, frames) = worker(Box::new(FakeVideoDecoder::default()));
        w.start(Some(&video_stream(0))).unwrap();

        for i in 0..5 {
            packets.push(video_unit(0, i * 40, i == 0)).unwrap();
        }
        let pts: Vec<i64> = (0..5)
            .map(|_| frames.pop(Duration::from_secs(1)).unwrap().pts.unwrap())
            .collect();
        assert_eq!(pts, vec![0, 40, 80, 120, 160]);
        assert_eq!(w.stop(), StopOutcome::Joined);
    }

    #[test]
    fn one_unit_may_yield_several_frames() {
        let (mut w, packets, frames) = worker(Box::new(FakeVideoDecoder::with_frames_per_unit(3)));
        w.start(Some(&video_stream(0))).unwrap();
        packets.push(video_unit(0, 40, true)).unwrap();
        for _ in 0..3 {
            assert!(frames.pop(Duration::from_secs(1)).is_some());
        }
        w.stop();
    }

    #[test]
    fn flush_marker_reaches_decoder() {
        let decoder = FakeVideoDecoder::default();
        let flushes = decoder.flush_counter();
        let (mut w, _, _) = worker(Box::new(decoder));
        assert!(!w.flush());

        w.start(Some(&video_stream(0))).unwrap();
        assert!(w.flush());
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while flushes.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
        w.stop();
    }

    #[test]
    fn stale_units_are_dropped() {
        let packets = Arc::new(BoundedQueue::new(16));
        let frames = Arc::new(BoundedQueue::new(16));
        let shared = Arc::new(SharedPlayback::new());
        let mut w = VideoDecodeWorker::new(
            Box::new(FakeVideoDecoder::default()),
            packets.clone(),
            frames.clone(),
            shared.clone(),
            timing(),
        );
        w.start(Some(&video_stream(0))).unwrap();
        shared.advance_epoch();

        packets.push(video_unit(0, 40, true)).unwrap(); // epoch 0: stale
        let mut fresh = video_unit(0, 80, true);
        fresh.epoch = 1;
        packets.push(fresh).unwrap();

        let frame = frames.pop(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.pts, Some(80));
        assert_eq!(frame.epoch, 1);
        w.stop();
    }

    #[test]
    fn stuck_decoder_is_detached() {
        let (decoder, release) = BlockingDecoder::new();
        let packets = Arc::new(BoundedQueue::new(4));
        let mut w = VideoDecodeWorker::new(
            Box::new(decoder),
            packets.clone(),
            Arc::new(BoundedQueue::new(4)),
            Arc::new(SharedPlayback::new()),
            WorkerTiming {
                poll: Duration::from_millis(5),
                join_timeout: Duration::from_millis(50),
            },
        );
        w.start(Some(&video_stream(0))).unwrap();
        packets.push(video_unit(0, 40, true)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(w.stop(), StopOutcome::Detached);
        assert_eq!(w.stop(), StopOutcome::NotRunning);
        let _ = release.send(());
    }
}
