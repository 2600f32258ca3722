//! Demultiplexer: one thread pulling compressed units from the source and
//! routing them to per-stream packet queues.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use av_player_types::StopOutcome;

use crate::error::{PlayerError, Result};
use crate::media::{CompressedUnit, StreamIndex};
use crate::queue::{BoundedQueue, PushError};
use crate::source::{ReadOutcome, SelectedStreams, SharedSource, select_streams};
use crate::state::SharedPlayback;
use crate::worker::{StopFlag, Worker, WorkerTiming};

/// Destination queue for one elementary stream.
#[derive(Clone)]
pub struct StreamRoute {
    pub stream: StreamIndex,
    pub queue: Arc<BoundedQueue<CompressedUnit>>,
}

pub struct Demuxer {
    source: SharedSource,
    streams: SelectedStreams,
    worker: Option<Worker>,
    join_timeout: Duration,
}

impl Demuxer {
    /// Open `uri` and select the best video and audio streams.
    ///
    /// Fails with [`PlayerError::NoUsableStream`] (after closing the source)
    /// when neither kind is present.
    pub fn open(source: SharedSource, uri: &str) -> Result<Self> {
        let all = source.with_source(|s| s.open(uri))?;
        let streams = select_streams(&all);
        if streams.is_empty() {
            source.with_source(|s| s.close());
            return Err(PlayerError::NoUsableStream);
        }
        tracing::info!(
            uri,
            streams = all.len(),
            video = ?streams.video.as_ref().map(|s| s.index.0),
            audio = ?streams.audio.as_ref().map(|s| s.index.0),
            "source opened"
        );
        Ok(Self {
            source,
            streams,
            worker: None,
            join_timeout: Duration::ZERO,
        })
    }

    pub fn streams(&self) -> &SelectedStreams {
        &self.streams
    }

    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    /// Container duration, as reported by the source.
    pub fn duration(&self) -> Option<Duration> {
        self.source.with_source(|s| s.duration())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    /// Start the read loop. Units of streams without a route are discarded.
    pub fn start(
        &mut self,
        routes: Vec<StreamRoute>,
        shared: Arc<SharedPlayback>,
        timing: WorkerTiming,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(PlayerError::AlreadyRunning);
        }
        let source = self.source.clone();
        let worker = Worker::spawn("av-demux", move |stop| {
            read_loop(&source, &routes, &shared, timing.poll, &stop)
        })
        .map_err(crate::error::SourceError::from)?;
        self.worker = Some(worker);
        self.join_timeout = timing.join_timeout;
        Ok(())
    }

    /// Raise the stop flag without waiting.
    pub fn signal(&self) {
        if let Some(w) = &self.worker {
            w.signal();
        }
    }

    pub fn stop(&mut self) -> StopOutcome {
        match self.worker.as_mut() {
            Some(w) => w.stop(self.join_timeout),
            None => StopOutcome::NotRunning,
        }
    }
}

fn read_loop(
    source: &SharedSource,
    routes: &[StreamRoute],
    shared: &SharedPlayback,
    retry_delay: Duration,
    stop: &StopFlag,
) {
    let mut at_end = false;
    let mut errors = ErrorStreak::default();
    while !stop.is_stopped() {
        // The epoch is sampled under the source lock, so it always matches the
        // source position the unit was read from.
        let (outcome, epoch) = source.with_source(|s| (s.read_next(), shared.epoch()));

        if outcome.is_ok() {
            let failures = errors.clear();
            if failures > 0 {
                tracing::info!(failures, "source reads recovered");
            }
        }
        match outcome {
            Ok(ReadOutcome::Unit(mut unit)) => {
                at_end = false;
                let Some(route) = routes.iter().find(|r| r.stream == unit.stream) else {
                    tracing::trace!(stream = %unit.stream, "discarding unit of unselected stream");
                    continue;
                };
                if unit.is_flush() {
                    // An empty payload from the source would read as a flush marker.
                    continue;
                }
                unit.epoch = epoch;
                forward(route, unit, shared, retry_delay, stop);
            }
            Ok(ReadOutcome::Pending) => thread::sleep(retry_delay),
            Ok(ReadOutcome::EndOfStream) => {
                if !at_end {
                    tracing::info!("source reached end of stream");
                    at_end = true;
                }
                thread::sleep(retry_delay);
            }
            Err(e) => {
                if errors.fail() {
                    tracing::warn!("source read failed: {e}");
                } else {
                    tracing::trace!(failures = errors.len(), "source read still failing: {e}");
                }
                thread::sleep(retry_delay);
            }
        }
    }
    tracing::debug!("demux loop exited");
}

/// Run of consecutive read failures, so a persistent error logs once.
#[derive(Debug, Default)]
struct ErrorStreak {
    failures: u64,
}

impl ErrorStreak {
    /// Count a failure; `true` when it starts a new streak.
    fn fail(&mut self) -> bool {
        self.failures += 1;
        self.failures == 1
    }

    fn len(&self) -> u64 {
        self.failures
    }

    /// End the streak, returning how many failures it held.
    fn clear(&mut self) -> u64 {
        std::mem::take(&mut self.failures)
    }
}

/// Push with bounded waits so a full queue never hides the stop flag.
fn forward(
    route: &StreamRoute,
    mut unit: CompressedUnit,
    shared: &SharedPlayback,
    wait: Duration,
    stop: &StopFlag,
) {
    loop {
        let epoch = unit.epoch;
        match route.queue.push_timeout_unless(unit, wait, || epoch < shared.epoch()) {
            Ok(()) | Err(PushError::Closed(_)) | Err(PushError::Stale(_)) => return,
            Err(PushError::Timeout(u)) => {
                if stop.is_stopped() {
                    return;
                }
                unit = u;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::media::MediaKind;
    use crate::test_support::{ScriptedSource, audio_stream, video_stream};

    fn timing() -> WorkerTiming {
        WorkerTiming {
            poll: Duration::from_millis(2),
            join_timeout: Duration::from_millis(500),
        }
    }

    fn route(idx: u32, cap: usize) -> StreamRoute {
        StreamRoute {
            stream: StreamIndex(idx),
            queue: Arc::new(BoundedQueue::new(cap)),
        }
    }

    #[test]
    fn open_without_streams_fails() {
        let source = SharedSource::new(Box::new(ScriptedSource::new(vec![])));
        let err = Demuxer::open(source, "empty").err().unwrap();
        assert!(matches!(err, PlayerError::NoUsableStream));
    }

    #[test]
    fn open_failure_is_reported() {
        let source = SharedSource::new(Box::new(ScriptedSource::failing_open()));
        let err = Demuxer::open(source, "broken").err().unwrap();
        assert!(matches!(err, PlayerError::Source(_)));
    }

    #[test]
    fn routes_units_by_stream_identity() {
        let source = SharedSource::new(Box::new(ScriptedSource::new(vec![
            video_stream(0),
            audio_stream(1),
        ])));
        let mut demux = Demuxer::open(source, "av").unwrap();
        assert_eq!(demux.streams().video.as_ref().unwrap().kind, MediaKind::Video);

        let video = route(0, 8);
        let audio = route(1, 8);
        let shared = Arc::new(SharedPlayback::new());
        demux
            .start(vec![video.clone(), audio.clone()], shared, timing())
            .unwrap();

        let v = video.queue.pop(Duration::from_secs(1)).unwrap();
        let a = audio.queue.pop(Duration::from_secs(1)).unwrap();
        assert_eq!(v.stream, StreamIndex(0));
        assert_eq!(a.stream, StreamIndex(1));
        assert_eq!(demux.stop(), StopOutcome::Joined);
    }

    #[test]
    fn unrouted_streams_are_discarded() {
        let source = SharedSource::new(Box::new(ScriptedSource::new(vec![
            video_stream(0),
            audio_stream(1),
        ])));
        let mut demux = Demuxer::open(source, "av").unwrap();
        let audio = route(1, 4);
        demux
            .start(vec![audio.clone()], Arc::new(SharedPlayback::new()), timing())
            .unwrap();

        // The video stream has no route; the demuxer must not stall on it.
        for _ in 0..8 {
            let unit = audio.queue.pop(Duration::from_secs(1)).unwrap();
            assert_eq!(unit.stream, StreamIndex(1));
        }
        assert_eq!(demux.stop(), StopOutcome::Joined);
    }

    #[test]
    fn full_queue_applies_backpressure_and_stop_stays_bounded() {
        let source = SharedSource::new(Box::new(ScriptedSource::new(vec![audio_stream(3)])));
        let mut demux = Demuxer::open(source, "a").unwrap();
        let audio = route(3, 2);
        demux
            .start(vec![audio.clone()], Arc::new(SharedPlayback::new()), timing())
            .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(audio.queue.len(), 2);
        assert!(demux.is_running());
        assert_eq!(demux.stop(), StopOutcome::Joined);
        assert_eq!(demux.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn units_carry_current_epoch() {
        let source = SharedSource::new(Box::new(ScriptedSource::new(vec![audio_stream(0)])));
        let mut demux = Demuxer::open(source, "a").unwrap();
        let audio = route(0, 1);
        let shared = Arc::new(SharedPlayback::new());
        shared.advance_epoch();
        demux.start(vec![audio.clone()], shared, timing()).unwrap();

        let unit = audio.queue.pop(Duration::from_secs(1)).unwrap();
        assert_eq!(unit.epoch, 1);
        demux.stop();
    }

    #[test]
    fn error_streak_reports_only_its_first_failure() {
        let mut errors = ErrorStreak::default();
        assert!(errors.fail());
        assert!(!errors.fail());
        assert!(!errors.fail());
        assert_eq!(errors.clear(), 3);
        assert_eq!(errors.clear(), 0);
        assert!(errors.fail());
    }

    #[test]
    fn read_failures_are_retried_until_units_flow() {
        let scripted = ScriptedSource::failing_reads(vec![audio_stream(0)], 5);
        let events = scripted.events();
        let source = SharedSource::new(Box::new(scripted));
        let mut demux = Demuxer::open(source, "a").unwrap();
        let audio = route(0, 4);
        demux
            .start(vec![audio.clone()], Arc::new(SharedPlayback::new()), timing())
            .unwrap();

        let unit = audio.queue.pop(Duration::from_secs(1)).unwrap();
        assert_eq!(unit.pts, Some(0));
        assert_eq!(events.failed_reads.load(Ordering::SeqCst), 5);
        assert_eq!(demux.stop(), StopOutcome::Joined);
    }

    #[test]
    fn start_twice_is_rejected() {
        let source = SharedSource::new(Box::new(ScriptedSource::new(vec![audio_stream(0)])));
        let mut demux = Demuxer::open(source, "a").unwrap();
        let shared = Arc::new(SharedPlayback::new());
        demux.start(vec![route(0, 4)], shared.clone(), timing()).unwrap();
        assert!(matches!(
            demux.start(vec![route(0, 4)], shared, timing()),
            Err(PlayerError::AlreadyRunning)
        ));
        demux.stop();
    }
}
