//! Worker threads with cooperative cancellation and bounded shutdown.
//!
//! Every pipeline stage runs a loop of the shape
//!
//! ```text
//! while !stop.is_stopped() {
//!     wait on a queue/source for at most `timing.poll`
//!     ...
//! }
//! ```
//!
//! so a raised [`StopFlag`] is observed within one poll interval. [`Worker::stop`]
//! waits at most `join_timeout` for the thread to exit; a thread that does not
//! exit in time is detached. Worker bodies only capture `Arc`-owned state, so a
//! detached thread never references memory owned by the controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use av_player_types::StopOutcome;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

/// Shared "please exit" flag for one worker.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Poll interval and shutdown bound of a worker loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTiming {
    /// Longest single wait inside the loop.
    pub poll: Duration,
    /// Longest time [`Worker::stop`] waits for the thread to exit.
    pub join_timeout: Duration,
}

/// A named OS thread driven by a [`StopFlag`].
pub struct Worker {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
    done: Receiver<()>,
}

/// Signals completion when dropped, so a panicking body still reports exit.
struct ExitGuard(Sender<()>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

impl Worker {
    /// Spawn `body` on a new thread named `name`.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let stop = StopFlag::new();
        let flag = stop.clone();
        let (done_tx, done) = bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit = ExitGuard(done_tx);
                body(flag)
            })?;
        tracing::debug!(worker = name, "worker started");
        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` while the thread has been started, not stopped, and not exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raise the stop flag without waiting.
    pub fn signal(&self) {
        self.stop.stop();
    }

    /// Raise the stop flag and wait at most `timeout` for the thread to exit.
    ///
    /// Idempotent: once the thread was joined or detached, further calls return
    /// [`StopOutcome::NotRunning`].
    pub fn stop(&mut self, timeout: Duration) -> StopOutcome {
        self.stop.stop();
        let Some(handle) = self.handle.take() else {
            return StopOutcome::NotRunning;
        };

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    worker = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker did not stop in time; detaching"
                );
                drop(handle);
                return StopOutcome::Detached;
            }
        }

        if handle.join().is_err() {
            tracing::error!(worker = %self.name, "worker panicked");
        } else {
            tracing::debug!(worker = %self.name, "worker joined");
        }
        StopOutcome::Joined
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Never block in drop; an unjoined thread is detached here.
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn cooperative_worker_is_joined() {
        let mut w = Worker::spawn("coop", |stop| {
            while !stop.is_stopped() {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert!(w.is_running());
        assert_eq!(w.stop(Duration::from_secs(1)), StopOutcome::Joined);
        assert!(!w.is_running());
    }

    #[test]
    fn second_stop_reports_not_running() {
        let mut w = Worker::spawn("twice", |_stop| {}).unwrap();
        assert_eq!(w.stop(Duration::from_secs(1)), StopOutcome::Joined);
        assert_eq!(w.stop(Duration::from_secs(1)), StopOutcome::NotRunning);
    }

    #[test]
    fn stuck_worker_is_detached_within_bound() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut w = Worker::spawn("stuck", move |_stop| {
            // Ignores the stop flag until released.
            let _ = release_rx.recv_timeout(Duration::from_secs(10));
        })
        .unwrap();

        let started = Instant::now();
        let outcome = w.stop(Duration::from_millis(50));
        let elapsed = started.elapsed();

        assert_eq!(outcome, StopOutcome::Detached);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(w.stop(Duration::from_millis(50)), StopOutcome::NotRunning);
        let _ = release_tx.send(());
    }

    #[test]
    fn panicking_worker_still_counts_as_joined() {
        let mut w = Worker::spawn("panics", |_stop| panic!("boom")).unwrap();
        assert_eq!(w.stop(Duration::from_secs(1)), StopOutcome::Joined);
    }
}
