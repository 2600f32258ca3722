//! Thread-safe bounded FIFO used between pipeline stages.
//!
//! The queue is the admission-control mechanism of the pipeline: a producer that
//! outruns its consumer blocks in [`BoundedQueue::push`] until space frees up.
//!
//! - demux thread → packet queues → decode threads
//! - video decode thread → frame queue → presentation sink
//!
//! Every consumer-side wait is timeout-bounded so worker loops can notice their
//! stop flag. `close()` turns the queue into a draining state that rejects new
//! items and wakes every waiter.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Item rejected by [`BoundedQueue::push`] / [`BoundedQueue::push_timeout`].
///
/// The item is handed back so the caller decides whether to retry or drop it.
pub enum PushError<T> {
    /// The queue was closed before the item could be inserted.
    Closed(T),
    /// No space became available within the timeout.
    Timeout(T),
    /// The item went stale while waiting for space (see
    /// [`BoundedQueue::push_timeout_unless`]).
    Stale(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Closed(item) | PushError::Timeout(item) | PushError::Stale(item) => item,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Closed(_) => f.write_str("Closed(..)"),
            PushError::Timeout(_) => f.write_str("Timeout(..)"),
            PushError::Stale(_) => f.write_str("Stale(..)"),
        }
    }
}

/// Bounded multi-producer / multi-consumer FIFO.
///
/// ## Design
/// - `occupied <= capacity` at all times; `push` blocks while full.
/// - Two condition variables: `not_empty` wakes consumers, `not_full` wakes producers.
/// - The `closed` flag lives under the same mutex as the items to avoid races.
/// - [`len`](Self::len) / [`is_full`](Self::is_full) are snapshots only; the real
///   check always happens again under the lock inside `push`/`pop`.
pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued items (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Whether the queue is at capacity (best-effort snapshot).
    pub fn is_full(&self) -> bool {
        self.lock().items.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Insert `item`, blocking while the queue is full.
    ///
    /// Returns [`PushError::Closed`] without inserting if the queue is closed
    /// before space becomes available.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let g = self.lock();
        let mut g = self
            .not_full
            .wait_while(g, |inner| {
                inner.items.len() >= self.capacity && !inner.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        if g.closed {
            return Err(PushError::Closed(item));
        }
        g.items.push_back(item);
        drop(g);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert `item`, waiting at most `timeout` for space.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.push_timeout_unless(item, timeout, || false)
    }

    /// Like [`push_timeout`](Self::push_timeout), but `stale` is evaluated
    /// under the queue lock right before inserting; if it returns `true` the
    /// item is handed back as [`PushError::Stale`].
    ///
    /// A producer woken by [`flush`](Self::flush) therefore cannot slip an item
    /// that was invalidated before the flush back into the queue.
    pub fn push_timeout_unless(
        &self,
        item: T,
        timeout: Duration,
        stale: impl Fn() -> bool,
    ) -> Result<(), PushError<T>> {
        let g = self.lock();
        let (mut g, _) = self
            .not_full
            .wait_timeout_while(g, timeout, |inner| {
                inner.items.len() >= self.capacity && !inner.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        if g.closed {
            return Err(PushError::Closed(item));
        }
        if stale() {
            return Err(PushError::Stale(item));
        }
        if g.items.len() >= self.capacity {
            return Err(PushError::Timeout(item));
        }
        g.items.push_back(item);
        drop(g);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, waiting at most `timeout` for one to arrive.
    ///
    /// `None` means "nothing right now" (timeout, or closed and drained); it is
    /// not an error. Callers re-check their liveness flag before retrying.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let g = self.lock();
        let (mut g, _) = self
            .not_empty
            .wait_timeout_while(g, timeout, |inner| {
                inner.items.is_empty() && !inner.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        let item = g.items.pop_front();
        drop(g);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Non-blocking best-effort pop.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Discard every queued item and wake blocked producers.
    ///
    /// Returns how many items were dropped.
    pub fn flush(&self) -> usize {
        let drained: Vec<T> = {
            let mut g = self.lock();
            g.items.drain(..).collect()
        };
        self.not_full.notify_all();
        // Items are released outside the lock.
        drained.len()
    }

    /// Reject further pushes and wake every waiter.
    ///
    /// Already queued items can still be popped. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
