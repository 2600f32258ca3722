//! Fixed-capacity circular byte buffer for decoded PCM.
//!
//! The audio decode thread writes converted PCM with a bounded wait; the output
//! callback drains it with [`AudioRingBuffer::try_read`], which never waits on a
//! condition variable.
//!
//! Two cursors are enough to tell "empty" from "full" because one byte of
//! capacity is always kept free:
//! `available_data() + available_space() == capacity - 1`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct AudioRingBuffer {
    inner: Mutex<RingInner>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

struct RingInner {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    stopped: bool,
    /// Bumped by every flush; lets a writer reject data decoded before the flush.
    generation: u64,
}

impl RingInner {
    fn available_data(&self, capacity: usize) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            capacity - self.read_pos + self.write_pos
        }
    }

    fn available_space(&self, capacity: usize) -> usize {
        capacity - self.available_data(capacity) - 1
    }

    fn copy_in(&mut self, data: &[u8], capacity: usize) {
        let first = data.len().min(capacity - self.write_pos);
        let second = data.len() - first;
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        if second > 0 {
            self.buf[..second].copy_from_slice(&data[first..]);
        }
        self.write_pos = (self.write_pos + data.len()) % capacity;
    }

    fn copy_out(&mut self, out: &mut [u8], capacity: usize) -> usize {
        let n = out.len().min(self.available_data(capacity));
        if n == 0 {
            return 0;
        }
        let first = n.min(capacity - self.read_pos);
        let second = n - first;
        out[..first].copy_from_slice(&self.buf[self.read_pos..self.read_pos + first]);
        if second > 0 {
            out[first..n].copy_from_slice(&self.buf[..second]);
        }
        self.read_pos = (self.read_pos + n) % capacity;
        n
    }
}

impl AudioRingBuffer {
    /// Create a buffer of `capacity` bytes; it holds at most `capacity - 1`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            inner: Mutex::new(RingInner {
                buf: vec![0; capacity],
                read_pos: 0,
                write_pos: 0,
                stopped: false,
                generation: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest write that can ever succeed.
    pub fn max_write(&self) -> usize {
        self.capacity - 1
    }

    pub fn available_data(&self) -> usize {
        self.lock().available_data(self.capacity)
    }

    pub fn available_space(&self) -> usize {
        self.lock().available_space(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.available_data() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available_space() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Current flush generation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Write all of `data`, waiting up to `timeout` for enough space.
    ///
    /// Returns the number of bytes written: `data.len()` on success, 0 on
    /// timeout or after [`stop`](Self::stop). A short write is back-pressure,
    /// not an error.
    pub fn write(&self, data: &[u8], timeout: Duration) -> usize {
        self.write_inner(data, timeout, None)
    }

    /// Like [`write`](Self::write) but rejects the data (returns 0) when a
    /// flush happened since `generation` was observed.
    pub fn write_in_generation(&self, data: &[u8], timeout: Duration, generation: u64) -> usize {
        self.write_inner(data, timeout, Some(generation))
    }

    fn write_inner(&self, data: &[u8], timeout: Duration, generation: Option<u64>) -> usize {
        if data.is_empty() {
            return 0;
        }
        let g = self.lock();
        if g.stopped {
            return 0;
        }
        let (mut g, _) = self
            .writable
            .wait_timeout_while(g, timeout, |inner| {
                inner.available_space(self.capacity) < data.len()
                    && !inner.stopped
                    && generation.is_none_or(|seen| seen == inner.generation)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if g.stopped || generation.is_some_and(|seen| seen != g.generation) {
            return 0;
        }
        if g.available_space(self.capacity) < data.len() {
            return 0;
        }
        g.copy_in(data, self.capacity);
        drop(g);
        self.readable.notify_one();
        data.len()
    }

    /// Read up to `out.len()` bytes, waiting up to `timeout` for that much data.
    ///
    /// After the wait, whatever is available is returned. Once stopped, remaining
    /// data drains and then 0 is returned.
    pub fn read(&self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }
        let g = self.lock();
        let (mut g, _) = self
            .readable
            .wait_timeout_while(g, timeout, |inner| {
                inner.available_data(self.capacity) < out.len() && !inner.stopped
            })
            .unwrap_or_else(PoisonError::into_inner);
        let n = g.copy_out(out, self.capacity);
        drop(g);
        if n > 0 {
            self.writable.notify_one();
        }
        n
    }

    /// Non-blocking read for real-time callbacks.
    pub fn try_read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let n = self.lock().copy_out(out, self.capacity);
        if n > 0 {
            self.writable.notify_one();
        }
        n
    }

    /// Reset both cursors, zero the storage, and wake every waiter.
    pub fn flush(&self) {
        let mut g = self.lock();
        g.read_pos = 0;
        g.write_pos = 0;
        g.buf.fill(0);
        g.generation = g.generation.wrapping_add(1);
        drop(g);
        self.writable.notify_all();
        self.readable.notify_all();
    }

    /// Enter the terminal stopped state. Writes become no-ops; reads drain.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.writable.notify_all();
        self.readable.notify_all();
    }
}
