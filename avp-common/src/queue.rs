//! Thread-safe handoff queue between pipeline stages
//!
//! Every stage of the pipeline communicates through a `HandoffQueue`:
//! demux → packet queues → decoders → frame queues → outputs.
//!
//! Design:
//! - FIFO: insertion order is consumption order within one queue
//! - Items are moved across the boundary, never cloned
//! - `pop` takes a wait budget and never blocks past it; a timeout is the
//!   normal "nothing ready yet" signal consumers use to poll cancellation
//! - Optional high-water mark: `push` ignores it, `try_push` rejects while
//!   the queue is saturated so a producer can hold the item and back off
//! - End of stream: the producer calls `finish()`; consumers observe
//!   `is_drained()` once every remaining item has been taken
//! - Consumer gone: `close()` discards queued items and every later push, so
//!   a producer feeding a dead stage never saturates

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    finished: bool,
    closed: bool,
}

/// FIFO queue with timed blocking pop.
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    high_water: Option<usize>,
}

impl<T> HandoffQueue<T> {
    /// Create an unlimited queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                finished: false,
                closed: false,
            }),
            available: Condvar::new(),
            high_water: None,
        }
    }

    /// Create a queue with a high-water mark.
    ///
    /// The queue is saturated while it holds more than `high_water` items.
    /// `push` still accepts items past the mark; `try_push` does not.
    pub fn with_capacity(high_water: usize) -> Self {
        Self {
            high_water: Some(high_water),
            ..Self::new()
        }
    }

    /// Append an item to the tail and wake one waiting consumer.
    ///
    /// Never blocks and never rejects. Dropped if the queue is closed.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.items.push_back(item);
        self.available.notify_one();
    }

    /// Append an item unless the queue is saturated.
    ///
    /// # Returns
    /// `Err(item)` hands the item back when the queue holds more than its
    /// high-water mark. The check and the append happen under one lock.
    /// A closed queue accepts and drops every item.
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if self.saturated(state.items.len()) {
            return Err(item);
        }
        state.items.push_back(item);
        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the head item, waiting at most `timeout`.
    ///
    /// A zero timeout tries once without blocking. Returns `None` when no
    /// item arrived within the budget, or immediately once the queue is
    /// finished and empty.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();

        if state.items.is_empty() && !state.finished && !timeout.is_zero() {
            match Instant::now().checked_add(timeout) {
                Some(deadline) => {
                    while state.items.is_empty() && !state.finished {
                        if self.available.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                }
                None => {
                    // Budget too large to represent: wait until something happens
                    while state.items.is_empty() && !state.finished {
                        self.available.wait(&mut state);
                    }
                }
            }
        }

        state.items.pop_front()
    }

    /// Inspect the head item without removing it.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        state.items.front().map(f)
    }

    /// Point-in-time number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True if no items are queued right now.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the queue holds more items than its high-water mark.
    /// Never true once closed.
    pub fn is_saturated(&self) -> bool {
        let state = self.state.lock();
        !state.closed && self.saturated(state.items.len())
    }

    /// Mark end of stream. Queued items remain poppable.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.available.notify_all();
    }

    /// The consumer is gone: drop queued items, discard later pushes and
    /// mark the queue finished.
    ///
    /// # Returns
    /// Number of items discarded.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.items.len();
        state.items.clear();
        state.closed = true;
        state.finished = true;
        self.available.notify_all();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// True once the producer has called `finish()`.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// True once finished and every item has been consumed.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.items.is_empty()
    }

    /// Drop every queued item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.items.len();
        state.items.clear();
        discarded
    }

    fn saturated(&self, len: usize) -> bool {
        self.high_water.is_some_and(|limit| len > limit)
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandoffQueue")
            .field("len", &state.items.len())
            .field("finished", &state.finished)
            .field("closed", &state.closed)
            .field("high_water", &self.high_water)
            .finish()
    }
}
