//! Closable FIFO queue connecting pipeline stages.
//!
//! Consumers wait on [`ClosableQueue::get`] until an item arrives or the
//! producer closes the queue. Items enqueued before the close are still
//! drained; only a dequeue on an empty, closed queue fails with
//! [`QueueClosed`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::Snafu;
use tokio::sync::Notify;
use tracing::warn;

/// Returned by [`ClosableQueue::get`] once the queue is closed and drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(display("queue closed"))]
pub struct QueueClosed;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded multi-producer, multi-consumer queue with an explicit close.
pub struct ClosableQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    /// Woken whenever an item is taken off the queue.
    taken: Notify,
}

impl<T> Default for ClosableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClosableQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            taken: Notify::new(),
        }
    }

    // The lock is never held across an await or a user callback, so a
    // poisoned guard still protects consistent state.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item. Never waits.
    ///
    /// Producers must not put after closing; such items are dropped.
    pub fn put(&self, item: T) {
        {
            let mut inner = self.lock();
            if inner.closed {
                warn!("Dropping item put on a closed queue");
                return;
            }
            inner.items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Wait for the next item.
    ///
    /// Returns `Err(QueueClosed)` only when the queue is closed and empty.
    pub async fn get(&self) -> Result<T, QueueClosed> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a put or close between the
            // check and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    let more = !inner.items.is_empty();
                    drop(inner);
                    self.taken.notify_waiters();
                    if more {
                        // Pass the wakeup on so another waiter sees the rest.
                        self.notify.notify_one();
                    }
                    return Ok(item);
                }
                if inner.closed {
                    return Err(QueueClosed);
                }
            }

            notified.await;
        }
    }

    /// Wait until fewer than `limit` items are queued.
    ///
    /// Returns immediately once the queue is closed, since nothing more will
    /// be accepted anyway.
    pub async fn wait_for_room(&self, limit: usize) {
        loop {
            let taken = self.taken.notified();
            tokio::pin!(taken);
            taken.as_mut().enable();

            {
                let inner = self.lock();
                if inner.closed || inner.items.len() < limit {
                    return;
                }
            }

            taken.await;
        }
    }

    /// Non-blocking check for queued items. Says nothing about close state.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Close the queue. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.notify.notify_waiters();
        self.taken.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Closes the queue when dropped, including on unwind.
///
/// Held by a queue's sole producer so consumers never wait on a queue whose
/// producer has stopped.
#[must_use = "the queue is closed as soon as the guard is dropped"]
pub struct CloseGuard<T> {
    queue: Arc<ClosableQueue<T>>,
}

impl<T> CloseGuard<T> {
    pub fn new(queue: Arc<ClosableQueue<T>>) -> Self {
        Self { queue }
    }
}

impl<T> Drop for CloseGuard<T> {
    fn drop(&mut self) {
        self.queue.close();
    }
}

impl<T> fmt::Debug for ClosableQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ClosableQueue")
            .field("len", &inner.items.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
