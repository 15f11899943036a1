//! Bounded idle buffer.
//!
//! A fixed-capacity lock-free queue paired with a [`Notify`] so acquirers can
//! sleep until a connection is returned (or a slot is freed) instead of
//! polling.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Outcome of waiting on the idle buffer.
pub(crate) enum Wait<T> {
    /// An item was taken from the buffer.
    Ready(T),
    /// Woken without an item, or the queue was closed; the caller should
    /// re-check its own state.
    Woken,
    /// The deadline passed with the buffer still empty.
    TimedOut,
}

pub(crate) struct IdleQueue<T> {
    slots: ArrayQueue<T>,
    available: Notify,
    closed: AtomicBool,
}

impl<T> IdleQueue<T> {
    /// Capacity must be non-zero.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: ArrayQueue::new(capacity),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push without blocking. A full buffer hands the item back.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        self.slots.push(item)?;
        self.available.notify_one();
        Ok(())
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.slots.pop()
    }

    /// Take an item, sleeping until one is pushed, someone calls
    /// [`wake_one`](Self::wake_one), or `deadline` passes.
    pub(crate) async fn pop_or_wait(&self, deadline: Instant) -> Wait<T> {
        let mut notified = pin!(self.available.notified());
        // Register before checking so a push racing with the check is not missed.
        notified.as_mut().enable();

        if self.closed.load(Ordering::SeqCst) {
            return Wait::Woken;
        }
        if let Some(item) = self.slots.pop() {
            return Wait::Ready(item);
        }

        let woke = tokio::time::timeout_at(deadline, notified).await.is_ok();
        match self.slots.pop() {
            Some(item) => Wait::Ready(item),
            None if woke => Wait::Woken,
            None => Wait::TimedOut,
        }
    }

    /// Wake one waiter without pushing an item.
    pub(crate) fn wake_one(&self) {
        self.available.notify_one();
    }

    /// Stop parking waiters. Current and future waits return
    /// [`Wait::Woken`] immediately.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_waiters();
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.slots.pop()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
