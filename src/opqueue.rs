pub use concurrent_queue::{ConcurrentQueue, PopError, PushError};

/// Cross-thread operation request queue.
///
/// Lock-free: any thread may `push` a request without blocking the worker.
/// Deliberately dumb: it does not bundle its own eventfd — the wake pulse
/// is conditional on the pusher's thread identity, so [`crate::port`] owns
/// the one shared [`WakeChannel`](crate::wake::WakeChannel) and signals it
/// itself after a push from a non-worker thread.
pub struct OpQueue<T> {
    queue: ConcurrentQueue<T>,
}

impl<T> OpQueue<T> {
    pub fn unbounded() -> OpQueue<T> {
        OpQueue {
            queue: ConcurrentQueue::unbounded(),
        }
    }

    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.queue.push(value)
    }

    pub fn pop(&self) -> Result<T, PopError> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn close(&self) -> bool {
        self.queue.close()
    }
}
