//! Thread-safe bounded FIFO handoff between pipeline stages.
//!
//! One queue instance carries one element kind (packets for one stream, or
//! decoded frames). Producers enqueue without blocking: a full queue is a
//! caller-visible refusal, not a hidden wait. Consumers may block until
//! data arrives, the stream is marked finished, or the queue is explicitly
//! blocked to pause a stage.
//!
//! The `finished` and `blocked` flags live under the same mutex as the
//! node chain, so a producer closing the stream can never race a consumer
//! checking emptiness.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::chain::NodeChain;
use crate::element::Element;

/// How a consumer waits when the queue is momentarily empty.
#[derive(Clone, Copy, Debug)]
pub enum DequeueMode {
    /// Wait until data arrives, the queue finishes, or it is blocked.
    Blocking,
    /// Return immediately.
    NonBlocking,
    /// Wait at most this long; bounded so teardown never hangs.
    Deadline(Duration),
}

/// Returned by [`BlockingQueue::enqueue`] when the element is refused,
/// handing ownership back to the caller.
///
/// A queue refuses when it is at capacity or already finished.
#[derive(Debug)]
pub struct QueueFull<T>(pub T);

impl<T> From<QueueFull<T>> for crate::Error {
    fn from(_: QueueFull<T>) -> Self {
        crate::Error::ResourceExhausted
    }
}

struct QueueInner<T> {
    chain: NodeChain<T>,
    bytes: usize,
    finished: bool,
    blocked: bool,
}

/// Bounded FIFO with blocking dequeue and explicit end-of-stream signaling.
pub struct BlockingQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
    capacity: usize,
}

impl<T: Element> BlockingQueue<T> {
    /// Create a queue holding at most `capacity` elements (minimum 1).
    pub fn new(capacity: usize) -> Self {
        BlockingQueue {
            inner: Mutex::new(QueueInner {
                chain: NodeChain::new(),
                bytes: 0,
                finished: false,
                blocked: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an element, waking one waiting consumer.
    ///
    /// Refuses (returning the element) when the queue is at capacity or
    /// finished. Backpressure is the caller's decision; see
    /// [`BlockingQueue::wait_not_full`].
    pub fn enqueue(&self, elem: T) -> Result<(), QueueFull<T>> {
        let mut q = self.inner.lock().unwrap();
        if q.finished || q.chain.len() >= self.capacity {
            return Err(QueueFull(elem));
        }
        q.bytes += elem.size_bytes();
        q.chain.push_back(elem);
        drop(q);
        self.cv.notify_one();
        Ok(())
    }

    /// Remove the front element.
    ///
    /// Returns `None` when no element can be produced: the queue is
    /// blocked (which takes priority over available data; a forced pause
    /// must not keep delivering), or it is empty and finished, or the wait
    /// mode ran out. The wait releases and reacquires the lock atomically
    /// and always rechecks the chain rather than trusting a wake-up.
    pub fn dequeue(&self, mode: DequeueMode) -> Option<T> {
        let deadline = match mode {
            DequeueMode::Deadline(d) => Some(Instant::now() + d),
            _ => None,
        };
        let mut q = self.inner.lock().unwrap();
        loop {
            if q.blocked {
                return None;
            }
            if let Some(elem) = q.chain.pop_front() {
                q.bytes -= elem.size_bytes();
                drop(q);
                self.cv.notify_all();
                return Some(elem);
            }
            if q.finished {
                return None;
            }
            match mode {
                DequeueMode::NonBlocking => return None,
                DequeueMode::Blocking => {
                    q = self.cv.wait(q).unwrap();
                }
                DequeueMode::Deadline(_) => {
                    let deadline = deadline.unwrap();
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self.cv.wait_timeout(q, deadline - now).unwrap();
                    q = guard;
                }
            }
        }
    }

    /// Force subsequent dequeues to return `None` without waiting, even if
    /// data is available. Used to pause a stage without tearing it down.
    pub fn set_blocked(&self, blocked: bool) {
        let mut q = self.inner.lock().unwrap();
        q.blocked = blocked;
        drop(q);
        self.cv.notify_all();
    }

    /// Mark the stream finished: no producer will enqueue again, and an
    /// empty-queue dequeue returns `None` instead of waiting forever.
    ///
    /// Idempotent; calling it twice observes like calling it once.
    pub fn finish(&self) {
        let mut q = self.inner.lock().unwrap();
        q.finished = true;
        drop(q);
        self.cv.notify_all();
    }

    /// Drain and drop every queued element. The queue remains usable for
    /// its flags; `Drop` also releases any remaining nodes.
    pub fn clear(&self) {
        let mut q = self.inner.lock().unwrap();
        while q.chain.pop_front().is_some() {}
        q.bytes = 0;
        drop(q);
        self.cv.notify_all();
    }

    /// Wait until an enqueue would be accepted.
    ///
    /// Returns `false` if the queue finished or the timeout elapsed first.
    pub fn wait_not_full(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut q = self.inner.lock().unwrap();
        loop {
            if q.finished {
                return false;
            }
            if q.chain.len() < self.capacity {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(q, deadline - now).unwrap();
            q = guard;
        }
    }

    /// Wait while the queue is blocked (paused).
    ///
    /// Returns `true` once unblocked, `false` on timeout.
    pub fn wait_unblocked(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut q = self.inner.lock().unwrap();
        loop {
            if !q.blocked {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(q, deadline - now).unwrap();
            q = guard;
        }
    }

    /// Wait until the queue is finished *and* drained.
    ///
    /// Teardown helper; bounded so shutdown cannot hang on a stuck
    /// consumer.
    pub fn wait_finished_and_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut q = self.inner.lock().unwrap();
        loop {
            if q.finished && q.chain.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(q, deadline - now).unwrap();
            q = guard;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().chain.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().unwrap().chain.len() >= self.capacity
    }

    /// Sum of `size_bytes` over the currently queued elements.
    pub fn byte_len(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn is_blocked(&self) -> bool {
        self.inner.lock().unwrap().blocked
    }
}
