//! Retransmission timer queue.
//!
//! A thread-safe priority queue keyed on an absolute wall-clock deadline in
//! milliseconds. A worker owned by the queue sleeps until the nearest
//! deadline and hands each expired item back to the owner, sequentially,
//! through [`TimerTarget`]. The owner decides what expiry means; the stream
//! uses it to re-publish frames that are still unacknowledged.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Milliseconds since the UNIX epoch; the time base for queue priorities.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Receiver of expired queue items.
#[async_trait]
pub trait TimerTarget<T>: Send + Sync {
    /// Called once per expired item, in deadline order, from the queue's
    /// worker. Items whose purpose has lapsed should be dropped here.
    async fn expired(&self, item: T);
}

struct Entry<T> {
    priority: u64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct Shared<T> {
    heap: Mutex<BinaryHeap<Reverse<Entry<T>>>>,
    seq: AtomicU64,
    wake: Notify,
    halt: CancellationToken,
}

/// Priority timer queue with an internal expiry worker.
pub struct TimerQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> TimerQueue<T> {
    /// Create the queue and spawn its worker.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(target: Arc<dyn TimerTarget<T>>) -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            wake: Notify::new(),
            halt: CancellationToken::new(),
        });
        tokio::spawn(run(shared.clone(), target));
        Self { shared }
    }

    /// Schedule `item` to expire at `priority` (unix milliseconds).
    ///
    /// A priority in the past expires on the worker's next pass. Items
    /// pushed after [`halt`](Self::halt) are silently dropped.
    pub fn push(&self, priority: u64, item: T) {
        if self.shared.halt.is_cancelled() {
            return;
        }
        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.shared.heap.lock().push(Reverse(Entry {
            priority,
            seq,
            item,
        }));
        self.shared.wake.notify_one();
    }

    /// Number of scheduled items.
    pub fn len(&self) -> usize {
        self.shared.heap.lock().len()
    }

    /// True if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the worker. No callback fires after this returns; pending
    /// items are discarded.
    pub fn halt(&self) {
        self.shared.halt.cancel();
        self.shared.heap.lock().clear();
    }
}

impl<T> Drop for TimerQueue<T> {
    fn drop(&mut self) {
        self.shared.halt.cancel();
    }
}

async fn run<T: Send + 'static>(shared: Arc<Shared<T>>, target: Arc<dyn TimerTarget<T>>) {
    // Re-armed whenever the heap is empty; pushes wake the loop early.
    const IDLE_WAIT: Duration = Duration::from_secs(3600);

    loop {
        let now = unix_now_ms();
        let (due, next) = {
            let mut heap = shared.heap.lock();
            let mut due = Vec::new();
            while heap
                .peek()
                .is_some_and(|Reverse(entry)| entry.priority <= now)
            {
                if let Some(Reverse(entry)) = heap.pop() {
                    due.push(entry.item);
                }
            }
            let next = heap.peek().map(|Reverse(entry)| entry.priority);
            (due, next)
        };

        if !due.is_empty() {
            trace!(expired = due.len(), "timer queue expiry");
            for item in due {
                if shared.halt.is_cancelled() {
                    return;
                }
                target.expired(item).await;
            }
            continue;
        }

        let wait = next.map_or(IDLE_WAIT, |p| Duration::from_millis(p.saturating_sub(now)));
        tokio::select! {
            _ = shared.wake.notified() => {}
            _ = shared.halt.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collector {
        got: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl TimerTarget<u64> for Collector {
        async fn expired(&self, item: u64) {
            self.got.lock().push(item);
        }
    }

    fn collector() -> Arc<Collector> {
        Arc::new(Collector {
            got: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_expires_in_deadline_order() {
        let target = collector();
        let queue = TimerQueue::new(target.clone());

        let now = unix_now_ms();
        queue.push(now + 60, 3);
        queue.push(now + 20, 1);
        queue.push(now + 40, 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*target.got.lock(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_past_deadline_fires_promptly() {
        let target = collector();
        let queue = TimerQueue::new(target.clone());

        queue.push(unix_now_ms().saturating_sub(10), 7);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*target.got.lock(), vec![7]);
    }

    #[tokio::test]
    async fn test_halt_discards_pending() {
        let target = collector();
        let queue = TimerQueue::new(target.clone());

        queue.push(unix_now_ms() + 30, 1);
        queue.halt();
        queue.push(unix_now_ms() + 30, 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(target.got.lock().is_empty());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_while_sleeping_reschedules() {
        let target = collector();
        let queue = TimerQueue::new(target.clone());

        let now = unix_now_ms();
        queue.push(now + 500, 2);
        // A nearer deadline pushed afterwards must not wait on the far one.
        queue.push(now + 20, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*target.got.lock(), vec![1]);
        assert_eq!(queue.len(), 1);
    }
}
