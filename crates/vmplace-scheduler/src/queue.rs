//! Blocking FIFO feeding the scheduling worker.
//!
//! Consumers wait asynchronously on a [`Notify`]; the item list itself sits
//! behind a short-lived `parking_lot` lock that is never held across an
//! await point.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    shutting_down: bool,
}

/// An unbounded FIFO queue with blocking dequeue and one-way shutdown.
///
/// Every added item is delivered to exactly one consumer, in insertion
/// order. After [`shut_down`](Self::shut_down) every blocked and future
/// [`get`](Self::get) returns `None` without waiting.
#[derive(Debug)]
pub struct SchedulingQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Default for SchedulingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SchedulingQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Append an item and wake one waiting consumer.
    ///
    /// # Errors
    ///
    /// Hands the item back if the queue has been shut down.
    pub fn add(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            // Register interest before checking, so an add between the
            // check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Stop the queue and wake every waiter. Pending items are dropped.
    ///
    /// Returns how many items were discarded. Calling it again is a no-op.
    pub fn shut_down(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return 0;
            }
            state.shutting_down = true;
            std::mem::take(&mut state.items)
        };
        self.notify.notify_waiters();
        discarded.len()
    }

    /// Check if the queue has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of items waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if no items are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_insertion_order() {
        let queue = SchedulingQueue::new();
        for item in ["a", "b", "c"] {
            queue.add(item).unwrap();
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert_eq!(queue.get().await, Some("c"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let queue = Arc::new(SchedulingQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.add(7).unwrap();
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn shutdown_wakes_every_waiter() {
        let queue: Arc<SchedulingQueue<u32>> = Arc::new(SchedulingQueue::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shut_down();

        for consumer in consumers {
            let result = tokio::time::timeout(Duration::from_secs(1), consumer)
                .await
                .expect("consumer still blocked after shutdown")
                .unwrap();
            assert_eq!(result, None);
        }

        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_rejects_adds() {
        let queue = SchedulingQueue::new();
        queue.add(1).unwrap();
        queue.add(2).unwrap();

        assert_eq!(queue.shut_down(), 2);
        assert_eq!(queue.shut_down(), 0);
        assert!(queue.is_shut_down());
        assert_eq!(queue.add(3), Err(3));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn each_item_goes_to_one_consumer() {
        let queue = Arc::new(SchedulingQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.get().await {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for item in 0..500 {
            queue.add(item).unwrap();
        }
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shut_down();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 500);
        assert_eq!(all.iter().collect::<HashSet<_>>().len(), 500);
    }
}
