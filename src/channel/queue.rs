//! A bounded delivery queue that drops its oldest entry instead of blocking the producer.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

/// Per-subscription buffer of undelivered stream frames. A `tokio::sync::mpsc` channel applies
/// backpressure to the producer on a full queue; here the dispatcher is the producer and must
/// never block on a slow subscriber, so the oldest entry is dropped instead.
pub struct DeliveryQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> DeliveryQueue<T> {
    pub fn new(capacity: usize) -> Self {
        DeliveryQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push a new item, dropping the oldest buffered one if the queue is already at capacity.
    pub async fn push(&self, item: T) {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
    }

    /// Wait for and remove the oldest buffered item.
    pub async fn recv(&self) -> T {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let queue = DeliveryQueue::new(2);
        queue.push(1).await;
        queue.push(2).await;
        queue.push(3).await;
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.recv().await, 2);
        assert_eq!(queue.recv().await, 3);
    }

    #[tokio::test]
    async fn recv_waits_for_a_push() {
        let queue = Arc::new(DeliveryQueue::new(4));
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(42).await;
        assert_eq!(reader.await.unwrap(), 42);
    }
}
