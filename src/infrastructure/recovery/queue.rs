//! Bounded multi-level recovery queue.
//!
//! One FIFO per priority level under a single lock, with one capacity bound
//! across all levels. Producers never block: a full queue hands the request
//! back so the caller can complete it as dropped.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::record::RecoveryRequest;
use crate::domain::RecoveryPriority;

pub(super) struct RecoveryQueue {
    levels: Mutex<[VecDeque<RecoveryRequest>; 4]>,
    capacity: usize,
    notify: Notify,
}

impl RecoveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Mutex::new(Default::default()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Enqueue without blocking. Returns the request if the queue is full.
    pub fn push(&self, request: RecoveryRequest) -> Result<(), RecoveryRequest> {
        {
            let mut levels = self.levels.lock();
            let len: usize = levels.iter().map(VecDeque::len).sum();
            if len >= self.capacity {
                return Err(request);
            }
            levels[request.priority.index()].push_back(request);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Highest priority first, FIFO within a level.
    pub fn try_pop(&self) -> Option<RecoveryRequest> {
        let mut levels = self.levels.lock();
        RecoveryPriority::DESCENDING
            .iter()
            .find_map(|priority| levels[priority.index()].pop_front())
    }

    /// Wait for the next request.
    pub async fn pop(&self) -> RecoveryRequest {
        loop {
            if let Some(request) = self.try_pop() {
                return request;
            }
            self.notify.notified().await;
        }
    }

    /// Remove every queued request.
    pub fn drain(&self) -> Vec<RecoveryRequest> {
        let mut levels = self.levels.lock();
        RecoveryPriority::DESCENDING
            .iter()
            .flat_map(|priority| std::mem::take(&mut levels[priority.index()]))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.levels.lock().iter().map(VecDeque::len).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionId, DisconnectCause};

    fn request(id: &str, priority: RecoveryPriority) -> RecoveryRequest {
        RecoveryRequest::new(ConnectionId::from(id), priority, DisconnectCause::HeartbeatTimeout, None)
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = RecoveryQueue::new(10);
        queue.push(request("low", RecoveryPriority::Low)).ok();
        queue.push(request("n1", RecoveryPriority::Normal)).ok();
        queue.push(request("crit", RecoveryPriority::Critical)).ok();
        queue.push(request("n2", RecoveryPriority::Normal)).ok();

        let order: Vec<String> = std::iter::from_fn(|| queue.try_pop())
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(order, vec!["crit", "n1", "n2", "low"]);
    }

    #[test]
    fn test_capacity_spans_levels() {
        let queue = RecoveryQueue::new(2);
        assert!(queue.push(request("a", RecoveryPriority::Low)).is_ok());
        assert!(queue.push(request("b", RecoveryPriority::Critical)).is_ok());

        let rejected = queue.push(request("c", RecoveryPriority::Critical)).unwrap_err();
        assert_eq!(rejected.id.as_str(), "c");
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(RecoveryQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.id })
        };
        tokio::task::yield_now().await;
        queue.push(request("late", RecoveryPriority::Normal)).ok();
        assert_eq!(waiter.await.unwrap().as_str(), "late");
    }

    #[test]
    fn test_drain_empties() {
        let queue = RecoveryQueue::new(4);
        queue.push(request("a", RecoveryPriority::Low)).ok();
        queue.push(request("b", RecoveryPriority::High)).ok();
        let drained: Vec<_> = queue.drain().into_iter().map(|r| r.id).collect();
        assert_eq!(drained, vec![ConnectionId::from("b"), ConnectionId::from("a")]);
        assert_eq!(queue.len(), 0);
    }
}
