//! Priority task queue with a hard capacity bound
//!
//! Entries are ordered by priority band (highest first) and, within a band,
//! by admission sequence so equal-priority tasks are served FIFO. Capacity
//! counts both waiting entries and entries taken by a worker but not yet
//! released, so a full queue rejects admissions instead of growing.

use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::types::{TaskId, TaskPriority};

/// A task waiting for a worker
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: TaskId,
    pub priority: TaskPriority,
    /// Admission order, unique per queue
    pub sequence: u64,
    pub enqueued_at: Instant,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence first (FIFO)
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            order => order,
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Entries waiting for a worker
    pub depth: usize,
    /// Entries taken and not yet released
    pub in_flight: usize,
    pub capacity: usize,
    pub admitted_total: u64,
    pub rejected_total: u64,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    in_flight: usize,
    next_sequence: u64,
    admitted_total: u64,
    rejected_total: u64,
    closed: bool,
}

/// Shared priority queue the worker pool pulls from
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a task; fails fast when the queue is at capacity
    pub fn admit(&self, task_id: TaskId, priority: TaskPriority) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::internal("task queue is closed"));
            }
            if state.heap.len() + state.in_flight >= self.capacity {
                state.rejected_total += 1;
                return Err(Error::CapacityExceeded {
                    capacity: self.capacity,
                });
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.admitted_total += 1;
            state.heap.push(QueueEntry {
                task_id,
                priority,
                sequence,
                enqueued_at: Instant::now(),
            });
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next entry. Returns `None` once the queue is closed.
    ///
    /// The returned entry holds a capacity slot until [`TaskQueue::release`].
    pub async fn take(&self) -> Option<QueueEntry> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.heap.pop() {
                    state.in_flight += 1;
                    let more = !state.heap.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on to another idle worker
                        self.notify.notify_one();
                    }
                    return Some(entry);
                }
            }
            notified.await;
        }
    }

    /// Remove a waiting entry; false when it was not queued
    pub fn remove(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock();
        let before = state.heap.len();
        state.heap.retain(|entry| entry.task_id != task_id);
        state.heap.len() != before
    }

    /// Return the slot of a taken entry
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.state
            .lock()
            .heap
            .iter()
            .any(|entry| entry.task_id == task_id)
    }

    /// Current queued depth
    pub fn size(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Stop handing out entries and wake every waiting worker
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            depth: state.heap.len(),
            in_flight: state.in_flight,
            capacity: self.capacity,
            admitted_total: state.admitted_total,
            rejected_total: state.rejected_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn priority_from(n: u8) -> TaskPriority {
        match n % 4 {
            0 => TaskPriority::Low,
            1 => TaskPriority::Normal,
            2 => TaskPriority::High,
            _ => TaskPriority::Urgent,
        }
    }

    #[tokio::test]
    async fn test_fifo_within_band() {
        let queue = TaskQueue::new(10);
        let ids: Vec<TaskId> = (0..3).map(|_| TaskId::new()).collect();
        for id in &ids {
            queue.admit(*id, TaskPriority::Normal).unwrap();
        }

        for id in &ids {
            assert_eq!(queue.take().await.unwrap().task_id, *id);
        }
    }

    #[tokio::test]
    async fn test_higher_priority_first() {
        let queue = TaskQueue::new(10);
        let low = TaskId::new();
        let urgent = TaskId::new();
        queue.admit(low, TaskPriority::Low).unwrap();
        queue.admit(urgent, TaskPriority::Urgent).unwrap();

        assert_eq!(queue.take().await.unwrap().task_id, urgent);
        assert_eq!(queue.take().await.unwrap().task_id, low);
    }

    #[tokio::test]
    async fn test_capacity_counts_in_flight() {
        let queue = TaskQueue::new(2);
        queue.admit(TaskId::new(), TaskPriority::Normal).unwrap();
        queue.admit(TaskId::new(), TaskPriority::Normal).unwrap();

        let err = queue.admit(TaskId::new(), TaskPriority::Urgent).unwrap_err();
        assert!(err.is_capacity_exceeded());
        assert_eq!(queue.size(), 2);

        // Taking does not free the slot, releasing does
        queue.take().await.unwrap();
        assert!(queue.admit(TaskId::new(), TaskPriority::Normal).is_err());
        queue.release();
        queue.admit(TaskId::new(), TaskPriority::Normal).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.admitted_total, 3);
        assert_eq!(stats.rejected_total, 2);
    }

    #[test]
    fn test_remove() {
        let queue = TaskQueue::new(4);
        let id = TaskId::new();
        queue.admit(id, TaskPriority::High).unwrap();

        assert!(queue.contains(id));
        assert!(queue.remove(id));
        assert!(!queue.remove(id));
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_take_waits_for_admission() {
        let queue = Arc::new(TaskQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = TaskId::new();
        queue.admit(id, TaskPriority::Normal).unwrap();

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.task_id, id);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let queue = Arc::new(TaskQueue::new(4));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.take().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for waiter in waiters {
            assert!(waiter.await.unwrap().is_none());
        }
        assert!(queue.admit(TaskId::new(), TaskPriority::Normal).is_err());
    }

    proptest! {
        #[test]
        fn prop_dequeue_order(priorities in proptest::collection::vec(0u8..4, 1..64)) {
            let queue = TaskQueue::new(priorities.len());
            let admitted: Vec<(TaskId, TaskPriority)> = priorities
                .iter()
                .map(|p| (TaskId::new(), priority_from(*p)))
                .collect();
            for (id, priority) in &admitted {
                queue.admit(*id, *priority).unwrap();
            }

            let taken: Vec<QueueEntry> = tokio_test::block_on(async {
                let mut out = Vec::new();
                while queue.size() > 0 {
                    out.push(queue.take().await.unwrap());
                }
                out
            });

            // Expected: stable sort of admission order by priority descending
            let mut expected = admitted.clone();
            expected.sort_by(|a, b| b.1.cmp(&a.1));
            let expected_ids: Vec<TaskId> = expected.iter().map(|(id, _)| *id).collect();
            let taken_ids: Vec<TaskId> = taken.iter().map(|e| e.task_id).collect();
            prop_assert_eq!(taken_ids, expected_ids);
        }

        #[test]
        fn prop_admit_never_exceeds_capacity(capacity in 1usize..16, attempts in 0usize..32) {
            let queue = TaskQueue::new(capacity);
            let mut accepted = 0;
            for _ in 0..attempts {
                if queue.admit(TaskId::new(), TaskPriority::Normal).is_ok() {
                    accepted += 1;
                }
            }
            prop_assert_eq!(accepted, attempts.min(capacity));
            prop_assert_eq!(queue.size(), attempts.min(capacity));
        }
    }
}
