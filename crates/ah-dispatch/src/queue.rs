//! Bounded three-priority in-memory job queue.
//!
//! High is always served before medium, medium before low; within a
//! priority, FIFO. Capacity bounds the total across all three bands.
//! `close()` wakes every blocked popper (they observe `None`) and makes
//! further submissions fail.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use ah_common::JobPriority;

use crate::job::DispatchJob;
use crate::DispatchError;

/// Queue depth per priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub capacity: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

struct QueueInner {
    high: VecDeque<DispatchJob>,
    medium: VecDeque<DispatchJob>,
    low: VecDeque<DispatchJob>,
    closed: bool,
}

impl QueueInner {
    fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    fn take_next(&mut self) -> Option<DispatchJob> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                high: VecDeque::new(),
                medium: VecDeque::new(),
                low: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue a job. Fails with `QueueFull` at capacity and `ShuttingDown`
    /// after `close()`.
    pub fn submit(&self, job: DispatchJob) -> Result<(), DispatchError> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(DispatchError::ShuttingDown);
            }
            if inner.len() >= self.capacity {
                return Err(DispatchError::QueueFull {
                    capacity: self.capacity,
                });
            }
            match job.priority {
                JobPriority::High => inner.high.push_back(job),
                JobPriority::Medium => inner.medium.push_back(job),
                JobPriority::Low => inner.low.push_back(job),
            }
            self.update_gauges(&inner);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the next job, waiting while the queue is empty. Returns
    /// `None` once the queue is closed and drained of waiters.
    pub async fn pop(&self) -> Option<DispatchJob> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(job) = inner.take_next() {
                    self.update_gauges(&inner);
                    return Some(job);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<DispatchJob> {
        let mut inner = self.inner.lock();
        let job = inner.take_next();
        if job.is_some() {
            self.update_gauges(&inner);
        }
        job
    }

    /// Refuse new submissions and wake every blocked popper.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            high: inner.high.len(),
            medium: inner.medium.len(),
            low: inner.low.len(),
            capacity: self.capacity,
        }
    }

    fn update_gauges(&self, inner: &QueueInner) {
        metrics::gauge!("publishing_queue_size", "priority" => "high").set(inner.high.len() as f64);
        metrics::gauge!("publishing_queue_size", "priority" => "medium")
            .set(inner.medium.len() as f64);
        metrics::gauge!("publishing_queue_size", "priority" => "low").set(inner.low.len() as f64);
    }
}
