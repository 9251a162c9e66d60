//! Bounded in-memory ingest queue for follow tasks.
//!
//! Producers never wait: a full queue rejects immediately so the request layer
//! can shed load. A single consumer owns the receiving half.

use std::num::NonZeroUsize;

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::domain::entities::FollowTask;

const METRIC_FOLLOW_QUEUE_LEN: &str = "cuplore_follow_queue_len";
const METRIC_FOLLOW_ACCEPTED_TOTAL: &str = "cuplore_follow_accepted_total";
const METRIC_FOLLOW_REJECTED_TOTAL: &str = "cuplore_follow_rejected_total";

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("follow queue is at capacity")]
    CapacityExceeded,
    #[error("follow queue is shutting down")]
    ShuttingDown,
}

impl EnqueueError {
    fn reason(self) -> &'static str {
        match self {
            Self::CapacityExceeded => "capacity",
            Self::ShuttingDown => "shutdown",
        }
    }
}

/// Create a queue holding at most `capacity` pending tasks.
pub fn ingest_channel(capacity: NonZeroUsize) -> (IngestQueue, IngestReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.get());
    (IngestQueue { sender }, IngestReceiver { receiver })
}

/// Producer handle. Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<FollowTask>,
}

impl IngestQueue {
    /// Offer a task without waiting. Rejection leaves the queue untouched.
    pub fn try_enqueue(&self, task: FollowTask) -> Result<(), EnqueueError> {
        let result = match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::CapacityExceeded),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::ShuttingDown),
        };

        match result {
            Ok(()) => {
                counter!(METRIC_FOLLOW_ACCEPTED_TOTAL).increment(1);
                gauge!(METRIC_FOLLOW_QUEUE_LEN).set(self.len() as f64);
            }
            Err(err) => {
                counter!(METRIC_FOLLOW_REJECTED_TOTAL, "reason" => err.reason()).increment(1);
                debug!(
                    target = "cuplore::jobs::ingest",
                    reason = err.reason(),
                    queue_len = self.len(),
                    "Follow task rejected"
                );
            }
        }

        result
    }

    /// Number of tasks currently waiting for the consumer.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// True once the consumer has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer half; owned by the consistency worker.
#[derive(Debug)]
pub struct IngestReceiver {
    receiver: mpsc::Receiver<FollowTask>,
}

impl IngestReceiver {
    /// Wait for the next task in FIFO order. `None` once closed and empty.
    pub async fn recv(&mut self) -> Option<FollowTask> {
        let task = self.receiver.recv().await;
        self.record_len();
        task
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<FollowTask> {
        use tokio::sync::mpsc::error::TryRecvError;

        match self.receiver.try_recv() {
            Ok(task) => {
                self.record_len();
                Some(task)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stop accepting new tasks; already queued tasks stay receivable.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn record_len(&self) {
        gauge!(METRIC_FOLLOW_QUEUE_LEN).set(self.receiver.len() as f64);
    }
}
