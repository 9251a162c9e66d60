//! Follow admission and dead-letter handling.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::application::jobs::{DeadLetter, DeadLetterQueue, EnqueueError, IngestQueue};
use crate::domain::entities::FollowTask;
use crate::domain::error::DomainError;
use crate::domain::types::UserId;

#[derive(Debug, Error)]
pub enum FollowError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub rejected: usize,
}

#[derive(Clone)]
pub struct FollowService {
    queue: IngestQueue,
    dead_letters: Arc<DeadLetterQueue>,
}

impl FollowService {
    pub fn new(queue: IngestQueue, dead_letters: Arc<DeadLetterQueue>) -> Self {
        Self {
            queue,
            dead_letters,
        }
    }

    /// Accept a follow for asynchronous persistence. Never waits for the
    /// store; a full queue is reported back immediately.
    pub fn follow(&self, follower: UserId, followed: UserId) -> Result<(), FollowError> {
        if follower == followed {
            return Err(
                DomainError::invalid("followed_id", "users cannot follow themselves").into(),
            );
        }

        self.queue.try_enqueue(FollowTask::new(follower, followed))?;
        Ok(())
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.snapshot()
    }

    /// Offer every dead letter to the ingest queue again. Entries the queue
    /// rejects stay in the dead-letter queue.
    pub fn replay_dead_letters(&self) -> ReplayReport {
        let mut report = ReplayReport::default();

        for letter in self.dead_letters.take_all() {
            let task = FollowTask::new(letter.task.follower_id, letter.task.followed_id);
            match self.queue.try_enqueue(task) {
                Ok(()) => report.replayed += 1,
                Err(_) => {
                    report.rejected += 1;
                    self.dead_letters.restore(letter);
                }
            }
        }

        info!(
            target = "cuplore::application::follows",
            replayed = report.replayed,
            rejected = report.rejected,
            "Dead letters replayed"
        );
        report
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
