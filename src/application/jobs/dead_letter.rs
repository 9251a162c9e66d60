//! Follow tasks that exhausted their persistence attempts.
//!
//! Entries stay in memory until replayed; the queue is bounded and evicts the
//! oldest entry when full.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::domain::entities::FollowTask;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "jobs::dead_letter";

const METRIC_FOLLOW_DEAD_LETTER_TOTAL: &str = "cuplore_follow_dead_letter_total";
const METRIC_FOLLOW_DEAD_LETTER_EVICTED_TOTAL: &str = "cuplore_follow_dead_letter_evicted_total";

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub task: FollowTask,
    pub attempts: u32,
    pub last_error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub failed_at: OffsetDateTime,
}

impl DeadLetter {
    pub fn new(task: FollowTask, attempts: u32, last_error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            attempts,
            last_error: last_error.into(),
            failed_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.get(),
        }
    }

    pub fn push(&self, letter: DeadLetter) {
        counter!(METRIC_FOLLOW_DEAD_LETTER_TOTAL).increment(1);
        self.insert(letter);
    }

    /// Put back an entry that failed to replay, without counting a new failure.
    pub(crate) fn restore(&self, letter: DeadLetter) {
        self.insert(letter);
    }

    fn insert(&self, letter: DeadLetter) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "insert");
        if entries.len() >= self.capacity
            && let Some(evicted) = entries.pop_front()
        {
            counter!(METRIC_FOLLOW_DEAD_LETTER_EVICTED_TOTAL).increment(1);
            warn!(
                target = "cuplore::jobs::dead_letter",
                evicted_id = %evicted.id,
                follower_id = %evicted.task.follower_id,
                followed_id = %evicted.task.followed_id,
                capacity = self.capacity,
                "Dead-letter queue full; evicting oldest entry"
            );
        }
        entries.push_back(letter);
    }

    /// Copy of all entries, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        mutex_lock(&self.entries, SOURCE, "snapshot")
            .iter()
            .cloned()
            .collect()
    }

    /// Remove and return all entries, oldest first.
    pub fn take_all(&self) -> Vec<DeadLetter> {
        mutex_lock(&self.entries, SOURCE, "take_all")
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;

    fn letter(followed: i64) -> DeadLetter {
        let task = FollowTask::new(
            UserId::new(1).expect("follower"),
            UserId::new(followed).expect("followed"),
        );
        DeadLetter::new(task, 3, "persistence error: connection reset")
    }

    #[test]
    fn keeps_insertion_order() {
        let queue = DeadLetterQueue::new(NonZeroUsize::new(4).expect("non-zero"));
        queue.push(letter(2));
        queue.push(letter(3));

        let followed: Vec<i64> = queue
            .snapshot()
            .iter()
            .map(|entry| entry.task.followed_id.get())
            .collect();
        assert_eq!(followed, vec![2, 3]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let queue = DeadLetterQueue::new(NonZeroUsize::new(2).expect("non-zero"));
        queue.push(letter(2));
        queue.push(letter(3));
        queue.push(letter(4));

        let followed: Vec<i64> = queue
            .take_all()
            .iter()
            .map(|entry| entry.task.followed_id.get())
            .collect();
        assert_eq!(followed, vec![3, 4]);
        assert!(queue.is_empty());
    }
}
