//! Consistency worker: drains the follow ingest queue into the relational store.
//!
//! One worker per process. Tasks are persisted in the order they were
//! accepted; a task is retried in place before the next one is taken, so a
//! transient outage delays the queue instead of reordering it.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::repos::{FollowInsert, FollowsWriteRepo, NewFollow, RepoError};
use crate::config::IngestSettings;
use crate::domain::entities::FollowTask;

use super::dead_letter::{DeadLetter, DeadLetterQueue};
use super::ingest::IngestReceiver;

const METRIC_FOLLOW_PERSISTED_TOTAL: &str = "cuplore_follow_persisted_total";
const METRIC_FOLLOW_RETRY_TOTAL: &str = "cuplore_follow_retry_total";
const METRIC_FOLLOW_PERSIST_LAG_MS: &str = "cuplore_follow_persist_lag_ms";

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}

impl From<&IngestSettings> for RetryPolicy {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: settings.retry_backoff,
        }
    }
}

/// Counters describing one worker lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub persisted: u64,
    pub duplicates: u64,
    pub dead_lettered: u64,
    /// Tasks accepted but neither persisted nor dead-lettered when the drain
    /// deadline passed.
    pub abandoned: u64,
}

impl WorkerReport {
    fn handled(&self) -> u64 {
        self.persisted + self.duplicates + self.dead_lettered
    }
}

pub struct ConsistencyWorker {
    receiver: IngestReceiver,
    follows: Arc<dyn FollowsWriteRepo>,
    dead_letters: Arc<DeadLetterQueue>,
    policy: RetryPolicy,
    drain_timeout: Duration,
}

impl ConsistencyWorker {
    pub fn new(
        receiver: IngestReceiver,
        follows: Arc<dyn FollowsWriteRepo>,
        dead_letters: Arc<DeadLetterQueue>,
        policy: RetryPolicy,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            follows,
            dead_letters,
            policy,
            drain_timeout,
        }
    }

    /// Consume until `shutdown` fires, then close the queue and drain what is
    /// left within the drain timeout.
    pub async fn run(mut self, shutdown: CancellationToken) -> WorkerReport {
        let mut report = WorkerReport::default();
        info!(
            target = "cuplore::jobs::consistency",
            max_attempts = self.policy.max_attempts.get(),
            "Consistency worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                task = self.receiver.recv() => match task {
                    Some(task) => self.deliver(task, &mut report).await,
                    None => {
                        info!(
                            target = "cuplore::jobs::consistency",
                            "All producers dropped; consistency worker exiting"
                        );
                        return report;
                    }
                },
            }
        }

        self.receiver.close();
        let pending = self.receiver.len();
        info!(
            target = "cuplore::jobs::consistency",
            pending,
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "Draining follow queue before shutdown"
        );

        let handled_before = report.handled();
        let deadline = Instant::now() + self.drain_timeout;
        if timeout_at(deadline, self.drain(&mut report)).await.is_err() {
            let handled = report.handled() - handled_before;
            report.abandoned = (pending as u64).saturating_sub(handled);
            warn!(
                target = "cuplore::jobs::consistency",
                abandoned = report.abandoned,
                "Drain timeout elapsed; remaining follow tasks abandoned"
            );
        }

        info!(
            target = "cuplore::jobs::consistency",
            persisted = report.persisted,
            duplicates = report.duplicates,
            dead_lettered = report.dead_lettered,
            abandoned = report.abandoned,
            "Consistency worker stopped"
        );
        report
    }

    async fn drain(&mut self, report: &mut WorkerReport) {
        while let Some(task) = self.receiver.recv().await {
            self.deliver(task, report).await;
        }
    }

    async fn deliver(&self, task: FollowTask, report: &mut WorkerReport) {
        let follow = NewFollow {
            follower_id: task.follower_id,
            followed_id: task.followed_id,
        };
        let max_attempts = self.policy.max_attempts.get();
        let mut attempt = 1;

        loop {
            match self.follows.create_follow(follow).await {
                Ok(outcome) => {
                    record_persisted(&task, outcome, attempt);
                    match outcome {
                        FollowInsert::Created => report.persisted += 1,
                        FollowInsert::AlreadyExists => report.duplicates += 1,
                    }
                    return;
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    counter!(METRIC_FOLLOW_RETRY_TOTAL).increment(1);
                    warn!(
                        target = "cuplore::jobs::consistency",
                        follower_id = %task.follower_id,
                        followed_id = %task.followed_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Follow persistence failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.dead_letter(task, attempt, err);
                    report.dead_lettered += 1;
                    return;
                }
            }
        }
    }

    fn dead_letter(&self, task: FollowTask, attempts: u32, err: RepoError) {
        error!(
            target = "cuplore::jobs::consistency",
            follower_id = %task.follower_id,
            followed_id = %task.followed_id,
            attempts,
            transient = err.is_transient(),
            error = %err,
            "Follow task moved to dead-letter queue"
        );
        self.dead_letters
            .push(DeadLetter::new(task, attempts, err.to_string()));
    }
}

fn record_persisted(task: &FollowTask, outcome: FollowInsert, attempts: u32) {
    let label = match outcome {
        FollowInsert::Created => "created",
        FollowInsert::AlreadyExists => "duplicate",
    };
    counter!(METRIC_FOLLOW_PERSISTED_TOTAL, "outcome" => label).increment(1);

    let lag = OffsetDateTime::now_utc() - task.accepted_at;
    histogram!(METRIC_FOLLOW_PERSIST_LAG_MS).record(lag.as_seconds_f64().max(0.0) * 1000.0);

    debug!(
        target = "cuplore::jobs::consistency",
        follower_id = %task.follower_id,
        followed_id = %task.followed_id,
        outcome = label,
        attempts,
        "Follow persisted"
    );
}
