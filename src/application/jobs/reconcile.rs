//! Periodic reconciliation of like sets into the denormalized note counters.
//!
//! The cache is authoritative for likes. Each pass reads set cardinalities and
//! overwrites `notes.like_count`; a failure on one note never aborts the pass.
//! A set that loses its last member disappears from the cache, so notes
//! touched by a toggle are also recorded in a dirty set and revisited even
//! when their like set no longer exists.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::repos::{NotesWriteRepo, RepoError};
use crate::cache::{
    CacheError, DIRTY_LIKES_KEY, InvalidLikesKey, LIKES_PREFIX, SetCache, likes_key,
    note_from_likes_key,
};
use crate::config::ReconcileSettings;
use crate::domain::types::NoteId;

const METRIC_RECONCILE_UPDATED_TOTAL: &str = "cuplore_reconcile_updated_total";
const METRIC_RECONCILE_FAILED_TOTAL: &str = "cuplore_reconcile_failed_total";
const METRIC_RECONCILE_MS: &str = "cuplore_reconcile_ms";

#[derive(Debug, Clone, Copy)]
pub struct ReconcilePolicy {
    pub interval: Duration,
    pub full_scan_interval: Duration,
    pub dirty_tracking: bool,
    pub dirty_batch_size: usize,
}

impl From<&ReconcileSettings> for ReconcilePolicy {
    fn from(settings: &ReconcileSettings) -> Self {
        Self {
            interval: settings.interval,
            full_scan_interval: settings.full_scan_interval,
            dirty_tracking: settings.dirty_tracking,
            dirty_batch_size: settings.dirty_batch_size.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Notes examined.
    pub scanned: u64,
    /// Counters written.
    pub updated: u64,
    /// Notes skipped because a read or write failed.
    pub failed: u64,
}

impl ReconcileReport {
    fn merge(&mut self, other: ReconcileReport) {
        self.scanned += other.scanned;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Key(#[from] InvalidLikesKey),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Full,
    Dirty,
}

impl PassKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Dirty => "dirty",
        }
    }
}

pub struct LikeReconciler {
    cache: Arc<dyn SetCache>,
    notes: Arc<dyn NotesWriteRepo>,
    policy: ReconcilePolicy,
    last_full_scan: Option<Instant>,
}

impl LikeReconciler {
    pub fn new(
        cache: Arc<dyn SetCache>,
        notes: Arc<dyn NotesWriteRepo>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            cache,
            notes,
            policy,
            last_full_scan: None,
        }
    }

    /// Run passes on a fixed interval until `shutdown` fires. An in-flight
    /// pass always completes; the first tick fires one interval after start.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let period = self.policy.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target = "cuplore::jobs::reconcile",
            interval_secs = self.policy.interval.as_secs(),
            dirty_tracking = self.policy.dirty_tracking,
            "Like reconciler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(
            target = "cuplore::jobs::reconcile",
            "Like reconciler stopped"
        );
    }

    /// One scheduled pass: the dirty set every tick, plus a full scan when
    /// due. Without dirty tracking every tick is a full scan.
    pub async fn tick(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if self.policy.dirty_tracking {
            match self.reconcile_dirty().await {
                Ok(dirty) => report.merge(dirty),
                Err(err) => error!(
                    target = "cuplore::jobs::reconcile",
                    error = %err,
                    "Dirty like pass aborted"
                ),
            }
        }

        if self.full_scan_due() {
            match self.reconcile_all().await {
                Ok(full) => {
                    self.last_full_scan = Some(Instant::now());
                    report.merge(full);
                }
                Err(err) => error!(
                    target = "cuplore::jobs::reconcile",
                    error = %err,
                    "Full like scan aborted"
                ),
            }
        }

        report
    }

    fn full_scan_due(&self) -> bool {
        if !self.policy.dirty_tracking {
            return true;
        }
        match self.last_full_scan {
            None => true,
            Some(at) => at.elapsed() >= self.policy.full_scan_interval,
        }
    }

    /// Reconcile every like set present in the cache. Fails only when the
    /// key enumeration itself fails.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, CacheError> {
        let started_at = Instant::now();
        let keys = self.cache.keys_by_prefix(LIKES_PREFIX).await?;
        let mut report = ReconcileReport::default();

        for key in keys {
            report.scanned += 1;
            let outcome = match note_from_likes_key(&key) {
                Ok(note) => self.reconcile_note(note).await,
                Err(err) => Err(ReconcileError::from(err)),
            };
            match outcome {
                Ok(count) => {
                    report.updated += 1;
                    debug!(
                        target = "cuplore::jobs::reconcile",
                        key = %key,
                        count,
                        "Like count reconciled"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target = "cuplore::jobs::reconcile",
                        key = %key,
                        error = %err,
                        "Skipping like key"
                    );
                }
            }
        }

        finish_pass(PassKind::Full, report, started_at);
        Ok(report)
    }

    /// Reconcile notes recorded in the dirty set, popping them in batches.
    /// Notes whose write fails are marked dirty again for the next pass, even
    /// when a later pop aborts the pass.
    pub async fn reconcile_dirty(&self) -> Result<ReconcileReport, CacheError> {
        let started_at = Instant::now();
        let batch_size = self.policy.dirty_batch_size;
        let mut report = ReconcileReport::default();
        let mut retry_later = Vec::new();
        let mut aborted = None;

        loop {
            let batch = match self.cache.set_pop(DIRTY_LIKES_KEY, batch_size).await {
                Ok(batch) => batch,
                Err(err) => {
                    aborted = Some(err);
                    break;
                }
            };
            let popped = batch.len();

            for member in batch {
                report.scanned += 1;
                let note = match member.parse::<NoteId>() {
                    Ok(note) => note,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            target = "cuplore::jobs::reconcile",
                            member = %member,
                            error = %err,
                            "Dropping malformed dirty entry"
                        );
                        continue;
                    }
                };

                match self.reconcile_note(note).await {
                    Ok(_) => report.updated += 1,
                    Err(ReconcileError::Store(RepoError::NotFound)) => {
                        report.failed += 1;
                        warn!(
                            target = "cuplore::jobs::reconcile",
                            note_id = %note,
                            "Liked note does not exist; dropping dirty entry"
                        );
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            target = "cuplore::jobs::reconcile",
                            note_id = %note,
                            error = %err,
                            "Dirty note reconciliation failed; will retry"
                        );
                        retry_later.push(member);
                    }
                }
            }

            if popped < batch_size {
                break;
            }
        }

        for member in retry_later {
            if let Err(err) = self.cache.set_add(DIRTY_LIKES_KEY, &member).await {
                warn!(
                    target = "cuplore::jobs::reconcile",
                    member = %member,
                    error = %err,
                    "Failed to re-mark note dirty"
                );
            }
        }

        finish_pass(PassKind::Dirty, report, started_at);
        match aborted {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn reconcile_note(&self, note: NoteId) -> Result<u64, ReconcileError> {
        let count = self.cache.set_cardinality(&likes_key(note)).await?;
        self.notes.update_like_count(note, count).await?;
        Ok(count)
    }
}

fn finish_pass(kind: PassKind, report: ReconcileReport, started_at: Instant) {
    let pass = kind.as_str();
    counter!(METRIC_RECONCILE_UPDATED_TOTAL, "pass" => pass).increment(report.updated);
    counter!(METRIC_RECONCILE_FAILED_TOTAL, "pass" => pass).increment(report.failed);
    histogram!(METRIC_RECONCILE_MS, "pass" => pass)
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

    if report.scanned > 0 || kind == PassKind::Full {
        info!(
            target = "cuplore::jobs::reconcile",
            pass,
            scanned = report.scanned,
            updated = report.updated,
            failed = report.failed,
            "Like reconciliation pass complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::repos::CreateNoteParams;
    use crate::domain::entities::NoteRecord;
    use crate::infra::cache::MemorySetCache;

    #[derive(Default)]
    struct RecordingNotes {
        counts: Mutex<HashMap<i64, u64>>,
        missing: Vec<i64>,
    }

    impl RecordingNotes {
        fn count(&self, note: i64) -> Option<u64> {
            self.counts.lock().expect("counts lock").get(&note).copied()
        }
    }

    #[async_trait]
    impl NotesWriteRepo for RecordingNotes {
        async fn create_note(&self, _params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
            Err(RepoError::from_persistence("not supported"))
        }

        async fn update_like_count(&self, id: NoteId, count: u64) -> Result<(), RepoError> {
            if self.missing.contains(&id.get()) {
                return Err(RepoError::NotFound);
            }
            self.counts
                .lock()
                .expect("counts lock")
                .insert(id.get(), count);
            Ok(())
        }
    }

    /// Memory cache whose `set_pop` fails once the given call number is reached.
    struct PopFailsAt {
        inner: MemorySetCache,
        calls: AtomicUsize,
        fail_at: usize,
    }

    #[async_trait]
    impl SetCache for PopFailsAt {
        async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
            self.inner.set_add(key, member).await
        }

        async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
            self.inner.set_remove(key, member).await
        }

        async fn set_cardinality(&self, key: &str) -> Result<u64, CacheError> {
            self.inner.set_cardinality(key).await
        }

        async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_at {
                return Err(CacheError::command("SPOP", "connection reset"));
            }
            self.inner.set_pop(key, count).await
        }

        async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
            self.inner.keys_by_prefix(prefix).await
        }
    }

    #[derive(Default)]
    struct FailingWrites;

    #[async_trait]
    impl NotesWriteRepo for FailingWrites {
        async fn create_note(&self, _params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
            Err(RepoError::from_persistence("not supported"))
        }

        async fn update_like_count(&self, _id: NoteId, _count: u64) -> Result<(), RepoError> {
            Err(RepoError::Timeout)
        }
    }

    fn policy(dirty_tracking: bool) -> ReconcilePolicy {
        ReconcilePolicy {
            interval: Duration::from_secs(60),
            full_scan_interval: Duration::from_secs(600),
            dirty_tracking,
            dirty_batch_size: 2,
        }
    }

    fn note(id: i64) -> NoteId {
        NoteId::new(id).expect("note id")
    }

    #[tokio::test]
    async fn full_scan_writes_cardinalities_and_skips_bad_keys() {
        let cache = Arc::new(MemorySetCache::new());
        cache.set_add(&likes_key(note(1)), "10").await.expect("add");
        cache.set_add(&likes_key(note(1)), "11").await.expect("add");
        cache.set_add(&likes_key(note(2)), "10").await.expect("add");
        cache.set_add("likes:garbage", "10").await.expect("add");
        let notes = Arc::new(RecordingNotes::default());

        let reconciler = LikeReconciler::new(cache, notes.clone(), policy(false));
        let report = reconciler.reconcile_all().await.expect("pass");

        assert_eq!(
            report,
            ReconcileReport {
                scanned: 3,
                updated: 2,
                failed: 1
            }
        );
        assert_eq!(notes.count(1), Some(2));
        assert_eq!(notes.count(2), Some(1));
    }

    #[tokio::test]
    async fn dirty_pass_zeroes_notes_whose_set_vanished() {
        let cache = Arc::new(MemorySetCache::new());
        for id in 1..=5 {
            cache
                .set_add(DIRTY_LIKES_KEY, &id.to_string())
                .await
                .expect("mark dirty");
        }
        cache.set_add(&likes_key(note(3)), "7").await.expect("add");
        let notes = Arc::new(RecordingNotes::default());

        let reconciler = LikeReconciler::new(cache.clone(), notes.clone(), policy(true));
        let report = reconciler.reconcile_dirty().await.expect("pass");

        assert_eq!(report.scanned, 5);
        assert_eq!(report.updated, 5);
        assert_eq!(notes.count(1), Some(0));
        assert_eq!(notes.count(3), Some(1));
        assert!(!cache.contains_key(DIRTY_LIKES_KEY));
    }

    #[tokio::test]
    async fn dirty_pass_drops_missing_notes() {
        let cache = Arc::new(MemorySetCache::new());
        cache.set_add(DIRTY_LIKES_KEY, "9").await.expect("mark dirty");
        let notes = Arc::new(RecordingNotes {
            missing: vec![9],
            ..Default::default()
        });

        let reconciler = LikeReconciler::new(cache.clone(), notes, policy(true));
        let report = reconciler.reconcile_dirty().await.expect("pass");

        assert_eq!(report.failed, 1);
        assert!(!cache.contains_key(DIRTY_LIKES_KEY));
    }

    #[tokio::test]
    async fn aborted_dirty_pass_keeps_failed_notes_marked() {
        let cache = Arc::new(PopFailsAt {
            inner: MemorySetCache::new(),
            calls: AtomicUsize::new(0),
            fail_at: 2,
        });
        cache.set_add(DIRTY_LIKES_KEY, "4").await.expect("mark dirty");
        let reconciler = LikeReconciler::new(
            cache.clone(),
            Arc::new(FailingWrites),
            ReconcilePolicy {
                dirty_batch_size: 1,
                ..policy(true)
            },
        );

        let result = reconciler.reconcile_dirty().await;

        assert!(matches!(result, Err(CacheError::Command { command: "SPOP", .. })));
        assert_eq!(
            cache.inner.set_pop(DIRTY_LIKES_KEY, 10).await.expect("pop"),
            vec!["4".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_runs_full_scan_then_waits_for_interval() {
        let cache = Arc::new(MemorySetCache::new());
        cache.set_add(&likes_key(note(1)), "10").await.expect("add");
        let notes = Arc::new(RecordingNotes::default());
        let mut reconciler = LikeReconciler::new(cache.clone(), notes.clone(), policy(true));

        let first = reconciler.tick().await;
        assert_eq!(first.updated, 1);

        let second = reconciler.tick().await;
        assert_eq!(second.scanned, 0);

        tokio::time::advance(Duration::from_secs(601)).await;
        let third = reconciler.tick().await;
        assert_eq!(third.updated, 1);
    }
}
