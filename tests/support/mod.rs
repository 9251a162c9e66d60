//! In-memory fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use cuplore::application::repos::{
    CreateNoteParams, FollowInsert, FollowsWriteRepo, HealthRepo, NewFollow, NotesRepo,
    NotesWriteRepo, RepoError,
};
use cuplore::cache::{CacheError, SetCache};
use cuplore::domain::entities::NoteRecord;
use cuplore::domain::types::{NoteId, UserId};
use cuplore::infra::cache::MemorySetCache;

/// Relational store stand-in: follow edges in insertion order plus notes.
pub struct InMemoryStore {
    follows: Mutex<Vec<NewFollow>>,
    follow_failures: Mutex<VecDeque<RepoError>>,
    notes: Mutex<HashMap<i64, NoteRecord>>,
    failing_notes: Mutex<HashSet<i64>>,
    next_note_id: AtomicI64,
    healthy: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            follows: Mutex::default(),
            follow_failures: Mutex::default(),
            notes: Mutex::default(),
            failing_notes: Mutex::default(),
            next_note_id: AtomicI64::new(1),
            healthy: AtomicBool::new(true),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn follows(&self) -> Vec<(i64, i64)> {
        self.follows
            .lock()
            .await
            .iter()
            .map(|edge| (edge.follower_id.get(), edge.followed_id.get()))
            .collect()
    }

    /// Queue errors returned by the next `create_follow` calls, in order.
    pub async fn fail_next_follows(&self, errors: impl IntoIterator<Item = RepoError>) {
        self.follow_failures.lock().await.extend(errors);
    }

    pub async fn fail_like_count_updates(&self, note: NoteId) {
        self.failing_notes.lock().await.insert(note.get());
    }

    pub async fn like_count(&self, note: NoteId) -> Option<u64> {
        self.notes
            .lock()
            .await
            .get(&note.get())
            .map(|record| record.like_count)
    }

    pub async fn seed_note(&self, author: UserId, title: &str) -> NoteId {
        self.create_note(CreateNoteParams {
            author_id: author,
            title: title.to_string(),
            content: format!("{title} body"),
            img_url: None,
        })
        .await
        .expect("seed note")
        .id
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl FollowsWriteRepo for InMemoryStore {
    async fn create_follow(&self, follow: NewFollow) -> Result<FollowInsert, RepoError> {
        if let Some(err) = self.follow_failures.lock().await.pop_front() {
            return Err(err);
        }

        let mut follows = self.follows.lock().await;
        if follows.contains(&follow) {
            return Ok(FollowInsert::AlreadyExists);
        }
        follows.push(follow);
        Ok(FollowInsert::Created)
    }
}

#[async_trait]
impl NotesRepo for InMemoryStore {
    async fn find_note(&self, id: NoteId) -> Result<Option<NoteRecord>, RepoError> {
        Ok(self.notes.lock().await.get(&id.get()).cloned())
    }
}

#[async_trait]
impl NotesWriteRepo for InMemoryStore {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
        let id = self.next_note_id.fetch_add(1, Ordering::SeqCst);
        let now = OffsetDateTime::now_utc();
        let record = NoteRecord {
            id: NoteId::new(id).map_err(RepoError::from_persistence)?,
            author_id: params.author_id,
            title: params.title,
            content: params.content,
            img_url: params.img_url,
            like_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.notes.lock().await.insert(id, record.clone());
        Ok(record)
    }

    async fn update_like_count(&self, id: NoteId, count: u64) -> Result<(), RepoError> {
        if self.failing_notes.lock().await.contains(&id.get()) {
            return Err(RepoError::from_persistence("connection reset by peer"));
        }

        let mut notes = self.notes.lock().await;
        let record = notes.get_mut(&id.get()).ok_or(RepoError::NotFound)?;
        record.like_count = count;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl HealthRepo for InMemoryStore {
    async fn health_check(&self) -> Result<(), RepoError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepoError::Timeout)
        }
    }
}

/// In-process cache with switchable failures for writes and per-key reads.
#[derive(Default)]
pub struct FlakyCache {
    inner: MemorySetCache,
    fail_writes: AtomicBool,
    unreadable: Mutex<HashSet<String>>,
}

impl FlakyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The backing cache, bypassing any injected failure.
    pub fn inner(&self) -> &MemorySetCache {
        &self.inner
    }

    pub fn fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub async fn fail_reads_of(&self, key: &str) {
        self.unreadable.lock().await.insert(key.to_string());
    }

    fn check_write(&self, command: &'static str) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(CacheError::command(command, "connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SetCache for FlakyCache {
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.check_write("SADD")?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.check_write("SREM")?;
        self.inner.set_remove(key, member).await
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, CacheError> {
        if self.unreadable.lock().await.contains(key) {
            return Err(CacheError::command("SCARD", "read timed out"));
        }
        self.inner.set_cardinality(key).await
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
        self.inner.set_pop(key, count).await
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.inner.keys_by_prefix(prefix).await
    }
}

pub fn user(id: i64) -> UserId {
    UserId::new(id).expect("user id")
}
