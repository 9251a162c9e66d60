use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::{CacheError, SetCache};

/// In-process set cache with Redis set semantics: a set that becomes empty stops existing.
#[derive(Debug, Default)]
pub struct MemorySetCache {
    sets: DashMap<String, HashSet<String>>,
}

impl MemorySetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.sets.contains_key(key)
    }

    fn drop_if_empty(&self, key: &str) {
        self.sets.remove_if(key, |_, set| set.is_empty());
    }
}

#[async_trait]
impl SetCache for MemorySetCache {
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let removed = match self.sets.get_mut(key) {
            Some(mut set) => set.remove(member),
            None => false,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, CacheError> {
        Ok(self.sets.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
        let popped = match self.sets.get_mut(key) {
            Some(mut set) => {
                let taken: Vec<String> = set.iter().take(count).cloned().collect();
                for member in &taken {
                    set.remove(member);
                }
                taken
            }
            None => Vec::new(),
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .sets
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
