use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::cache::{CacheError, SetCache};

const SCAN_BATCH: usize = 500;

/// Redis-backed set cache.
///
/// `ConnectionManager` multiplexes one reconnecting connection; clones share it.
#[derive(Clone)]
pub struct RedisSetCache {
    conn: ConnectionManager,
}

impl RedisSetCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::Connection(err.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Connection(err.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SetCache for RedisSetCache {
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|err| CacheError::command("SADD", err))?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(|err| CacheError::command("SREM", err))?;
        Ok(removed > 0)
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        conn.scard(key)
            .await
            .map_err(|err| CacheError::command("SCARD", err))
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        redis::cmd("SPOP")
            .arg(key)
            .arg(count)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(|err| CacheError::command("SPOP", err))
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        // SCAN instead of KEYS: incremental, does not block the server on large keyspaces.
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|err| CacheError::command("SCAN", err))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once while the keyspace is rehashing.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
