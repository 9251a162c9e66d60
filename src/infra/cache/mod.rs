//! Cache backends for like sets.

mod memory;
mod redis_cache;

pub use memory::MemorySetCache;
pub use redis_cache::RedisSetCache;

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::SetCache;
use crate::config::CacheSettings;

use super::error::InfraError;

/// Build the cache named by the settings, falling back to the in-process cache.
pub async fn connect(settings: &CacheSettings) -> Result<Arc<dyn SetCache>, InfraError> {
    match settings.url.as_deref() {
        Some(url) => {
            let cache = RedisSetCache::connect(url).await?;
            info!(target = "cuplore::infra::cache", backend = "redis", "cache connected");
            Ok(Arc::new(cache))
        }
        None => {
            warn!(
                target = "cuplore::infra::cache",
                backend = "memory",
                "no cache url configured; like sets will not survive a restart"
            );
            Ok(Arc::new(MemorySetCache::new()))
        }
    }
}
