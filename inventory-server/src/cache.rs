use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

const LIST_TTL_SECS: u64 = 300;
const SCAN_COUNT: usize = 100;

pub fn store_pattern(store_id: Uuid) -> String {
    format!("inventory:store:{}:*", store_id)
}

/// Pattern for list responses not scoped to any single store.
pub fn unscoped_pattern() -> &'static str {
    "inventory:store:all:*"
}

/// Redis-backed cache for list query responses. Every operation degrades to
/// "no caching" on failure; callers never fail a request because of it.
#[derive(Clone)]
pub struct ListCache {
    conn: Option<ConnectionManager>,
}

impl ListCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn: Some(conn) })
    }

    /// Cache handle that serves misses and drops writes. Used when Redis is
    /// unreachable at startup and in tests.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Cache read failed for {}: {}", key, err);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(err) = conn.set_ex::<_, _, ()>(key, value, LIST_TTL_SECS).await {
            warn!("Cache write failed for {}: {}", key, err);
        }
    }

    /// Removes every cached list response the mutation could have affected:
    /// keys scoped to the mutated store, then the store-unscoped lists.
    /// The sku id narrows nothing today since list keys are store-scoped,
    /// but it is part of the invalidation contract.
    pub async fn invalidate(&self, store_id: Uuid, _sku_id: Option<Uuid>) {
        let Some(conn) = self.conn.clone() else {
            return;
        };

        for pattern in [store_pattern(store_id), unscoped_pattern().to_string()] {
            match delete_matching(conn.clone(), &pattern).await {
                Ok(removed) if removed > 0 => {
                    debug!("Invalidated {} cache keys matching {}", removed, pattern);
                }
                Ok(_) => {}
                Err(err) => warn!("Cache invalidation failed for {}: {}", pattern, err),
            }
        }
    }
}

/// Cursor-based SCAN + DEL so the sweep never blocks the cache server.
async fn delete_matching(mut conn: ConnectionManager, pattern: &str) -> Result<u64> {
    let mut cursor: u64 = 0;
    let mut removed: u64 = 0;

    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(&mut conn)
            .await?;

        if !keys.is_empty() {
            removed += keys.len() as u64;
            let _: () = conn.del(keys).await?;
        }

        cursor = next;
        if cursor == 0 {
            break;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_pattern_scopes_to_one_store() {
        let store_id = Uuid::new_v4();
        let pattern = store_pattern(store_id);
        assert!(pattern.starts_with("inventory:store:"));
        assert!(pattern.contains(&store_id.to_string()));
        assert!(pattern.ends_with(":*"));
    }

    #[test]
    fn unscoped_pattern_misses_store_scoped_keys() {
        // "all" is a reserved store segment, so the two sweeps never overlap.
        let store_id = Uuid::new_v4();
        assert!(!store_pattern(store_id).starts_with(unscoped_pattern().trim_end_matches('*')));
    }

    #[tokio::test]
    async fn disabled_cache_serves_misses_and_swallows_writes() {
        let cache = ListCache::disabled();
        cache.put("inventory:store:all:page:1:size:20", "{}").await;
        assert!(cache.get("inventory:store:all:page:1:size:20").await.is_none());
        cache.invalidate(Uuid::new_v4(), None).await;
    }
}
