// libs/scheduling-cell/src/services/cache.rs
//
// TTL cache plumbing. The backend is injectable: Redis in production, an
// in-memory map in tests. Every cache failure in the read/write wrappers
// degrades to a miss or a no-op; caching never fails a request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{
    AvailabilityPage, AvailabilityQuery, BookedSlotOverlayEntry, SchedulingError,
};

const AVAILABILITY_KEY_PREFIX: &str = "availability";
const OVERLAY_KEY_PREFIX: &str = "overlay";

/// External TTL key-value store with pattern-based multi-key operations.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SchedulingError>;
    async fn set(&self, key: &str, value: &str, ttl: StdDuration) -> Result<(), SchedulingError>;
    async fn get_by_pattern(&self, pattern: &str) -> Result<Vec<String>, SchedulingError>;
    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), SchedulingError>;
}

// ==============================================================================
// REDIS BACKEND
// ==============================================================================

pub struct RedisCacheBackend {
    pool: Pool,
}

impl RedisCacheBackend {
    pub async fn new(redis_url: &str) -> Result<Self, SchedulingError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SchedulingError::Cache(format!("Failed to create Redis pool: {}", e)))?;

        // Verify connectivity up front so misconfiguration is visible at boot.
        let mut conn = pool
            .get()
            .await
            .map_err(|e| SchedulingError::Cache(format!("Failed to connect to Redis: {}", e)))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulingError::Cache(format!("Redis ping failed: {}", e)))?;

        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, SchedulingError> {
        self.pool
            .get()
            .await
            .map_err(|e| SchedulingError::Cache(format!("Redis connection error: {}", e)))
    }

    async fn scan_keys(
        &self,
        conn: &mut deadpool_redis::Connection,
        pattern: &str,
    ) -> Result<Vec<String>, SchedulingError> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(conn)
                .await
                .map_err(|e| SchedulingError::Cache(format!("Redis SCAN failed: {}", e)))?;

            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, SchedulingError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulingError::Cache(format!("Redis GET failed: {}", e)))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: StdDuration) -> Result<(), SchedulingError> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulingError::Cache(format!("Redis SETEX failed: {}", e)))?;
        Ok(())
    }

    async fn get_by_pattern(&self, pattern: &str) -> Result<Vec<String>, SchedulingError> {
        let mut conn = self.connection().await?;
        let keys = self.scan_keys(&mut conn, pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulingError::Cache(format!("Redis MGET failed: {}", e)))?;

        Ok(values.into_iter().flatten().collect())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), SchedulingError> {
        let mut conn = self.connection().await?;
        let keys = self.scan_keys(&mut conn, pattern).await?;
        if keys.is_empty() {
            return Ok(());
        }

        let _: () = redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| SchedulingError::Cache(format!("Redis DEL failed: {}", e)))?;
        Ok(())
    }
}

// ==============================================================================
// IN-MEMORY BACKEND
// ==============================================================================

/// Process-local backend used in tests and as a degraded fallback when Redis
/// is not configured. Expired entries are dropped lazily on read; patterns
/// support a single trailing `*`.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_matches(key: &str, pattern: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, SchedulingError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: StdDuration) -> Result<(), SchedulingError> {
        let expires_at = Utc::now()
            + Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(60));
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get_by_pattern(&self, pattern: &str) -> Result<Vec<String>, SchedulingError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);

        Ok(entries
            .iter()
            .filter(|(key, _)| Self::key_matches(key, pattern))
            .map(|(_, (value, _))| value.clone())
            .collect())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), SchedulingError> {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| !Self::key_matches(key, pattern));
        Ok(())
    }
}

// ==============================================================================
// AVAILABILITY CACHE
// ==============================================================================

/// TTL cache of fully filtered availability pages, keyed by a deterministic
/// hash of (scope, date range, pagination). Invalidated on booking mutations.
pub struct AvailabilityCache {
    backend: Arc<dyn CacheBackend>,
    ttl: StdDuration,
}

impl AvailabilityCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: StdDuration) -> Self {
        Self { backend, ttl }
    }

    fn cache_key(query: &AvailabilityQuery) -> String {
        let scope_key = query.scope().scope_key();
        // Every identity dimension participates in the hash: two queries
        // sharing a provider can still filter differently on resource or
        // patient, so the scope key alone is not enough.
        let canonical = format!(
            "{}|{}|{}|{}|{}|{}|{:?}|{:?}",
            query.from_date,
            query.to_date,
            query.provider_id.map(|id| id.to_string()).unwrap_or_default(),
            query.resource_id.map(|id| id.to_string()).unwrap_or_default(),
            query.patient_id.map(|id| id.to_string()).unwrap_or_default(),
            query.practice_id.map(|id| id.to_string()).unwrap_or_default(),
            query.limit,
            query.offset,
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let short: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();

        format!("{}:{}:{}", AVAILABILITY_KEY_PREFIX, scope_key, short)
    }

    pub async fn get(&self, query: &AvailabilityQuery) -> Option<AvailabilityPage> {
        let key = Self::cache_key(query);
        match self.backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(page) => {
                    debug!("Availability cache hit for {}", key);
                    Some(page)
                }
                Err(e) => {
                    warn!("Discarding unparsable availability cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Availability cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub async fn set(&self, query: &AvailabilityQuery, page: &AvailabilityPage) {
        let key = Self::cache_key(query);
        let raw = match serde_json::to_string(page) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize availability page for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.backend.set(&key, &raw, self.ttl).await {
            warn!("Availability cache write failed, skipping: {}", e);
        }
    }

    /// Invalidate cached pages for a scope after a booking mutation. When the
    /// scope cannot be determined, everything is dropped rather than risking
    /// stale availability.
    pub async fn invalidate(&self, scope_key: Option<&str>) {
        let pattern = match scope_key {
            Some(scope) => format!("{}:{}:*", AVAILABILITY_KEY_PREFIX, scope),
            None => format!("{}:*", AVAILABILITY_KEY_PREFIX),
        };

        if let Err(e) = self.backend.delete_by_pattern(&pattern).await {
            warn!("Availability cache invalidation failed for {}: {}", pattern, e);
        }
    }
}

// ==============================================================================
// BOOKING OVERLAY CACHE
// ==============================================================================

/// Short-TTL record of just-confirmed bookings. Bridges the gap until the
/// practice-management system makes its own write visible to reads; once the
/// TTL elapses the entry is redundant and self-expires.
pub struct BookingOverlayCache {
    backend: Arc<dyn CacheBackend>,
    ttl: StdDuration,
}

impl BookingOverlayCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: StdDuration) -> Self {
        Self { backend, ttl }
    }

    pub async fn put(&self, scope_key: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        let entry = BookedSlotOverlayEntry {
            scope_key: scope_key.to_string(),
            start_time: start,
            end_time: end,
            expires_at: Utc::now()
                + Duration::from_std(self.ttl).unwrap_or_else(|_| Duration::seconds(300)),
        };

        let key = format!("{}:{}:{}", OVERLAY_KEY_PREFIX, scope_key, start.timestamp());
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize overlay entry for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.backend.set(&key, &raw, self.ttl).await {
            warn!("Overlay write failed for {}: {}", key, e);
        }
    }

    /// All non-expired overlay entries for a scope. Entries past their
    /// embedded expiry are dropped even if the backend has not reaped them.
    pub async fn get_all(&self, scope_key: &str) -> Vec<BookedSlotOverlayEntry> {
        let pattern = format!("{}:{}:*", OVERLAY_KEY_PREFIX, scope_key);
        let now = Utc::now();

        match self.backend.get_by_pattern(&pattern).await {
            Ok(raw_entries) => raw_entries
                .into_iter()
                .filter_map(|raw| serde_json::from_str::<BookedSlotOverlayEntry>(&raw).ok())
                .filter(|entry| !entry.is_expired(now))
                .collect(),
            Err(e) => {
                warn!("Overlay read failed for {}, assuming none: {}", pattern, e);
                Vec::new()
            }
        }
    }
}
