//! Sliding-window storage backends for the throughput governor.
//!
//! The same window-log algorithm runs against two stores: a shared MongoDB
//! collection so all service instances enforce one global limit per actor,
//! and an in-process map used when the shared store is unreachable. Both
//! prune expired timestamps on every check, and the shared documents carry a
//! TTL index so abandoned keys expire on their own.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use dashmap::DashMap;
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, IndexModel};
use uuid::Uuid;

use crate::types::LaurelError;

/// Collection name for shared rate windows
pub const RATE_WINDOW_COLLECTION: &str = "rate_windows";

/// Outcome of one check-and-record pass over a window
#[derive(Debug, Clone)]
pub struct WindowOutcome {
    /// Whether this call was admitted (its timestamp recorded)
    pub allowed: bool,
    /// Surviving entries in the window, including this call when admitted
    pub count: u32,
    /// Oldest surviving timestamp (unix millis), if any
    pub oldest_ms: Option<i64>,
}

/// One sliding-window log keyed by (actor, operation[, sub-key])
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Prune entries older than `now_ms - window`, then record `now_ms` iff
    /// fewer than `max` entries survive. Single logical step per call.
    async fn check_and_record(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now_ms: i64,
    ) -> Result<WindowOutcome, LaurelError>;
}

/// In-process window store. Used directly in tests and dev mode, and as the
/// automatic fallback when the shared store errors: approximate (per-process)
/// limits beat failing the caller.
#[derive(Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Vec<i64>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn check_and_record(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now_ms: i64,
    ) -> Result<WindowOutcome, LaurelError> {
        let cutoff = now_ms - window.as_millis() as i64;
        let mut entry = self.windows.entry(key.to_string()).or_default();

        entry.retain(|t| *t >= cutoff);
        let allowed = (entry.len() as u32) < max;
        if allowed {
            entry.push(now_ms);
        }

        Ok(WindowOutcome {
            allowed,
            count: entry.len() as u32,
            oldest_ms: entry.first().copied(),
        })
    }
}

/// Shared window store over MongoDB.
///
/// Each key maps to one document holding the surviving timestamps. Prune,
/// count, and conditional append happen in a single pipeline update so two
/// instances racing on the same key cannot both claim the last slot. Each
/// entry carries a unique marker; admission is decided by whether our marker
/// survived into the returned document.
pub struct MongoWindowStore {
    collection: Collection<Document>,
}

impl MongoWindowStore {
    /// Wrap the rate-window collection and ensure its TTL index
    pub async fn new(collection: Collection<Document>) -> Result<Self, LaurelError> {
        let ttl_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Duration::from_secs(0))
                    .name("rate_window_ttl".to_string())
                    .build(),
            )
            .build();

        collection
            .create_index(ttl_index)
            .await
            .map_err(|e| LaurelError::Database(format!("rate window index: {}", e)))?;

        Ok(Self { collection })
    }
}

#[async_trait]
impl WindowStore for MongoWindowStore {
    async fn check_and_record(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now_ms: i64,
    ) -> Result<WindowOutcome, LaurelError> {
        let cutoff = now_ms - window.as_millis() as i64;
        let marker = Uuid::new_v4().to_string();
        let expires_at =
            DateTime::from_millis(now_ms + window.as_millis() as i64);

        // Stage 1 drops expired entries; stage 2 appends ours only when a
        // slot is free and refreshes the TTL anchor.
        let pipeline = vec![
            doc! { "$set": {
                "stamps": { "$filter": {
                    "input": { "$ifNull": ["$stamps", []] },
                    "as": "s",
                    "cond": { "$gte": ["$$s.t", cutoff] },
                } },
            } },
            doc! { "$set": {
                "stamps": { "$cond": [
                    { "$lt": [{ "$size": "$stamps" }, max as i64] },
                    { "$concatArrays": ["$stamps", [{ "t": now_ms, "id": &marker }]] },
                    "$stamps",
                ] },
                "expires_at": expires_at,
            } },
        ];

        let updated = self
            .collection
            .find_one_and_update(doc! { "_id": key }, pipeline)
            .with_options(
                FindOneAndUpdateOptions::builder()
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(|e| LaurelError::Database(format!("rate window update: {}", e)))?
            .ok_or_else(|| LaurelError::Database("rate window upsert returned nothing".into()))?;

        let stamps = updated
            .get_array("stamps")
            .map_err(|e| LaurelError::Database(format!("rate window document: {}", e)))?;

        let mut allowed = false;
        let mut oldest_ms: Option<i64> = None;
        for stamp in stamps {
            if let Bson::Document(d) = stamp {
                if let Ok(t) = d.get_i64("t") {
                    oldest_ms = Some(oldest_ms.map_or(t, |o: i64| o.min(t)));
                }
                if d.get_str("id") == Ok(marker.as_str()) {
                    allowed = true;
                }
            }
        }

        Ok(WindowOutcome {
            allowed,
            count: stamps.len() as u32,
            oldest_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_window_admits_until_full() {
        let store = MemoryWindowStore::new();
        let window = Duration::from_secs(60);

        for i in 0..3 {
            let outcome = store
                .check_and_record("rl:a:award", window, 3, 1_000 + i)
                .await
                .unwrap();
            assert!(outcome.allowed, "call {} should be admitted", i);
        }

        let rejected = store
            .check_and_record("rl:a:award", window, 3, 1_010)
            .await
            .unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 3);
        assert_eq!(rejected.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_memory_window_prunes_expired() {
        let store = MemoryWindowStore::new();
        let window = Duration::from_secs(1);

        for i in 0..3 {
            store
                .check_and_record("k", window, 3, 1_000 + i)
                .await
                .unwrap();
        }

        // 1.5s later all three have aged out
        let outcome = store.check_and_record("k", window, 3, 2_500).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.oldest_ms, Some(2_500));
    }

    #[tokio::test]
    async fn test_memory_window_keys_independent() {
        let store = MemoryWindowStore::new();
        let window = Duration::from_secs(60);

        for i in 0..2 {
            store
                .check_and_record("rl:a:award", window, 2, 1_000 + i)
                .await
                .unwrap();
        }

        let other = store
            .check_and_record("rl:b:award", window, 2, 1_005)
            .await
            .unwrap();
        assert!(other.allowed);
    }
}
