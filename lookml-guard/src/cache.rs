//! Optional lookup of results from earlier runs.
//!
//! The cache is an injected collaborator, never ambient state: a run without
//! a cache behaves exactly like a run whose cache always misses.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::batcher::Batcher;
use crate::config::ValidatorConfig;
use crate::core::{Outcome, Scope, Unit};

/// Identity of a cached unit result: the unit plus a hash of everything that
/// influences its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The unit's namespace
    pub namespace: String,
    /// The unit name
    pub unit: String,
    /// Hex SHA-256 over the batched fields, the batch size and the settings
    /// that change how failures are reported
    pub content_hash: String,
}

impl CacheKey {
    /// Computes the key of `unit` as `batcher` would batch it under `config`.
    ///
    /// The hash covers the id, hidden flag and SQL of every eligible field in
    /// order, plus the batch size, since batch boundaries determine where
    /// unattributed failures are reported. Fail-fast and adaptive batching
    /// change which keys a unit's failures are recorded under, so they are
    /// hashed too.
    pub fn for_unit(unit: &Unit, batcher: &Batcher, config: &ValidatorConfig) -> Self {
        let mut hasher = Sha256::new();
        for field in batcher.eligible_fields(unit) {
            hasher.update(field.id.as_bytes());
            hasher.update([0u8, u8::from(field.hidden), 0u8]);
            if let Some(sql) = &field.sql {
                hasher.update(sql.as_bytes());
            }
            hasher.update(b"\n");
        }
        hasher.update(
            format!(
                "batch_size={};fail_fast={};adaptive={}",
                batcher.batch_size(),
                config.fail_fast(),
                config.adaptive_batching()
            )
            .as_bytes(),
        );
        Self {
            namespace: unit.id.namespace.clone(),
            unit: unit.id.unit.clone(),
            content_hash: hex::encode(hasher.finalize()),
        }
    }
}

/// Terminal outcomes of one fully resolved unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUnit {
    /// Entries of the unit, in key order
    pub entries: Vec<(Scope, Outcome)>,
}

/// Stores results of fully resolved units.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Returns the stored result for `key`, if any.
    async fn get(&self, key: &CacheKey) -> Option<CachedUnit>;

    /// Stores the result of a fully resolved unit.
    async fn put(&self, key: CacheKey, value: CachedUnit);
}

/// A process-local [`ResultCache`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryResultCache {
    entries: Arc<RwLock<HashMap<CacheKey, CachedUnit>>>,
}

impl InMemoryResultCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached units.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Option<CachedUnit> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: CacheKey, value: CachedUnit) {
        self.entries.write().await.insert(key, value);
    }
}
