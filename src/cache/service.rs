//! Cache Service Module
//!
//! Typed get/set/delete operations against the remote store, batched
//! variants, pattern invalidation and a read-through combinator.
//!
//! Every operation is one network round trip (one batched trip for the
//! multi-key variants). Errors carry through to the caller so a genuine
//! miss (`Ok(None)`) stays distinguishable from an unreachable store; each
//! error is logged here with its operation and key before returning.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::ttl;
use crate::cache::MemoryCache;
use crate::client::{cmd, reply, StoreClient};
use crate::error::{Result, StateError};

// == Cached Result ==
/// Outcome of the read-through combinator: the value plus whether it came
/// from the cache, so callers can instrument hit rates.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    /// The cached or freshly computed value
    pub data: T,
    /// True on a cache hit, false when the value was just computed
    pub cached: bool,
}

// == Cache Write ==
/// One entry of a batched write, with its own optional TTL.
#[derive(Debug, Clone)]
pub struct CacheWrite<T> {
    /// Key to store under
    pub key: String,
    /// Value to serialize
    pub value: T,
    /// TTL in seconds, defaulting to [`ttl::MEDIUM`] when omitted
    pub ttl: Option<u64>,
}

// == Cache Service ==
/// Typed cache operations over the remote store.
///
/// Optionally fronted by an in-process [`MemoryCache`] for hot-path reads.
/// The memory cache is populated on writes only (where the TTL is known
/// exactly) and is never consulted for anything but plain `get`.
#[derive(Debug, Clone)]
pub struct CacheService {
    client: Arc<StoreClient>,
    memory: Option<Arc<MemoryCache>>,
}

impl CacheService {
    // == Constructor ==
    /// Creates a service without an in-process cache.
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self {
            client,
            memory: None,
        }
    }

    /// Creates a service fronted by the given in-process cache.
    ///
    /// The cache is injected rather than owned globally, so tests and
    /// callers control its lifetime and sharing.
    pub fn with_memory(client: Arc<StoreClient>, memory: Arc<MemoryCache>) -> Self {
        Self {
            client,
            memory: Some(memory),
        }
    }

    // == Get ==
    /// Fetches and deserializes a value.
    ///
    /// Returns `Ok(None)` on a miss; an expired key is a miss (the store
    /// enforces TTL). Store failures surface as `Err`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(memory) = &self.memory {
            if let Some(value) = memory.get(key) {
                match serde_json::from_value::<T>(value) {
                    Ok(data) => {
                        debug!(key, "memory cache hit");
                        return Ok(Some(data));
                    }
                    Err(err) => {
                        // Wrong type for this key; fall through to the store
                        debug!(key, error = %err, "memory cache entry not decodable");
                        memory.remove(key);
                    }
                }
            }
        }

        let result = self
            .client
            .execute(&cmd(&["GET", key]))
            .await
            .inspect_err(|err| warn!(operation = "get", key, error = %err, "cache read failed"))?;

        match result {
            Value::Null => Ok(None),
            Value::String(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            other => Err(StateError::Store(format!(
                "unexpected reply: wanted string, got {other}"
            ))),
        }
    }

    // == Set ==
    /// Serializes and stores a value with the given TTL in seconds.
    ///
    /// [`ttl::MEDIUM`] is the customary tier when nothing else fits.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.client
            .execute(&cmd(&["SET", key, &raw, "EX", &ttl_secs.to_string()]))
            .await
            .inspect_err(|err| warn!(operation = "set", key, error = %err, "cache write failed"))?;

        if let Some(memory) = &self.memory {
            if let Ok(value) = serde_json::from_str(&raw) {
                memory.put(key, value, ttl_secs);
            }
        }
        Ok(())
    }

    // == Delete ==
    /// Removes a key, returning whether it existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        if let Some(memory) = &self.memory {
            memory.remove(key);
        }

        let result = self
            .client
            .execute(&cmd(&["DEL", key]))
            .await
            .inspect_err(|err| warn!(operation = "del", key, error = %err, "cache delete failed"))?;
        Ok(reply::as_u64(&result)? > 0)
    }

    // == Exists ==
    /// Checks key existence without fetching the value.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let result = self.client.execute(&cmd(&["EXISTS", key])).await?;
        Ok(reply::as_u64(&result)? > 0)
    }

    // == Expire ==
    /// Re-applies a TTL to an existing key; false when the key is absent.
    ///
    /// Conservatively drops any in-process copy, whose deadline can no
    /// longer match the store's.
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        if let Some(memory) = &self.memory {
            memory.remove(key);
        }

        let result = self
            .client
            .execute(&cmd(&["EXPIRE", key, &ttl_secs.to_string()]))
            .await?;
        Ok(reply::as_u64(&result)? > 0)
    }

    // == TTL ==
    /// Remaining TTL in seconds: `-2` when the key is absent, `-1` when it
    /// has no expiry.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let result = self.client.execute(&cmd(&["TTL", key])).await?;
        reply::as_i64(&result)
    }

    // == Multi-Get ==
    /// Fetches several keys in one round trip.
    ///
    /// The output is aligned to the input order, `None` per miss.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut tokens = vec!["MGET".to_string()];
        tokens.extend(keys.iter().map(|k| k.to_string()));

        let result = self
            .client
            .execute(&tokens)
            .await
            .inspect_err(|err| warn!(operation = "mget", error = %err, "cache multi-read failed"))?;
        let items = result
            .as_array()
            .ok_or_else(|| StateError::Store(format!("unexpected reply: wanted array, got {result}")))?;

        items
            .iter()
            .map(|item| match item {
                Value::Null => Ok(None),
                Value::String(raw) => Ok(Some(serde_json::from_str(raw)?)),
                other => Err(StateError::Store(format!(
                    "unexpected reply: wanted string, got {other}"
                ))),
            })
            .collect()
    }

    // == Multi-Set ==
    /// Stores several entries in one pipelined round trip, each with its
    /// own TTL (defaulting to [`ttl::MEDIUM`]).
    pub async fn mset<T: Serialize>(&self, entries: &[CacheWrite<T>]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut commands = Vec::with_capacity(entries.len());
        for entry in entries {
            let raw = serde_json::to_string(&entry.value)?;
            let ttl_secs = entry.ttl.unwrap_or(ttl::MEDIUM);
            commands.push(cmd(&["SET", &entry.key, &raw, "EX", &ttl_secs.to_string()]));
        }

        let replies = self
            .client
            .pipeline(&commands)
            .await
            .inspect_err(|err| warn!(operation = "mset", error = %err, "cache multi-write failed"))?;
        for reply in replies {
            reply.into_result()?;
        }

        if let Some(memory) = &self.memory {
            for entry in entries {
                if let Ok(value) = serde_json::to_value(&entry.value) {
                    memory.put(&entry.key, value, entry.ttl.unwrap_or(ttl::MEDIUM));
                }
            }
        }
        Ok(())
    }

    // == Invalidate Pattern ==
    /// Deletes every key matching a glob pattern, returning the count.
    ///
    /// Runs a cursor-driven SCAN loop (never a blocking full-keyspace
    /// sweep), deleting each page of matches in a single DEL, until the
    /// cursor returns to the `"0"` sentinel.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let mut cursor = "0".to_string();
        let mut deleted = 0u64;

        loop {
            let result = self
                .client
                .execute(&cmd(&["SCAN", &cursor, "MATCH", pattern, "COUNT", "100"]))
                .await
                .inspect_err(
                    |err| warn!(operation = "invalidate", pattern, error = %err, "scan failed"),
                )?;

            let page = result.as_array().ok_or_else(|| {
                StateError::Store(format!("unexpected reply: wanted [cursor, keys], got {result}"))
            })?;
            let next_cursor = page
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| StateError::Store("unexpected reply: missing scan cursor".into()))?
                .to_string();
            let keys = page
                .get(1)
                .map(reply::as_string_array)
                .transpose()?
                .unwrap_or_default();

            if !keys.is_empty() {
                let mut tokens = vec!["DEL".to_string()];
                tokens.extend(keys.iter().cloned());
                let removed = self.client.execute(&tokens).await?;
                deleted += reply::as_u64(&removed)?;

                if let Some(memory) = &self.memory {
                    for key in &keys {
                        memory.remove(key);
                    }
                }
            }

            if next_cursor == "0" {
                break;
            }
            cursor = next_cursor;
        }

        debug!(pattern, deleted, "pattern invalidation complete");
        Ok(deleted)
    }

    // == Read-Through ==
    /// Read-through combinator: returns the cached value on a hit,
    /// otherwise computes it once, stores it best-effort and returns it.
    ///
    /// A store *read* failure degrades to a recompute rather than an
    /// error, and a store *write* failure is logged and swallowed; the
    /// caller still gets the computed value either way. Compute errors
    /// propagate unchanged.
    pub async fn cached<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        compute: F,
    ) -> std::result::Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(data)) => return Ok(Cached { data, cached: true }),
            Ok(None) => {}
            Err(err) => {
                warn!(operation = "cached", key, error = %err, "cache read failed; recomputing");
            }
        }

        let data = compute().await?;
        if let Err(err) = self.set(key, &data, ttl_secs).await {
            warn!(operation = "cached", key, error = %err, "failed to store computed value");
        }
        Ok(Cached {
            data,
            cached: false,
        })
    }
}
