//! Notification Store Module
//!
//! A bounded, most-recent-first notification feed per user with read/unread
//! state, live fan-out via publish, and a rolling TTL refreshed on every
//! mutation.
//!
//! # Storage layout
//! Each user's feed is a hash at `notifications:{user}` keyed by
//! notification id, so marking one notification read is a single-field
//! write: two concurrent mark-read calls for different notifications touch
//! different fields and cannot discard each other. Ordering comes from a
//! per-user monotonic sequence (`notifications:{user}:seq`, atomically
//! INCR'd at store time) embedded in each record; reads sort by descending
//! sequence. The feed is capped: once it exceeds the limit, the
//! lowest-sequence entries are pruned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::{cmd, reply, StoreClient};
use crate::error::{Result, StateError};

// == Public Constants ==
/// Maximum notifications retained per user
pub const MAX_STORED: usize = 50;

/// Feed TTL, refreshed on every mutation
pub const FEED_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default page size for [`NotificationStore::list`]
pub const DEFAULT_LIST_LIMIT: usize = 20;

// == Notification Record ==
/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique id within the user's feed
    pub id: String,
    /// Notification category, e.g. "enrollment" or "payment"
    #[serde(rename = "type")]
    pub kind: String,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Optional structured payload for the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Whether the user has seen it
    pub read: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Per-user monotonic sequence; higher = newer
    pub seq: u64,
}

// == Notification Input ==
/// Caller-supplied fields for a new notification; the store fills in the
/// id (when absent), the unread flag, the timestamp and the sequence.
#[derive(Debug, Clone, Default)]
pub struct NotificationInput {
    /// Explicit id; generated when omitted
    pub id: Option<String>,
    /// Notification category
    pub kind: String,
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Optional structured payload
    pub data: Option<Value>,
}

impl NotificationInput {
    /// Creates an input with the three required fields.
    pub fn new(
        kind: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            data: None,
        }
    }
}

// == Notification Store ==
/// Per-user notification feeds over the remote store.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    client: Arc<StoreClient>,
    max_stored: usize,
    feed_ttl_secs: u64,
}

impl NotificationStore {
    // == Constructor ==
    /// Creates a store with the default cap and TTL.
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self::with_limits(client, MAX_STORED, FEED_TTL_SECS)
    }

    /// Creates a store with an explicit cap and TTL.
    ///
    /// # Arguments
    /// * `max_stored` - Feed cap; oldest entries beyond it are pruned
    /// * `feed_ttl_secs` - Feed TTL, refreshed on every mutation
    pub fn with_limits(client: Arc<StoreClient>, max_stored: usize, feed_ttl_secs: u64) -> Self {
        Self {
            client,
            max_stored: max_stored.max(1),
            feed_ttl_secs,
        }
    }

    fn feed_key(user_id: &str) -> String {
        format!("notifications:{user_id}")
    }

    fn seq_key(user_id: &str) -> String {
        format!("notifications:{user_id}:seq")
    }

    fn channel(user_id: &str) -> String {
        format!("notifications:{user_id}:events")
    }

    // == Store ==
    /// Appends a notification to the user's feed and fans it out to live
    /// listeners.
    ///
    /// The write itself is one pipelined batch (set field, read length,
    /// refresh TTL); the publish is a separate best-effort step whose
    /// failure never fails the store operation.
    pub async fn store(
        &self,
        user_id: &str,
        input: NotificationInput,
    ) -> Result<NotificationRecord> {
        let seq = self.next_seq(user_id).await?;
        let record = NotificationRecord {
            id: input.id.unwrap_or_else(|| nanoid::nanoid!()),
            kind: input.kind,
            title: input.title,
            message: input.message,
            data: input.data,
            read: false,
            created_at: Utc::now(),
            seq,
        };

        let key = Self::feed_key(user_id);
        let raw = serde_json::to_string(&record)?;
        let replies = self
            .client
            .pipeline(&[
                cmd(&["HSET", &key, &record.id, &raw]),
                cmd(&["HLEN", &key]),
                cmd(&["EXPIRE", &key, &self.feed_ttl_secs.to_string()]),
            ])
            .await
            .inspect_err(
                |err| warn!(operation = "notify_store", user_id, error = %err, "store failed"),
            )?;
        let results = reply::collect(replies)?;
        let len = reply::as_u64(results.get(1).unwrap_or(&Value::Null))?;

        if len > self.max_stored as u64 {
            self.prune_oldest(user_id, len - self.max_stored as u64)
                .await?;
        }

        // Fan-out is best-effort; listeners missing an event only affects
        // liveness, never the stored feed
        if let Err(err) = self
            .client
            .execute(&cmd(&["PUBLISH", &Self::channel(user_id), &raw]))
            .await
        {
            warn!(operation = "notify_publish", user_id, error = %err, "fan-out failed");
        }

        Ok(record)
    }

    // == List ==
    /// Returns up to `limit` notifications, newest first.
    ///
    /// See [`DEFAULT_LIST_LIMIT`] for the customary page size.
    pub async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<NotificationRecord>> {
        let mut records = self.fetch_all(user_id).await?;
        records.truncate(limit);
        Ok(records)
    }

    // == Mark Read ==
    /// Flips one notification to read, refreshing the feed TTL.
    ///
    /// Returns `Ok(false)` when the id is not in the feed.
    pub async fn mark_read(&self, user_id: &str, id: &str) -> Result<bool> {
        let key = Self::feed_key(user_id);
        let result = self
            .client
            .execute(&cmd(&["HGET", &key, id]))
            .await
            .inspect_err(
                |err| warn!(operation = "notify_mark_read", user_id, id, error = %err, "read failed"),
            )?;

        let raw = match result {
            Value::Null => return Ok(false),
            Value::String(raw) => raw,
            other => {
                return Err(StateError::Store(format!(
                    "unexpected reply: wanted string, got {other}"
                )))
            }
        };

        let mut record: NotificationRecord = serde_json::from_str(&raw)?;
        record.read = true;
        let updated = serde_json::to_string(&record)?;

        let replies = self
            .client
            .pipeline(&[
                cmd(&["HSET", &key, id, &updated]),
                cmd(&["EXPIRE", &key, &self.feed_ttl_secs.to_string()]),
            ])
            .await?;
        reply::collect(replies)?;
        Ok(true)
    }

    // == Clear ==
    /// Deletes the user's entire feed (and its sequence counter).
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        let replies = self
            .client
            .pipeline(&[
                cmd(&["DEL", &Self::feed_key(user_id)]),
                cmd(&["DEL", &Self::seq_key(user_id)]),
            ])
            .await
            .inspect_err(
                |err| warn!(operation = "notify_clear", user_id, error = %err, "clear failed"),
            )?;
        reply::collect(replies)?;
        Ok(())
    }

    // == Unread Count ==
    /// Counts unread notifications.
    ///
    /// Derived from the feed at read time; no separate counter exists to
    /// drift out of sync.
    pub async fn unread_count(&self, user_id: &str) -> Result<u64> {
        let records = self.fetch_all(user_id).await?;
        Ok(records.iter().filter(|r| !r.read).count() as u64)
    }

    // == Internals ==
    /// Atomically draws the next per-user sequence number, keeping the
    /// counter key on the same rolling TTL as the feed.
    async fn next_seq(&self, user_id: &str) -> Result<u64> {
        let key = Self::seq_key(user_id);
        let replies = self
            .client
            .pipeline(&[
                cmd(&["INCR", &key]),
                cmd(&["EXPIRE", &key, &self.feed_ttl_secs.to_string()]),
            ])
            .await?;
        let results = reply::collect(replies)?;
        reply::as_u64(results.first().unwrap_or(&Value::Null))
    }

    /// Fetches and decodes the whole feed, newest first. Malformed entries
    /// are skipped with a warning rather than failing the read.
    async fn fetch_all(&self, user_id: &str) -> Result<Vec<NotificationRecord>> {
        let result = self
            .client
            .execute(&cmd(&["HVALS", &Self::feed_key(user_id)]))
            .await
            .inspect_err(
                |err| warn!(operation = "notify_list", user_id, error = %err, "read failed"),
            )?;

        let raws = match result {
            Value::Null => Vec::new(),
            other => reply::as_string_array(&other)?,
        };

        let mut records: Vec<NotificationRecord> = raws
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(user_id, error = %err, "skipping malformed notification");
                    None
                }
            })
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Removes the `excess` lowest-sequence notifications.
    async fn prune_oldest(&self, user_id: &str, excess: u64) -> Result<()> {
        let records = self.fetch_all(user_id).await?;
        let mut oldest: Vec<&NotificationRecord> = records.iter().collect();
        oldest.sort_by_key(|r| r.seq);

        let victims: Vec<&str> = oldest
            .iter()
            .take(excess as usize)
            .map(|r| r.id.as_str())
            .collect();
        if victims.is_empty() {
            return Ok(());
        }

        let key = Self::feed_key(user_id);
        let mut tokens = cmd(&["HDEL", &key]);
        tokens.extend(victims.iter().map(|id| id.to_string()));

        let replies = self
            .client
            .pipeline(&[tokens, cmd(&["EXPIRE", &key, &self.feed_ttl_secs.to_string()])])
            .await?;
        reply::collect(replies)?;
        Ok(())
    }
}

// == Ordering ==
/// Sorts newest first: descending sequence, id as a stable tiebreaker.
fn sort_newest_first(records: &mut [NotificationRecord]) {
    records.sort_by(|a, b| b.seq.cmp(&a.seq).then_with(|| a.id.cmp(&b.id)));
}
