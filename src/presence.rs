//! Presence Tracker Module
//!
//! Heartbeat-driven online/offline tracking: a short-lived per-user
//! presence record plus an `online_users` set for O(1) "who's online"
//! queries.
//!
//! A client stays online only by re-calling [`PresenceTracker::set_online`]
//! within the presence TTL; silence lets the record lapse. Explicit
//! sign-off deletes the record and set membership immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::client::{cmd, reply, StoreClient};
use crate::error::{Result, StateError};

// == Public Constants ==
/// Per-user presence record TTL; the heartbeat interval must stay below it
pub const PRESENCE_TTL_SECS: u64 = 120;

/// TTL of the shared `online_users` set, refreshed by any heartbeat
pub const ONLINE_SET_TTL_SECS: u64 = 300;

/// Key of the shared membership set
pub const ONLINE_SET_KEY: &str = "online_users";

// == Presence Record ==
/// The per-user presence payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Always true while the record exists; absence means offline
    pub online: bool,
    /// Time of the most recent heartbeat
    pub last_seen: DateTime<Utc>,
    /// Caller-supplied fields (device, current page, ...), inlined
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

// == Presence Tracker ==
/// Presence operations over the remote store.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    client: Arc<StoreClient>,
    presence_ttl_secs: u64,
    set_ttl_secs: u64,
}

impl PresenceTracker {
    // == Constructor ==
    /// Creates a tracker with the default TTLs.
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self::with_ttls(client, PRESENCE_TTL_SECS, ONLINE_SET_TTL_SECS)
    }

    /// Creates a tracker with explicit TTLs.
    pub fn with_ttls(client: Arc<StoreClient>, presence_ttl_secs: u64, set_ttl_secs: u64) -> Self {
        Self {
            client,
            presence_ttl_secs: presence_ttl_secs.max(1),
            set_ttl_secs: set_ttl_secs.max(1),
        }
    }

    fn presence_key(user_id: &str) -> String {
        format!("presence:{user_id}")
    }

    // == Set Online ==
    /// Records a heartbeat: writes the presence record and refreshes the
    /// shared set, all in one pipelined batch.
    pub async fn set_online(&self, user_id: &str, metadata: Option<Map<String, Value>>) -> Result<()> {
        let record = PresenceRecord {
            online: true,
            last_seen: Utc::now(),
            metadata: metadata.unwrap_or_default(),
        };
        let raw = serde_json::to_string(&record)?;

        let replies = self
            .client
            .pipeline(&[
                cmd(&[
                    "SET",
                    &Self::presence_key(user_id),
                    &raw,
                    "EX",
                    &self.presence_ttl_secs.to_string(),
                ]),
                cmd(&["SADD", ONLINE_SET_KEY, user_id]),
                cmd(&["EXPIRE", ONLINE_SET_KEY, &self.set_ttl_secs.to_string()]),
            ])
            .await
            .inspect_err(
                |err| warn!(operation = "presence_online", user_id, error = %err, "heartbeat failed"),
            )?;
        reply::collect(replies)?;
        Ok(())
    }

    // == Set Offline ==
    /// Explicit sign-off: removes the record and the set membership,
    /// independent of TTL expiry.
    pub async fn set_offline(&self, user_id: &str) -> Result<()> {
        let replies = self
            .client
            .pipeline(&[
                cmd(&["DEL", &Self::presence_key(user_id)]),
                cmd(&["SREM", ONLINE_SET_KEY, user_id]),
            ])
            .await
            .inspect_err(
                |err| warn!(operation = "presence_offline", user_id, error = %err, "sign-off failed"),
            )?;
        reply::collect(replies)?;
        Ok(())
    }

    // == Is Online ==
    /// Existence check on the per-user presence key.
    ///
    /// Deliberately not a set lookup: the set's TTL is refreshed by every
    /// heartbeat from anyone, so it can hold stale members.
    pub async fn is_online(&self, user_id: &str) -> Result<bool> {
        let result = self
            .client
            .execute(&cmd(&["EXISTS", &Self::presence_key(user_id)]))
            .await
            .inspect_err(
                |err| warn!(operation = "presence_check", user_id, error = %err, "check failed"),
            )?;
        Ok(reply::as_u64(&result)? > 0)
    }

    // == Online Users ==
    /// Full membership of the shared set.
    ///
    /// May report ids whose individual presence has already lapsed: a
    /// single active user's heartbeats keep the whole set alive for
    /// [`ONLINE_SET_TTL_SECS`]. Callers needing an exact answer per user
    /// should confirm with [`Self::is_online`].
    pub async fn online_users(&self) -> Result<Vec<String>> {
        let result = self
            .client
            .execute(&cmd(&["SMEMBERS", ONLINE_SET_KEY]))
            .await
            .inspect_err(|err| warn!(operation = "presence_list", error = %err, "listing failed"))?;

        match result {
            Value::Null => Ok(Vec::new()),
            other => reply::as_string_array(&other),
        }
    }

    // == Presence ==
    /// Fetches the full presence record, for "last seen" style displays.
    pub async fn presence(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        let result = self
            .client
            .execute(&cmd(&["GET", &Self::presence_key(user_id)]))
            .await?;

        match result {
            Value::Null => Ok(None),
            Value::String(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            other => Err(StateError::Store(format!(
                "unexpected reply: wanted string, got {other}"
            ))),
        }
    }
}
