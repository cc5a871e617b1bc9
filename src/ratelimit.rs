//! Rate Limiter Module
//!
//! Fixed-window request counting per identifier, backed by the store's
//! atomic INCR.
//!
//! The window is a discrete time bucket: `window_index = now / window`.
//! The first increment in a bucket implicitly creates its counter key,
//! which self-expires at the bucket's end. Fixed windows are simple and
//! cheap but admit up to `2 * max_requests` across a window boundary (a
//! burst at the end of one bucket plus a burst at the start of the next);
//! that trade-off is accepted here.
//!
//! On any store failure the limiter fails open: quota enforcement is
//! sacrificed for availability of the protected endpoint.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

use crate::client::{cmd, reply, StoreClient};
use crate::error::Result;

// == Rate Limit Decision ==
/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is within quota
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Seconds until the current window ends
    pub reset_in: u64,
}

// == Rate Limiter ==
/// Fixed-window rate limiter over the remote store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    client: Arc<StoreClient>,
}

impl RateLimiter {
    // == Constructor ==
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    // == Check ==
    /// Counts this request against `identifier`'s current window.
    ///
    /// One pipelined round trip: `INCR` the window counter and (re)apply
    /// its TTL, indivisible from the caller's point of view. The INCR
    /// itself is atomic at the store, so concurrent callers on the same
    /// identifier are counted correctly without any client-side lock.
    ///
    /// Infallible by design: on store failure the request is allowed and
    /// the error is logged.
    ///
    /// # Arguments
    /// * `identifier` - Who is being limited (user id, IP, API key)
    /// * `max_requests` - Quota per window
    /// * `window_secs` - Window length in seconds
    pub async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_secs: u64,
    ) -> RateLimitDecision {
        let window_secs = window_secs.max(1);
        let now = unix_now();

        match self.count_request(identifier, now, window_secs).await {
            Ok(count) => RateLimitDecision {
                allowed: count <= u64::from(max_requests),
                remaining: u64::from(max_requests).saturating_sub(count) as u32,
                reset_in: reset_in(now, window_secs),
            },
            Err(err) => {
                warn!(
                    operation = "ratelimit",
                    identifier,
                    error = %err,
                    "rate limit check failed; failing open"
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: max_requests,
                    reset_in: reset_in(now, window_secs),
                }
            }
        }
    }

    async fn count_request(&self, identifier: &str, now: u64, window_secs: u64) -> Result<u64> {
        let key = format!("ratelimit:{identifier}:{}", window_index(now, window_secs));

        let replies = self
            .client
            .pipeline(&[
                cmd(&["INCR", &key]),
                cmd(&["EXPIRE", &key, &window_secs.to_string()]),
            ])
            .await?;

        let count = replies
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::StateError::Store("empty pipeline reply".into()))?
            .into_result()?;
        reply::as_u64(&count)
    }
}

// == Window Arithmetic ==
/// Index of the window containing `now`.
fn window_index(now: u64, window_secs: u64) -> u64 {
    now / window_secs
}

/// Seconds until the window containing `now` ends.
fn reset_in(now: u64, window_secs: u64) -> u64 {
    window_secs - (now % window_secs)
}

/// Current Unix timestamp in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
