//! Health Check Module
//!
//! A round-trip latency probe against the store, used by callers to decide
//! whether to degrade before attempting real operations.

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::client::{cmd, StoreClient};

// == Health Status ==
/// Outcome of a health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Whether the store answered the ping
    pub connected: bool,
    /// Round-trip time in milliseconds, when connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

// == Check ==
/// Pings the store and measures the round trip.
///
/// Never errors: an unconfigured or unreachable store simply reports
/// `connected: false`, which is the signal callers degrade on.
pub async fn check(client: &StoreClient) -> HealthStatus {
    let started = Instant::now();

    match client.execute(&cmd(&["PING"])).await {
        Ok(_) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            debug!(latency_ms, "store ping ok");
            HealthStatus {
                connected: true,
                latency_ms: Some(latency_ms),
            }
        }
        Err(err) => {
            debug!(error = %err, "store ping failed");
            HealthStatus {
                connected: false,
                latency_ms: None,
            }
        }
    }
}
