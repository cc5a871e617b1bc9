//! Configuration Module
//!
//! Handles loading the layer's configuration from environment variables.

use std::env;

/// Coordination-layer configuration.
///
/// The REST credentials are optional on purpose: with either missing the
/// layer is considered unconfigured, and every store call fails fast with a
/// configuration error before attempting network I/O.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the store's REST command endpoint
    pub rest_url: Option<String>,
    /// Bearer token for the store's REST endpoint
    pub rest_token: Option<String>,
    /// Capacity of the optional in-process hot-path cache
    pub memory_capacity: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `EPHEMERA_REST_URL` - Store REST endpoint URL (no default)
    /// - `EPHEMERA_REST_TOKEN` - Store REST bearer token (no default)
    /// - `EPHEMERA_MEMORY_CAPACITY` - In-process cache capacity (default: 1000)
    pub fn from_env() -> Self {
        Self {
            rest_url: env::var("EPHEMERA_REST_URL").ok().filter(|v| !v.is_empty()),
            rest_token: env::var("EPHEMERA_REST_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            memory_capacity: env::var("EPHEMERA_MEMORY_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }

    /// Creates a Config with explicit credentials.
    ///
    /// Used by tests and by callers that resolve credentials themselves.
    pub fn with_credentials(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            rest_url: Some(url.into()),
            rest_token: Some(token.into()),
            memory_capacity: 1000,
        }
    }

    /// True when both the endpoint URL and the token are present.
    pub fn is_configured(&self) -> bool {
        self.rest_url.is_some() && self.rest_token.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rest_url: None,
            rest_token: None,
            memory_capacity: 1000,
        }
    }
}
