//! Ephemera - shared ephemeral state for stateless request handlers
//!
//! Coordination layer over a remote HTTP key-value store: a typed TTL
//! cache, fixed-window rate limiting, per-user notification feeds and
//! online presence, plus a health probe for degradation decisions.
//!
//! Handlers hold no state of their own; everything shared lives in the
//! store behind [`StoreClient`], the single point of network I/O.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod notifications;
pub mod presence;
pub mod ratelimit;

pub use cache::{CacheService, CacheWrite, Cached, MemoryCache};
pub use client::StoreClient;
pub use config::Config;
pub use error::{Result, StateError};
pub use health::HealthStatus;
pub use notifications::{NotificationInput, NotificationRecord, NotificationStore};
pub use presence::{PresenceRecord, PresenceTracker};
pub use ratelimit::{RateLimitDecision, RateLimiter};
