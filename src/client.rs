//! Store Client Module
//!
//! The single point of network I/O: issues single commands and pipelined
//! command batches to the remote key-value store over its HTTP REST
//! protocol.
//!
//! # Wire format
//! - Single command: `POST {base}` with a JSON array of string tokens,
//!   e.g. `["SET", "k", "v", "EX", "60"]`; reply `{"result": ...}` or
//!   `{"error": "..."}`.
//! - Batch: `POST {base}/pipeline` with a JSON array of such arrays; reply
//!   is one `{result | error}` object per command, in submission order.
//!
//! Both carry `Authorization: Bearer {token}`. A pipeline executes its
//! commands as a contiguous, ordered unit on the store; it is not a
//! transaction and does not roll back on partial failure.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, StateError};

// == Command Reply ==
/// One per-command result from a pipelined batch.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandReply {
    /// Command result, absent when the command failed
    #[serde(default)]
    pub result: Option<Value>,
    /// Store-reported error, absent when the command succeeded
    #[serde(default)]
    pub error: Option<String>,
}

impl CommandReply {
    /// Converts the reply into a `Result`, surfacing the store's `error`
    /// field as `StateError::Store`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(message) => Err(StateError::Store(message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// == Store Client ==
/// HTTP client for the store's REST command protocol.
///
/// Cheap to clone-wrap in `Arc`; holds no mutable state beyond reqwest's
/// internal connection pool. No per-call timeout is imposed here: callers
/// needing bounded latency wrap their calls in their own deadline.
#[derive(Debug)]
pub struct StoreClient {
    http: reqwest::Client,
    endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    token: String,
}

impl StoreClient {
    // == Constructor ==
    /// Creates a client from configuration.
    ///
    /// With either credential missing the client is constructed in an
    /// unconfigured state and every command fails with
    /// `StateError::Configuration` before any network attempt.
    pub fn new(config: &Config) -> Self {
        let endpoint = match (&config.rest_url, &config.rest_token) {
            (Some(url), Some(token)) => Some(Endpoint {
                url: url.trim_end_matches('/').to_string(),
                token: token.clone(),
            }),
            _ => None,
        };

        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Creates a client from environment variables (see [`Config::from_env`]).
    pub fn from_env() -> Self {
        Self::new(&Config::from_env())
    }

    /// True when both endpoint URL and token are present.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn endpoint(&self) -> Result<&Endpoint> {
        self.endpoint.as_ref().ok_or_else(|| {
            StateError::Configuration(
                "EPHEMERA_REST_URL and EPHEMERA_REST_TOKEN must both be set".to_string(),
            )
        })
    }

    // == Execute ==
    /// Issues a single command and returns its result value.
    ///
    /// # Arguments
    /// * `command` - Command tokens, e.g. `["GET", "cache:user:42"]`
    pub async fn execute(&self, command: &[String]) -> Result<Value> {
        let endpoint = self.endpoint()?;
        debug!(command = %command.first().map(String::as_str).unwrap_or(""), "executing store command");

        let response = self
            .http
            .post(&endpoint.url)
            .bearer_auth(&endpoint.token)
            .json(&command)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StateError::Transport(status.as_u16()));
        }

        let reply: CommandReply = response.json().await?;
        reply.into_result()
    }

    // == Pipeline ==
    /// Issues a batch of commands in one round trip.
    ///
    /// Returns one reply per command, in submission order. The only way to
    /// make multiple commands execute as a contiguous, ordered unit.
    ///
    /// # Arguments
    /// * `commands` - One token list per command
    pub async fn pipeline(&self, commands: &[Vec<String>]) -> Result<Vec<CommandReply>> {
        let endpoint = self.endpoint()?;
        debug!(batch = commands.len(), "executing store pipeline");

        let response = self
            .http
            .post(format!("{}/pipeline", endpoint.url))
            .bearer_auth(&endpoint.token)
            .json(&commands)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StateError::Transport(status.as_u16()));
        }

        let replies: Vec<CommandReply> = response.json().await?;
        Ok(replies)
    }
}

// == Command Builder ==
/// Builds an owned token list from string slices.
pub(crate) fn cmd(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

// == Reply Decoding ==
/// Helpers for pulling typed values out of store replies.
pub(crate) mod reply {
    use serde_json::Value;

    use crate::error::{Result, StateError};

    fn unexpected(expected: &str, got: &Value) -> StateError {
        StateError::Store(format!("unexpected reply: wanted {expected}, got {got}"))
    }

    /// Decodes an integer reply (INCR, DEL, EXISTS, HLEN, ...).
    pub fn as_u64(value: &Value) -> Result<u64> {
        value.as_u64().ok_or_else(|| unexpected("integer", value))
    }

    /// Decodes a possibly negative integer reply (TTL).
    pub fn as_i64(value: &Value) -> Result<i64> {
        value.as_i64().ok_or_else(|| unexpected("integer", value))
    }

    /// Converts a batch of pipeline replies into their result values,
    /// surfacing the first per-command error.
    pub fn collect(replies: Vec<super::CommandReply>) -> Result<Vec<Value>> {
        replies.into_iter().map(super::CommandReply::into_result).collect()
    }

    /// Decodes an array-of-strings reply (SMEMBERS, HVALS, SCAN keys).
    pub fn as_string_array(value: &Value) -> Result<Vec<String>> {
        let items = value.as_array().ok_or_else(|| unexpected("array", value))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| unexpected("string element", item))
            })
            .collect()
    }
}
