//! Test support: an in-process mock of the store's REST command protocol.
//!
//! Runs a real axum server on an ephemeral port, speaking the same wire
//! format as the production store: single commands POSTed as a JSON token
//! array to `/`, batches to `/pipeline`, bearer auth, `{result}` /
//! `{error}` reply envelopes. Behind the router sits a small in-memory
//! engine with live TTLs, so expiry tests exercise real time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use ephemera::{Config, StoreClient};

/// Bearer token the mock accepts.
pub const TEST_TOKEN: &str = "test-token";

// == Stored Values ==
/// The value kinds the engine understands.
#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

// == Store Engine ==
/// In-memory command engine with lazy TTL expiry.
#[derive(Debug, Default)]
struct StoreEngine {
    entries: HashMap<String, Entry>,
}

type CommandResult = Result<Value, String>;

impl StoreEngine {
    /// Removes the key if expired, then returns whether it is live.
    fn purge_if_expired(&mut self, key: &str) {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_if_expired(key);
        self.entries.get_mut(key)
    }

    /// Executes one command against the engine.
    fn apply(&mut self, tokens: &[String]) -> CommandResult {
        let command = tokens.first().map(|t| t.to_ascii_uppercase());
        let args = &tokens[tokens.len().min(1)..];

        match command.as_deref() {
            Some("PING") => Ok(json!("PONG")),
            Some("SET") => self.set(args),
            Some("GET") => self.get(args),
            Some("DEL") => self.del(args),
            Some("EXISTS") => self.exists(args),
            Some("EXPIRE") => self.expire(args),
            Some("TTL") => self.ttl(args),
            Some("INCR") => self.incr(args),
            Some("MGET") => self.mget(args),
            Some("SCAN") => self.scan(args),
            Some("HSET") => self.hset(args),
            Some("HGET") => self.hget(args),
            Some("HDEL") => self.hdel(args),
            Some("HVALS") => self.hvals(args),
            Some("HLEN") => self.hlen(args),
            Some("SADD") => self.sadd(args),
            Some("SREM") => self.srem(args),
            Some("SMEMBERS") => self.smembers(args),
            Some("PUBLISH") => Ok(json!(0)),
            Some(other) => Err(format!("ERR unknown command '{other}'")),
            None => Err("ERR empty command".to_string()),
        }
    }

    fn set(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'set'")?;
        let value = args.get(1).ok_or("ERR wrong number of arguments for 'set'")?;

        let expires_at = match args.get(2).map(|t| t.to_ascii_uppercase()) {
            Some(ref opt) if opt == "EX" => {
                let secs: u64 = args
                    .get(3)
                    .and_then(|s| s.parse().ok())
                    .ok_or("ERR invalid expire time in 'set' command")?;
                Some(Instant::now() + Duration::from_secs(secs))
            }
            Some(_) => return Err("ERR syntax error".to_string()),
            None => None,
        };

        self.entries.insert(
            key.clone(),
            Entry {
                value: Stored::Text(value.clone()),
                expires_at,
            },
        );
        Ok(json!("OK"))
    }

    fn get(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'get'")?;
        match self.live(key) {
            Some(Entry {
                value: Stored::Text(text),
                ..
            }) => Ok(json!(text.clone())),
            Some(_) => Err(wrongtype()),
            None => Ok(Value::Null),
        }
    }

    fn del(&mut self, args: &[String]) -> CommandResult {
        let mut removed = 0;
        for key in args {
            self.purge_if_expired(key);
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(json!(removed))
    }

    fn exists(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'exists'")?;
        Ok(json!(if self.live(key).is_some() { 1 } else { 0 }))
    }

    fn expire(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'expire'")?;
        let secs: u64 = args
            .get(1)
            .and_then(|s| s.parse().ok())
            .ok_or("ERR value is not an integer or out of range")?;

        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(secs));
                Ok(json!(1))
            }
            None => Ok(json!(0)),
        }
    }

    fn ttl(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'ttl'")?;
        match self.live(key) {
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Ok(json!(remaining.as_secs_f64().ceil() as i64))
            }
            Some(_) => Ok(json!(-1)),
            None => Ok(json!(-2)),
        }
    }

    fn incr(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'incr'")?;
        self.purge_if_expired(key);

        let entry = self.entries.entry(key.clone()).or_insert(Entry {
            value: Stored::Text("0".to_string()),
            expires_at: None,
        });
        let Stored::Text(text) = &mut entry.value else {
            return Err(wrongtype());
        };
        let current: i64 = text
            .parse()
            .map_err(|_| "ERR value is not an integer or out of range".to_string())?;
        *text = (current + 1).to_string();
        Ok(json!(current + 1))
    }

    fn mget(&mut self, args: &[String]) -> CommandResult {
        let values: Vec<Value> = args
            .iter()
            .map(|key| match self.live(key) {
                Some(Entry {
                    value: Stored::Text(text),
                    ..
                }) => json!(text.clone()),
                _ => Value::Null,
            })
            .collect();
        Ok(json!(values))
    }

    /// Cursor-paged key listing. The cursor marks the last key handed out
    /// (`k:{key}`), so keys deleted between pages never shift the walk;
    /// "0" comes back once the listing is exhausted.
    fn scan(&mut self, args: &[String]) -> CommandResult {
        let cursor = args.first().ok_or("ERR invalid cursor")?;
        let after = match cursor.as_str() {
            "0" => None,
            marked => Some(marked.strip_prefix("k:").ok_or("ERR invalid cursor")?.to_string()),
        };

        let mut pattern = "*".to_string();
        let mut count = 10usize;
        let mut rest = args[1..].iter();
        while let Some(token) = rest.next() {
            match token.to_ascii_uppercase().as_str() {
                "MATCH" => pattern = rest.next().cloned().ok_or("ERR syntax error")?,
                "COUNT" => {
                    count = rest
                        .next()
                        .and_then(|c| c.parse().ok())
                        .ok_or("ERR syntax error")?
                }
                _ => return Err("ERR syntax error".to_string()),
            }
        }

        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));

        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();

        let page: Vec<String> = keys
            .iter()
            .filter(|k| after.as_ref().map_or(true, |last| k.as_str() > last.as_str()))
            .take(count)
            .map(|k| k.to_string())
            .collect();
        let next = match page.last() {
            Some(last) if page.len() == count => format!("k:{last}"),
            _ => "0".to_string(),
        };

        let matches: Vec<String> = page
            .into_iter()
            .filter(|k| glob_match(&pattern, k))
            .collect();
        Ok(json!([next, matches]))
    }

    fn hash_entry(&mut self, key: &str) -> Result<&mut HashMap<String, String>, String> {
        self.purge_if_expired(key);
        let entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Stored::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Stored::Hash(map) => Ok(map),
            _ => Err(wrongtype()),
        }
    }

    fn hset(&mut self, args: &[String]) -> CommandResult {
        let [key, field, value] = args else {
            return Err("ERR wrong number of arguments for 'hset'".to_string());
        };
        let map = self.hash_entry(key)?;
        let added = if map.insert(field.clone(), value.clone()).is_none() {
            1
        } else {
            0
        };
        Ok(json!(added))
    }

    fn hget(&mut self, args: &[String]) -> CommandResult {
        let [key, field] = args else {
            return Err("ERR wrong number of arguments for 'hget'".to_string());
        };
        match self.live(key) {
            Some(Entry {
                value: Stored::Hash(map),
                ..
            }) => Ok(map.get(field).map(|v| json!(v)).unwrap_or(Value::Null)),
            Some(_) => Err(wrongtype()),
            None => Ok(Value::Null),
        }
    }

    fn hdel(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'hdel'")?;
        match self.live(key) {
            Some(Entry {
                value: Stored::Hash(map),
                ..
            }) => {
                let removed = args[1..].iter().filter(|f| map.remove(*f).is_some()).count();
                Ok(json!(removed))
            }
            Some(_) => Err(wrongtype()),
            None => Ok(json!(0)),
        }
    }

    fn hvals(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'hvals'")?;
        match self.live(key) {
            Some(Entry {
                value: Stored::Hash(map),
                ..
            }) => Ok(json!(map.values().cloned().collect::<Vec<_>>())),
            Some(_) => Err(wrongtype()),
            None => Ok(json!(Vec::<String>::new())),
        }
    }

    fn hlen(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'hlen'")?;
        match self.live(key) {
            Some(Entry {
                value: Stored::Hash(map),
                ..
            }) => Ok(json!(map.len())),
            Some(_) => Err(wrongtype()),
            None => Ok(json!(0)),
        }
    }

    fn set_entry(&mut self, key: &str) -> Result<&mut HashSet<String>, String> {
        self.purge_if_expired(key);
        let entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Stored::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Stored::Set(set) => Ok(set),
            _ => Err(wrongtype()),
        }
    }

    fn sadd(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'sadd'")?;
        let set = self.set_entry(key)?;
        let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
        Ok(json!(added))
    }

    fn srem(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'srem'")?;
        match self.live(key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => {
                let removed = args[1..].iter().filter(|m| set.remove(*m)).count();
                Ok(json!(removed))
            }
            Some(_) => Err(wrongtype()),
            None => Ok(json!(0)),
        }
    }

    fn smembers(&mut self, args: &[String]) -> CommandResult {
        let key = args.first().ok_or("ERR wrong number of arguments for 'smembers'")?;
        match self.live(key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(json!(members))
            }
            Some(_) => Err(wrongtype()),
            None => Ok(json!(Vec::<String>::new())),
        }
    }
}

fn wrongtype() -> String {
    "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
}

// == Glob Matching ==
/// `*`-only glob match, enough for the store's key patterns.
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(idx) => pos += idx + part.len(),
                None => return false,
            }
        }
    }
    true
}

// == HTTP Surface ==
#[derive(Clone)]
struct ServerState {
    engine: Arc<Mutex<StoreEngine>>,
    token: String,
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {token}"))
        .unwrap_or(false)
}

fn envelope(result: CommandResult) -> Value {
    match result {
        Ok(value) => json!({ "result": value }),
        Err(message) => json!({ "error": message }),
    }
}

async fn command_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(tokens): Json<Vec<String>>,
) -> Response {
    if !authorized(&headers, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut engine = state.engine.lock().await;
    Json(envelope(engine.apply(&tokens))).into_response()
}

async fn pipeline_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(batch): Json<Vec<Vec<String>>>,
) -> Response {
    if !authorized(&headers, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut engine = state.engine.lock().await;
    let replies: Vec<Value> = batch
        .iter()
        .map(|tokens| envelope(engine.apply(tokens)))
        .collect();
    Json(replies).into_response()
}

// == Mock Store ==
/// A running mock store server; shuts down on drop.
pub struct MockStore {
    /// Base URL clients should point at
    pub url: String,
    handle: JoinHandle<()>,
}

/// Installs a quiet tracing subscriber once per test binary; RUST_LOG
/// turns it up when a test needs the wire chatter.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

impl MockStore {
    /// Binds an ephemeral port and serves the command protocol.
    pub async fn spawn() -> Self {
        init_tracing();
        let state = ServerState {
            engine: Arc::new(Mutex::new(StoreEngine::default())),
            token: TEST_TOKEN.to_string(),
        };
        let app = Router::new()
            .route("/", post(command_handler))
            .route("/pipeline", post(pipeline_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock store");
        let addr = listener.local_addr().expect("mock store addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock store");
        });

        Self {
            url: format!("http://{addr}"),
            handle,
        }
    }

    /// Config pointing at this mock.
    pub fn config(&self) -> Config {
        Config::with_credentials(self.url.as_str(), TEST_TOKEN)
    }

    /// Ready-to-use client pointing at this mock.
    pub fn client(&self) -> Arc<StoreClient> {
        Arc::new(StoreClient::new(&self.config()))
    }

    /// Client carrying the wrong bearer token, for auth-failure tests.
    pub fn client_with_bad_token(&self) -> Arc<StoreClient> {
        Arc::new(StoreClient::new(&Config::with_credentials(
            self.url.as_str(),
            "wrong-token",
        )))
    }
}

impl Drop for MockStore {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[test]
fn test_glob_match() {
    assert!(glob_match("*", "anything"));
    assert!(glob_match("course:*", "course:42"));
    assert!(!glob_match("course:*", "user:42"));
    assert!(glob_match("*:42", "course:42"));
    assert!(glob_match("course:*:meta", "course:42:meta"));
    assert!(!glob_match("course:*:meta", "course:42:data"));
    assert!(glob_match("exact", "exact"));
    assert!(!glob_match("exact", "exactly"));
}
