//! Redis-backed [`Storage`] for agentpay.
//!
//! Multi-process deployments share guard counters, fund locks,
//! reservations, circuit state, and the ledger through this backend. All
//! compare-based mutations run server-side:
//!
//! - lock release is a Lua compare-and-delete (never two round trips)
//! - `update` is an optimistic loop around a Lua compare-and-swap on the
//!   serialized prior value
//! - `atomic_add` reuses the same compare-and-swap so counters stay exact
//!   decimals (no float drift)
//! - lock acquisition is `SET NX PX`
//!
//! ```no_run
//! # async fn demo() -> Result<(), agentpay::storage::StorageError> {
//! use agentpay_redis::RedisStorage;
//!
//! let storage = RedisStorage::connect("redis://127.0.0.1:6379/0", "agentpay").await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use agentpay::storage::{counter_value, Mutator, Storage, StorageError};

/// Attempts before an optimistic compare-and-swap loop gives up.
const CAS_MAX_ATTEMPTS: usize = 16;

/// Compare-and-delete: release a lock only when the stored token matches.
const RELEASE_LOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

/// Compare-and-swap on the serialized prior value. An empty ARGV[1] means
/// 'expect absent'; an empty ARGV[2] means 'delete'. ARGV[3] is an optional
/// expiry in milliseconds applied when the key is created.
const COMPARE_AND_SWAP_SCRIPT: &str = r"
local cur = redis.call('GET', KEYS[1])
if cur == false then cur = '' end
if cur ~= ARGV[1] then
    return 0
end
if ARGV[2] == '' then
    redis.call('DEL', KEYS[1])
elseif cur == '' and ARGV[3] ~= '' then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
else
    redis.call('SET', KEYS[1], ARGV[2])
end
return 1
";

fn backend_err(err: redis::RedisError) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Serializes a value for storage; counters stay bare strings so the
/// key space is shared with [`counter_value`] readers.
fn encode(value: &Value) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Codec(e.to_string()))
}

fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Redis storage backend.
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
    prefix: String,
    release_lock: Script,
    compare_and_swap: Script,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStorage {
    /// Connects to redis and prepares the scripts.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] when the connection fails.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(backend_err)?;
        Ok(Self {
            conn,
            prefix: prefix.to_owned(),
            release_lock: Script::new(RELEASE_LOCK_SCRIPT),
            compare_and_swap: Script::new(COMPARE_AND_SWAP_SCRIPT),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// One compare-and-swap attempt. Returns `true` when the swap landed.
    async fn try_swap(
        &self,
        key: &str,
        expect: &str,
        next: &str,
        window: Option<Duration>,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let px = window.map_or(String::new(), |w| w.as_millis().to_string());
        let landed: i64 = self
            .compare_and_swap
            .key(self.full_key(key))
            .arg(expect)
            .arg(next)
            .arg(px)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(landed == 1)
    }

    async fn raw_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        conn.get(self.full_key(key)).await.map_err(backend_err)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let encoded = encode(&value)?;
        let _: () = conn
            .set(self.full_key(key), encoded)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.raw_get(key).await?.map(decode))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.full_key(key)).await.map_err(backend_err)?;
        Ok(removed > 0)
    }

    async fn update(&self, key: &str, mutator: Mutator) -> Result<Option<Value>, StorageError> {
        for attempt in 0..CAS_MAX_ATTEMPTS {
            let prior_raw = self.raw_get(key).await?;
            let prior = prior_raw.clone().map(decode);
            let next = mutator(prior);
            let expect = prior_raw.unwrap_or_default();
            let encoded = match &next {
                Some(value) => encode(value)?,
                None => String::new(),
            };
            if self.try_swap(key, &expect, &encoded, None).await? {
                return Ok(next);
            }
            debug!(key, attempt, "compare-and-swap contention, retrying");
        }
        Err(StorageError::Backend(format!(
            "update contention on {key} after {CAS_MAX_ATTEMPTS} attempts"
        )))
    }

    async fn atomic_add(
        &self,
        key: &str,
        delta: Decimal,
        window: Option<Duration>,
    ) -> Result<Decimal, StorageError> {
        for attempt in 0..CAS_MAX_ATTEMPTS {
            let prior_raw = self.raw_get(key).await?;
            let prior = prior_raw.clone().map(decode);
            let next = counter_value(prior.as_ref()) + delta;
            let expect = prior_raw.unwrap_or_default();
            // Counters are stored as bare decimal strings.
            let encoded = format!("\"{next}\"");
            if self.try_swap(key, &expect, &encoded, window).await? {
                return Ok(next);
            }
            debug!(key, attempt, "counter contention, retrying");
        }
        Err(StorageError::Backend(format!(
            "counter contention on {key} after {CAS_MAX_ATTEMPTS} attempts"
        )))
    }

    async fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release_lock
            .key(self.full_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(released > 0)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.full_key(prefix));
        let mut results = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;
            for full_key in keys {
                let raw: Option<String> = conn.get(&full_key).await.map_err(backend_err)?;
                if let Some(raw) = raw {
                    let key = full_key
                        .strip_prefix(&format!("{}:", self.prefix))
                        .unwrap_or(&full_key)
                        .to_owned();
                    results.push((key, decode(raw)));
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(results)
    }
}
