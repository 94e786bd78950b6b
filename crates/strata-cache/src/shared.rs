use crate::error::CacheError;
use crate::tier::{shorter_ttl, TierEntry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Networked key-value store backing Tier 2.
///
/// Implementations must bound every call by a short timeout; the hierarchy treats any error
/// as "tier unavailable for this call".
pub trait SharedBackend: Send + Sync {
    /// Short name used in logs and stats.
    fn name(&self) -> &'static str;

    /// `false` for the placeholder backend used when no endpoint is configured.
    fn is_configured(&self) -> bool {
        true
    }

    /// Whether the most recent interaction with the backend succeeded.
    fn is_connected(&self) -> bool;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Like [`get`](Self::get), plus the entry's remaining lifetime when the backend tracks
    /// one. `None` means no expiry or unknown.
    fn get_with_ttl(&self, key: &str) -> Result<Option<TierEntry>, CacheError> {
        Ok(self.get(key)?.map(|value| TierEntry { value, ttl: None }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;

    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Round-trip to the backend, establishing a connection if needed.
    fn ping(&self) -> Result<(), CacheError>;
}

/// Backend used when no shared endpoint is configured. Every call misses.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    fn unavailable() -> CacheError {
        CacheError::Unavailable {
            backend: "null",
            reason: "no shared backend configured".to_string(),
        }
    }
}

impl SharedBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn is_configured(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(Self::unavailable())
    }

    fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    fn clear_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    fn ping(&self) -> Result<(), CacheError> {
        Err(Self::unavailable())
    }
}

/// Redis-backed shared tier using the blocking client.
///
/// The connection is opened lazily and dropped on any error. After a failure, reconnects are
/// skipped until `reconnect_cooldown` has passed, so an unreachable server costs at most one
/// timeout per cooldown window rather than one per call.
pub struct RedisBackend {
    client: redis::Client,
    timeout: Duration,
    reconnect_cooldown: Duration,
    state: Mutex<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    conn: Option<redis::Connection>,
    last_failure: Option<Instant>,
}

const SCAN_BATCH: usize = 500;

impl RedisBackend {
    /// Parse `url` without connecting.
    pub fn new(
        url: &str,
        timeout: Duration,
        reconnect_cooldown: Duration,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            timeout,
            reconnect_cooldown,
            state: Mutex::new(ConnectionState::default()),
        })
    }

    /// Server address, without credentials.
    pub fn address(&self) -> String {
        self.client.get_connection_info().addr.to_string()
    }

    fn connect(&self) -> redis::RedisResult<redis::Connection> {
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, CacheError> {
        let mut state = self.state.lock();
        let mut conn = match state.conn.take() {
            Some(conn) => conn,
            None => {
                if let Some(failed_at) = state.last_failure {
                    if failed_at.elapsed() < self.reconnect_cooldown {
                        return Err(CacheError::Unavailable {
                            backend: "redis",
                            reason: "reconnect cooling down after a recent failure".to_string(),
                        });
                    }
                }
                match self.connect() {
                    Ok(conn) => {
                        if state.last_failure.take().is_some() {
                            tracing::info!(
                                target: "strata.cache",
                                addr = %self.address(),
                                "reconnected to shared cache"
                            );
                        }
                        conn
                    }
                    Err(err) => {
                        state.last_failure = Some(Instant::now());
                        return Err(err.into());
                    }
                }
            }
        };

        match op(&mut conn) {
            Ok(value) => {
                state.conn = Some(conn);
                Ok(value)
            }
            Err(err) => {
                state.last_failure = Some(Instant::now());
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("addr", &self.address())
            .field("timeout", &self.timeout)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SharedBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_connected(&self) -> bool {
        self.state.lock().conn.is_some()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.with_connection(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn get_with_ttl(&self, key: &str) -> Result<Option<TierEntry>, CacheError> {
        let (value, pttl): (Option<Vec<u8>>, i64) = self.with_connection(|conn| {
            redis::pipe()
                .cmd("GET")
                .arg(key)
                .cmd("PTTL")
                .arg(key)
                .query(conn)
        })?;
        // PTTL is -1 for keys without expiry and -2 for missing keys.
        let ttl = u64::try_from(pttl)
            .ok()
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis);
        Ok(value.map(|value| TierEntry { value, ttl }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        self.with_connection(|conn| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
            }
            cmd.query(conn)
        })
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed: u64 = self.with_connection(|conn| redis::cmd("DEL").arg(key).query(conn))?;
        Ok(removed > 0)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let pattern = format!("{prefix}*");
        self.with_connection(|conn| {
            let mut cursor: u64 = 0;
            let mut removed: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query(conn)?;
                if !keys.is_empty() {
                    let deleted: u64 = redis::cmd("DEL").arg(&keys).query(conn)?;
                    removed += deleted;
                }
                if next == 0 {
                    return Ok(removed);
                }
                cursor = next;
            }
        })
    }

    fn ping(&self) -> Result<(), CacheError> {
        self.with_connection(|conn| redis::cmd("PING").query::<String>(conn).map(|_| ()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SharedTierPolicy {
    /// Endpoint such as `redis://127.0.0.1:6379`. `None` disables the tier.
    pub url: Option<String>,
    pub default_ttl: Option<Duration>,
    /// Connect, read and write timeout for each call.
    pub timeout: Duration,
    /// Minimum delay between reconnect attempts after a failure.
    pub reconnect_cooldown: Duration,
}

impl Default for SharedTierPolicy {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            timeout: Duration::from_secs(1),
            reconnect_cooldown: Duration::from_secs(5),
        }
    }
}

/// Tier 2 wrapper: applies the namespace and default TTL and absorbs backend errors.
pub struct SharedTier {
    backend: Arc<dyn SharedBackend>,
    namespace_prefix: String,
    default_ttl: Option<Duration>,
}

impl SharedTier {
    pub fn new(
        backend: Arc<dyn SharedBackend>,
        namespace: &str,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            namespace_prefix: format!("{namespace}:"),
            default_ttl,
        }
    }

    /// Build the configured backend, falling back to [`NullBackend`] without a URL.
    pub fn from_policy(policy: &SharedTierPolicy, namespace: &str) -> Result<Self, CacheError> {
        let backend: Arc<dyn SharedBackend> = match &policy.url {
            Some(url) => Arc::new(RedisBackend::new(
                url,
                policy.timeout,
                policy.reconnect_cooldown,
            )?),
            None => Arc::new(NullBackend),
        };
        Ok(Self::new(backend, namespace, policy.default_ttl))
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_configured()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// Read `key`. An entry whose backend lifetime is unknown is assumed to live no longer
    /// than this tier's default TTL, since every write through the tier carries one.
    pub fn get(&self, key: &str) -> Option<TierEntry> {
        if !self.is_enabled() {
            return None;
        }
        match self.backend.get_with_ttl(key) {
            Ok(entry) => entry.map(|entry| TierEntry {
                ttl: shorter_ttl(entry.ttl, self.default_ttl),
                value: entry.value,
            }),
            Err(err) => {
                self.log_failure("get", key, &err);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.backend.set(key, value, ttl.or(self.default_ttl)) {
            Ok(()) => true,
            Err(err) => {
                self.log_failure("set", key, &err);
                false
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.backend.delete(key) {
            Ok(removed) => removed,
            Err(err) => {
                self.log_failure("delete", key, &err);
                false
            }
        }
    }

    /// Remove every key in this tier's namespace.
    pub fn clear(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.backend.clear_prefix(&self.namespace_prefix) {
            Ok(removed) => {
                tracing::debug!(target: "strata.cache", removed, "cleared shared tier namespace");
                true
            }
            Err(err) => {
                self.log_failure("clear", &self.namespace_prefix, &err);
                false
            }
        }
    }

    /// Probe connectivity. Returns the connection state after the attempt.
    pub fn check_connection(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.backend.ping() {
            Ok(()) => true,
            Err(err) => {
                self.log_failure("ping", "", &err);
                false
            }
        }
    }

    fn log_failure(&self, op: &'static str, key: &str, err: &CacheError) {
        if matches!(err, CacheError::Unavailable { .. }) {
            tracing::debug!(
                target: "strata.cache",
                backend = self.backend.name(),
                op,
                key,
                error = %err,
                "shared tier skipped"
            );
        } else {
            tracing::warn!(
                target: "strata.cache",
                backend = self.backend.name(),
                op,
                key,
                error = %err,
                "shared tier unavailable; continuing without it"
            );
        }
    }
}

impl std::fmt::Debug for SharedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTier")
            .field("backend", &self.backend.name())
            .field("namespace_prefix", &self.namespace_prefix)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
