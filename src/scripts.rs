//! The Lua scripts evaluated atomically by the store, and their registry.
//!
//! Each script's on-store identity is the SHA-1 hash of its source text.
//! A [`Script`] computes its own hash once at construction and exposes it
//! alongside the source so callers can `SCRIPT EXISTS` / `SCRIPT LOAD` /
//! `EVALSHA` without re-hashing on every call.

use std::sync::LazyLock;

use sha1::{Digest, Sha1};

/// Source and content hash of a single server-side script.
#[derive(Debug, Clone, Copy)]
pub struct Script {
    source: &'static str,
    sha1: &'static LazyLock<String>,
}

impl Script {
    const fn new(source: &'static str, sha1: &'static LazyLock<String>) -> Self {
        Self { source, sha1 }
    }

    /// The script's source text.
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// The SHA-1 hash of [`Script::source`], hex-encoded.
    ///
    /// Computed once, on first access, directly from [`Script::source`] —
    /// the hash is never hand-maintained, so it can never drift from the
    /// text that is actually sent to the store.
    pub fn sha1(&self) -> &'static str {
        self.sha1
    }
}

/// Computes the hex-encoded SHA-1 hash of a script's source text.
pub fn sha1_hex(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fixed-window counter script.
///
/// `KEYS[1]` is the window key, `ARGV` is `[unit_micros, throughput,
/// batch_size]`. Returns the number of tokens granted (0 if the window is
/// already exhausted).
pub const COUNTER_SOURCE: &str = r#"
local unit_micros = tonumber(ARGV[1])
local throughput = tonumber(ARGV[2])
local batch_size = tonumber(ARGV[3])

local time_parts = redis.call("TIME")
local now_micros = time_parts[1] * 1000000 + time_parts[2]
local window = math.floor(now_micros / unit_micros)
local window_key = KEYS[1] .. ":" .. window

local count = tonumber(redis.call("GET", window_key))
if count == nil then
    count = 0
end

if count >= throughput then
    return 0
end

local grant = math.min(throughput - count, batch_size)
redis.call("INCRBY", window_key, grant)
redis.call("EXPIRE", window_key, math.ceil(unit_micros / 1000000) * 3)
return grant
"#;

/// Token bucket script.
///
/// `KEYS[1]` is the bucket hash key, `ARGV` is `[unit_micros, throughput,
/// batch_size, max_capacity]`. Refill rate is `throughput / unit_micros`
/// tokens/µs, kept as a single integer ratio rather than a pre-divided
/// `rate_per_sec` float so fractional-second durations don't lose
/// precision crossing the Rust/Lua boundary. Returns the number of
/// tokens granted.
pub const TOKEN_BUCKET_SOURCE: &str = r#"
local unit_micros = tonumber(ARGV[1])
local throughput = tonumber(ARGV[2])
local batch_size = tonumber(ARGV[3])
local max_capacity = tonumber(ARGV[4])

local time_parts = redis.call("TIME")
local now_micros = time_parts[1] * 1000000 + time_parts[2]

local last_update = tonumber(redis.call("HGET", KEYS[1], "update_time"))
if last_update == nil then
    last_update = now_micros
end

local tokens = tonumber(redis.call("HGET", KEYS[1], "token_count"))
if tokens == nil then
    tokens = 0
end

local increment = math.floor((now_micros - last_update) * throughput / unit_micros)
tokens = math.min(tokens + increment, max_capacity)

local grant
if tokens > batch_size then
    grant = batch_size
    tokens = tokens - batch_size
else
    grant = tokens
    tokens = 0
end

redis.call("HSET", KEYS[1], "token_count", tokens)
if increment >= 1 then
    redis.call("HSET", KEYS[1], "update_time", now_micros)
end

return grant
"#;

/// Leaky bucket script.
///
/// `KEYS[1]` is the last-admit timestamp key, `ARGV` is `[interval_micros]`.
/// Returns `1` if admitted, `0` otherwise.
pub const LEAKY_BUCKET_SOURCE: &str = r#"
local interval_micros = tonumber(ARGV[1])

local time_parts = redis.call("TIME")
local now_micros = time_parts[1] * 1000000 + time_parts[2]

local last = tonumber(redis.call("GET", KEYS[1]))
if last == nil then
    last = 0
end

if now_micros > last + interval_micros then
    redis.call("SET", KEYS[1], now_micros)
    return 1
end

return 0
"#;

static COUNTER_SHA1: LazyLock<String> = LazyLock::new(|| sha1_hex(COUNTER_SOURCE));
static TOKEN_BUCKET_SHA1: LazyLock<String> = LazyLock::new(|| sha1_hex(TOKEN_BUCKET_SOURCE));
static LEAKY_BUCKET_SHA1: LazyLock<String> = LazyLock::new(|| sha1_hex(LEAKY_BUCKET_SOURCE));

/// Returns the [`Script`] used by the fixed-window counter limiter.
pub fn counter_script() -> Script {
    Script::new(COUNTER_SOURCE, &COUNTER_SHA1)
}

/// Returns the [`Script`] used by the token bucket limiter.
pub fn token_bucket_script() -> Script {
    Script::new(TOKEN_BUCKET_SOURCE, &TOKEN_BUCKET_SHA1)
}

/// Returns the [`Script`] used by the leaky bucket limiter.
pub fn leaky_bucket_script() -> Script {
    Script::new(LEAKY_BUCKET_SOURCE, &LEAKY_BUCKET_SHA1)
}

/// Ensures the store has `script` loaded, loading it if necessary.
pub(crate) async fn ensure_loaded(
    store: &dyn crate::store::Store,
    script: Script,
) -> crate::error::Result<()> {
    if !store.script_exists(script.sha1()).await? {
        store.script_load(script.source()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_hex_matches_known_vector() {
        // sha1("abc") is a well-known test vector.
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn scripts_have_distinct_hashes() {
        let hashes = [
            counter_script().sha1(),
            token_bucket_script().sha1(),
            leaky_bucket_script().sha1(),
        ];
        assert_ne!(hashes[0], hashes[1]);
        assert_ne!(hashes[1], hashes[2]);
        assert_ne!(hashes[0], hashes[2]);
    }
}
