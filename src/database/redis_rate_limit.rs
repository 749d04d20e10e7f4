use crate::error::app_error::AppError;
use crate::models::rate_limit::{RateLimitEntry, RateLimitPolicy};
use crate::service::rate_limiter::RateLimitStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::LazyLock;

/// Same transition as `apply_attempt`, executed atomically inside Redis.
/// Times are unix milliseconds; `blocked_until = 0` means not blocked.
const RECORD_ATTEMPT_LUA: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local block = tonumber(ARGV[3])
local max_attempts = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'attempts', 'window_start', 'last_attempt', 'blocked_until')
local attempts = tonumber(state[1])
local window_start = tonumber(state[2]) or now
local last_attempt = tonumber(state[3]) or now
local blocked_until = tonumber(state[4]) or 0

local expired = attempts == nil
if not expired then
  if blocked_until > 0 then
    expired = now >= blocked_until
  else
    expired = (now - window_start) >= window
  end
end

if expired then
  attempts = 0
  window_start = now
  last_attempt = now
  blocked_until = 0
end

if not (blocked_until > 0 and now < blocked_until) then
  attempts = attempts + 1
  last_attempt = now
  if attempts >= max_attempts then
    blocked_until = now + block
  end
  redis.call('HSET', KEYS[1], 'attempts', attempts, 'window_start', window_start, 'last_attempt', last_attempt, 'blocked_until', blocked_until)
  redis.call('PEXPIRE', KEYS[1], ttl)
end

return {attempts, window_start, last_attempt, blocked_until}
"#;

static RECORD_ATTEMPT: LazyLock<Script> = LazyLock::new(|| Script::new(RECORD_ATTEMPT_LUA));

const FIELDS: [&str; 4] = ["attempts", "window_start", "last_attempt", "blocked_until"];

/// Limiter entries shared between instances through Redis hashes.
///
/// Keys carry a TTL of max(window, block) so expired entries disappear on their own.
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(key_prefix = key_prefix, "redis rate limit store connected");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.key_prefix, identifier)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn entry_from_fields(identifier: &str, attempts: i64, window_start: i64, last_attempt: i64, blocked_until: i64) -> RateLimitEntry {
    RateLimitEntry {
        identifier: identifier.to_string(),
        attempts: attempts.max(0) as u32,
        window_start: from_millis(window_start),
        last_attempt: from_millis(last_attempt),
        blocked_until: (blocked_until > 0).then(|| from_millis(blocked_until)),
    }
}

fn key_ttl_ms(policy: &RateLimitPolicy) -> i64 {
    policy.window.max(policy.block_duration).num_milliseconds().max(1)
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn get(&self, identifier: &str) -> Result<Option<RateLimitEntry>, AppError> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<i64>> = redis::cmd("HMGET").arg(self.key(identifier)).arg(&FIELDS[..]).query_async(&mut conn).await?;

        let entry = match values.as_slice() {
            [Some(attempts), window_start, last_attempt, blocked_until] => Some(entry_from_fields(
                identifier,
                *attempts,
                window_start.unwrap_or(0),
                last_attempt.unwrap_or(0),
                blocked_until.unwrap_or(0),
            )),
            _ => None,
        };
        Ok(entry)
    }

    async fn record_attempt(&self, identifier: &str, now: DateTime<Utc>, policy: &RateLimitPolicy) -> Result<RateLimitEntry, AppError> {
        let mut conn = self.conn.clone();
        let (attempts, window_start, last_attempt, blocked_until): (i64, i64, i64, i64) = RECORD_ATTEMPT
            .key(self.key(identifier))
            .arg(now.timestamp_millis())
            .arg(policy.window.num_milliseconds())
            .arg(policy.block_duration.num_milliseconds())
            .arg(policy.max_attempts)
            .arg(key_ttl_ms(policy))
            .invoke_async(&mut conn)
            .await?;

        Ok(entry_from_fields(identifier, attempts, window_start, last_attempt, blocked_until))
    }

    async fn remove(&self, identifier: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(self.key(identifier)).query_async(&mut conn).await?;
        Ok(())
    }

    async fn remove_expired(&self, _now: DateTime<Utc>, _policy: &RateLimitPolicy) -> Result<usize, AppError> {
        // Key TTLs handle expiry.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ttl_covers_longest_of_window_and_block() {
        let policy = RateLimitPolicy::default();
        assert_eq!(key_ttl_ms(&policy), Duration::minutes(30).num_milliseconds());
    }

    #[test]
    fn zero_blocked_until_means_unblocked() {
        let now = Utc::now();
        let entry = entry_from_fields("fp:a@example.com", 2, now.timestamp_millis(), now.timestamp_millis(), 0);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.blocked_until, None);
        assert_eq!(entry.window_start.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_record_attempt_blocks_on_nth_attempt() {
        let store = RedisRateLimitStore::connect("redis://127.0.0.1:6379", "signin:test").await.unwrap();
        let policy = RateLimitPolicy::default();
        let identifier = format!("fp:{}@example.com", uuid::Uuid::new_v4());
        let now = Utc::now();

        for _ in 0..4 {
            store.record_attempt(&identifier, now, &policy).await.unwrap();
        }
        let entry = store.record_attempt(&identifier, now, &policy).await.unwrap();
        assert!(entry.is_blocked(now));

        store.remove(&identifier).await.unwrap();
        assert!(store.get(&identifier).await.unwrap().is_none());
    }
}
