//! Redis connection (ConnectionManager-based, every call bounded by a timeout)

use super::kv::CappedInsert;
use quizbank_core::{CacheError, CacheResult as Result};
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use std::time::Duration;

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 200;

/// KEYS[1] = key, ARGV = pattern, limit, value.
/// Returns 1 when written, 0 when the key exists, -1 when the pattern is full.
const INSERT_CAPPED_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
local seen = {}
local held = 0
local cursor = '0'
repeat
    local reply = redis.call('SCAN', cursor, 'MATCH', ARGV[1], 'COUNT', 1000)
    cursor = reply[1]
    for _, key in ipairs(reply[2]) do
        if not seen[key] then
            seen[key] = true
            held = held + 1
        end
    end
until cursor == '0'
if held >= tonumber(ARGV[2]) then
    return -1
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::Timeout(err.to_string())
    } else {
        CacheError::backend(err)
    }
}

impl RedisStore {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        tracing::info!("Connecting to Redis");
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(format!("connecting to redis took over {:?}", op_timeout)))?
            .map_err(map_redis_error)?;
        tracing::info!("Redis connection established");
        Ok(Self { conn, op_timeout })
    }

    async fn run<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(self.op_timeout, cmd.query_async::<_, T>(&mut conn))
            .await
            .map_err(|_| CacheError::Timeout(format!("redis call took over {:?}", self.op_timeout)))?
            .map_err(map_redis_error)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(&cmd).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run(&cmd).await
    }

    /// `SET key value NX`. Returns whether the value was written.
    pub async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        let reply: Option<String> = self.run(&cmd).await?;
        Ok(reply.is_some())
    }

    /// Count and write inside one server-side script, so concurrent callers
    /// cannot both pass the ceiling.
    pub async fn insert_capped(
        &self,
        key: &str,
        value: &str,
        pattern: &str,
        limit: usize,
    ) -> Result<CappedInsert> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(INSERT_CAPPED_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(pattern)
            .arg(limit)
            .arg(value);
        let reply: i64 = self.run(&cmd).await?;
        Ok(match reply {
            1 => CappedInsert::Inserted,
            0 => CappedInsert::Exists,
            _ => CappedInsert::Full,
        })
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.run(&cmd).await?;
        Ok(removed > 0)
    }

    /// Cursor-based `SCAN MATCH`. Keys are deduplicated and sorted.
    pub async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT);
            let (next, batch): (u64, Vec<String>) = self.run(&cmd).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// `BGSAVE`, or `BGSAVE SCHEDULE` when a rewrite is in progress.
    pub async fn bgsave(&self, schedule: bool) -> Result<()> {
        let mut cmd = redis::cmd("BGSAVE");
        if schedule {
            cmd.arg("SCHEDULE");
        }
        let reply: String = self.run(&cmd).await?;
        tracing::info!("Redis BGSAVE: {}", reply);
        Ok(())
    }
}
