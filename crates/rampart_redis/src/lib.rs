// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Redis-backed [`WindowStore`] for the `rampart` rate limiter.
//!
//! [`RedisWindowStore`] keeps each rate-limit window in a Redis sorted set, so every
//! service instance pointed at the same Redis shares one budget per key. The primitives
//! map one-to-one onto `ZREMRANGEBYSCORE`, `ZCARD`, `ZADD`, `EXPIRE` and `DEL`;
//! [`admit`][WindowStore::admit] runs all of them in a single Lua script, which Redis
//! executes atomically, so concurrent requests for one key can never be over-admitted.
//!
//! Connections go through a [`ConnectionManager`], which multiplexes requests over one
//! connection and reconnects after failures. Redis errors surface as
//! [`StoreError`]s, which the limiter reports as
//! [`rampart::rate_limit::Error::StoreUnavailable`].
//!
//! # Examples
//!
//! ```no_run
//! use rampart::rate_limit::{RateLimit, RateLimiter};
//! use rampart::{Clock, Context};
//! use rampart_redis::RedisWindowStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = Context::new(Clock::system());
//! let store = RedisWindowStore::connect("redis://127.0.0.1/").await?;
//! let limiter = RateLimiter::new(store, &context);
//!
//! let decision = limiter.is_allowed("u1:/convert", RateLimit::per_minute(100)).await?;
//! if !decision.allowed {
//!     // respond with 429
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::time::Duration;

use rampart::rate_limit::{AdmitOutcome, AdmitRequest, StoreError, WindowStore};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};

/// Prunes, counts and conditionally inserts in one atomic step.
///
/// `KEYS[1]` is the set; `ARGV` holds the window start, the new score, the limit,
/// the member and the expiry in seconds. Returns `{admitted, count}`.
const ADMIT_SCRIPT: &str = r"
local key = KEYS[1]
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. ARGV[1])
local count = redis.call('ZCARD', key)
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', key, ARGV[2], ARGV[4])
    redis.call('EXPIRE', key, ARGV[5])
    return {1, count}
end
return {0, count}
";

/// A [`WindowStore`] backed by Redis sorted sets.
///
/// Cloning is inexpensive; clones share the underlying connection.
#[derive(Clone)]
pub struct RedisWindowStore {
    connection: ConnectionManager,
    admit: Script,
}

impl Debug for RedisWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowStore").finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Connects to the Redis server at `url`, e.g. `redis://127.0.0.1:6379/0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = client.get_connection_manager().await.map_err(store_error)?;

        tracing::event!(
            name: "rampart_redis.connected",
            tracing::Level::DEBUG,
            redis.address = %client.get_connection_info().addr,
        );

        Ok(Self::from_connection_manager(connection))
    }

    /// Creates a store over an existing connection manager.
    #[must_use]
    pub fn from_connection_manager(connection: ConnectionManager) -> Self {
        Self {
            connection,
            admit: Script::new(ADMIT_SCRIPT),
        }
    }
}

impl WindowStore for RedisWindowStore {
    async fn remove_by_score(&self, key: &str, min: u64, max: u64) -> Result<u64, StoreError> {
        let mut connection = self.connection.clone();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(removed)
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        let mut connection = self.connection.clone();
        let count: u64 = redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(count)
    }

    async fn add(&self, key: &str, member: &str, score: u64) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: u64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds(ttl))
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn admit(&self, request: &AdmitRequest<'_>) -> Result<AdmitOutcome, StoreError> {
        let mut connection = self.connection.clone();
        let (admitted, count): (u8, u64) = self
            .admit
            .key(request.key)
            .arg(request.window_start)
            .arg(request.now)
            .arg(request.max_requests)
            .arg(request.member)
            .arg(ttl_seconds(request.ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(store_error)?;

        Ok(AdmitOutcome {
            admitted: admitted == 1,
            count,
        })
    }
}

fn store_error(error: RedisError) -> StoreError {
    StoreError::caused_by(error)
}

/// Redis expiries have whole-second resolution; partial seconds round up.
fn ttl_seconds(ttl: Duration) -> u64 {
    let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    seconds.max(1)
}
