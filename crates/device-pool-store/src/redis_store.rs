//! Redis storage implementation.
//!
//! This is the production backend: a networked store shared by every
//! process in the deployment. Batches run as `MULTI`/`EXEC` transactions and
//! the pop-and-move used by the server pool runs as a Lua script, so each
//! logical transition is a single atomic step on the server.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::batch::{Batch, Op};
use crate::error::Result;
use crate::Store;

/// Moves one arbitrary member of `KEYS[1]` into `KEYS[2]`.
const POP_INTO_SCRIPT: &str = r"
local member = redis.call('SPOP', KEYS[1])
if member then
    redis.call('SADD', KEYS[2], member)
end
return member
";

/// Redis-backed storage implementation.
///
/// Holds a multiplexed, auto-reconnecting connection. Cloning is cheap and
/// shares the underlying connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    pop_into: redis::Script,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://localhost:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the server cannot be reached, or
    /// `StoreError::Database` if the URL is invalid.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::debug!(url = %url, "Connected to Redis");
        Ok(Self {
            conn,
            pop_into: redis::Script::new(POP_INTO_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Convert a TTL to whole milliseconds for `PX`, never rounding down to zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>> {
        let mut conn = self.conn();
        let members: BTreeSet<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn pop_into(&self, from: &str, to: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let member: Option<String> = self
            .pop_into
            .key(from)
            .key(to)
            .invoke_async(&mut conn)
            .await?;
        Ok(member)
    }

    async fn execute(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            match op {
                Op::HashSet { key, fields } => {
                    pipe.hset_multiple(key, fields.as_slice()).ignore();
                }
                Op::SetAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                Op::SetRemove { key, member } => {
                    pipe.srem(key, member).ignore();
                }
                Op::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
