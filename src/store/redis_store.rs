//! Redis-backed [`StateStore`] over a shared connection manager.

use super::{PendingEntry, StateStore, StreamMessage};
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashMap;

#[derive(Clone)]
pub struct RedisStateStore {
    manager: ConnectionManager,
}

impl RedisStateStore {
    /// Connect and build the process-wide connection manager.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(RedisStateStore { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn value_to_string(value: &redis::Value) -> Option<String> {
    redis::from_redis_value::<String>(value).ok()
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn();
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(ttl as u64))
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added == 1)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let member: bool = conn.sismember(key, member).await?;
        Ok(member)
    }

    async fn stream_add(&self, stream: &str, fields: Vec<(String, String)>) -> Result<String> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in &fields {
            cmd.arg(name).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await?;
        Ok(id)
    }

    async fn group_create(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn();
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(_) => Ok(()),
            // Group already exists.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &options)
            .await?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut fields = HashMap::new();
                for (name, value) in &entry.map {
                    if let Some(s) = value_to_string(value) {
                        fields.insert(name.clone(), s);
                    }
                }
                messages.push(StreamMessage {
                    id: entry.id.clone(),
                    fields,
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", count)
            .await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|entry| PendingEntry {
                id: entry.id,
                idle_ms: entry.last_delivered_ms as u64,
                deliveries: entry.times_delivered as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle_ms as usize, ids)
            .await?;
        let mut messages = Vec::new();
        for entry in reply.ids {
            let mut fields = HashMap::new();
            for (name, value) in &entry.map {
                if let Some(s) = value_to_string(value) {
                    fields.insert(name.clone(), s);
                }
            }
            messages.push(StreamMessage {
                id: entry.id.clone(),
                fields,
            });
        }
        Ok(messages)
    }
}
