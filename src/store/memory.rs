//! In-process [`StateStore`] with real TTL and consumer-group semantics.
//!
//! Used by the test suite and by `--dev` runs without a Redis instance. Key
//! expiry is wall-clock based so TTL-dependent behavior (brute-force windows,
//! phase flags, blocklist entries) behaves the same as the Redis store.

use super::{PendingEntry, StateStore, StreamMessage};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

#[derive(Debug, Clone)]
struct PendingState {
    deliveries: u64,
    last_delivery: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    next_index: usize,
    pending: HashMap<String, PendingState>,
}

#[derive(Debug, Default)]
struct MemStream {
    entries: Vec<(String, HashMap<String, String>)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, ValueEntry>,
    sets: HashMap<String, HashSet<String>>,
    streams: HashMap<String, MemStream>,
}

impl Inner {
    fn purge(&mut self, key: &str) {
        if let Some(entry) = self.kv.get(key) {
            if entry.expired() {
                self.kv.remove(key);
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge(key);
        let entry = inner.kv.entry(key.to_string()).or_insert(ValueEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let count = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge(key);
        if let Some(entry) = inner.kv.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.kv.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(seconds)),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge(key);
        Ok(inner.kv.get(key).map(|e| e.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge(key);
        Ok(inner.kv.contains_key(key) || inner.sets.contains_key(key))
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.kv.remove(key);
        inner.sets.remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge(key);
        let remaining = inner.kv.get(key).and_then(|e| e.expires_at).map(|at| {
            at.saturating_duration_since(Instant::now()).as_secs()
        });
        Ok(remaining)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn stream_add(&self, stream: &str, fields: Vec<(String, String)>) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let mem_stream = inner.streams.entry(stream.to_string()).or_default();
        mem_stream.next_seq += 1;
        let id = format!("{}-0", mem_stream.next_seq);
        mem_stream
            .entries
            .push((id.clone(), fields.into_iter().collect()));
        Ok(id)
    }

    async fn group_create(&self, stream: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mem_stream = inner.streams.entry(stream.to_string()).or_default();
        mem_stream.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                let mem_stream = inner.streams.entry(stream.to_string()).or_default();
                let MemStream {
                    entries, groups, ..
                } = mem_stream;
                let group_state = groups.entry(group.to_string()).or_default();

                if group_state.next_index < entries.len() {
                    let mut messages = Vec::new();
                    while group_state.next_index < entries.len() && messages.len() < count {
                        let (id, fields) = entries[group_state.next_index].clone();
                        group_state.pending.insert(
                            id.clone(),
                            PendingState {
                                deliveries: 1,
                                last_delivery: Instant::now(),
                            },
                        );
                        group_state.next_index += 1;
                        messages.push(StreamMessage { id, fields });
                    }
                    return Ok(messages);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mem_stream) = inner.streams.get_mut(stream) {
            if let Some(group_state) = mem_stream.groups.get_mut(group) {
                group_state.pending.remove(id);
            }
        }
        Ok(())
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<PendingEntry> = inner
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .map(|(id, state)| PendingEntry {
                        id: id.clone(),
                        idle_ms: state.last_delivery.elapsed().as_millis() as u64,
                        deliveries: state.deliveries,
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.truncate(count);
        Ok(entries)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamMessage>> {
        let mut inner = self.inner.lock().unwrap();
        let mem_stream = match inner.streams.get_mut(stream) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let entries = mem_stream.entries.clone();
        let group_state = match mem_stream.groups.get_mut(group) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };

        let mut messages = Vec::new();
        for id in ids {
            if let Some(state) = group_state.pending.get_mut(id) {
                if state.last_delivery.elapsed().as_millis() as u64 >= min_idle_ms {
                    state.deliveries += 1;
                    state.last_delivery = Instant::now();
                    if let Some((_, fields)) =
                        entries.iter().find(|(entry_id, _)| entry_id == id)
                    {
                        messages.push(StreamMessage {
                            id: id.clone(),
                            fields: fields.clone(),
                        });
                    }
                }
            }
        }
        Ok(messages)
    }
}
