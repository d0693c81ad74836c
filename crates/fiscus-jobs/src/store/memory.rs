//! In-memory store implementation.
//!
//! Mirrors the Redis backend's atomicity per operation with a single mutex.
//! TTL expiry is resolved lazily against the injected clock, which lets
//! tests freeze and advance time.

use super::StoreBackend;
use crate::error::JobResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fiscus_core::{Clock, SharedClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, (String, Option<DateTime<Utc>>)>,
    sorted: HashMap<String, Vec<(f64, String)>>,
    lists: HashMap<String, Vec<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl Inner {
    fn live_string(&mut self, key: &str, now: DateTime<Utc>) -> Option<&String> {
        if let Some((_, Some(expires_at))) = self.strings.get(key) {
            if *expires_at <= now {
                self.strings.remove(key);
                return None;
            }
        }
        self.strings.get(key).map(|(v, _)| v)
    }
}

/// In-memory store backend.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: SharedClock,
}

impl MemoryStore {
    /// Create a store reading TTLs from the given clock.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Subscribe to a pub-sub channel (test observation hook).
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut inner = self.inner.lock();
        inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| {
            self.clock.now() + chrono::Duration::milliseconds(ttl.as_millis() as i64)
        })
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        let mut inner = self.inner.lock();
        let set = inner.sorted.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.push((score, member.to_string()));
        Ok(())
    }

    async fn zpop_min(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sorted.get_mut(key) else {
            return Ok(None);
        };
        let min_idx = set
            .iter()
            .enumerate()
            .min_by(|(_, (sa, ma)), (_, (sb, mb))| {
                sa.partial_cmp(sb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ma.cmp(mb))
            })
            .map(|(i, _)| i);
        Ok(min_idx.map(|i| {
            let (score, member) = set.remove(i);
            (member, score)
        }))
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> JobResult<Vec<String>> {
        let inner = self.inner.lock();
        let Some(set) = inner.sorted.get(key) else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<(f64, String)> = set
            .iter()
            .filter(|(score, _)| *score >= min && *score <= max)
            .cloned()
            .collect();
        matching.sort_by(|(sa, ma), (sb, mb)| {
            sa.partial_cmp(sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ma.cmp(mb))
        });
        Ok(matching.into_iter().map(|(_, m)| m).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> JobResult<bool> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sorted.get_mut(key) else {
            return Ok(false);
        };
        let before = set.len();
        set.retain(|(_, m)| m != member);
        Ok(set.len() < before)
    }

    async fn zcard(&self, key: &str) -> JobResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.sorted.get(key).map_or(0, |s| s.len() as u64))
    }

    async fn lpush(&self, key: &str, value: &str) -> JobResult<u64> {
        let mut inner = self.inner.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.insert(0, value.to_string());
        Ok(list.len() as u64)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> JobResult<Vec<String>> {
        let inner = self.inner.lock();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let resolve = |idx: isize| -> isize {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx
            }
        };
        let start = resolve(start);
        let stop = resolve(stop).min(len - 1);
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list[start as usize..=stop as usize].to_vec())
    }

    async fn lrem(&self, key: &str, value: &str) -> JobResult<u64> {
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|v| v != value);
        Ok((before - list.len()) as u64)
    }

    async fn llen(&self, key: &str) -> JobResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> JobResult<()> {
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(());
        };
        let len = list.len() as isize;
        let resolve = |idx: isize| -> isize {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx
            }
        };
        let start = resolve(start);
        let stop = resolve(stop).min(len - 1);
        if start > stop || start >= len {
            list.clear();
        } else {
            *list = list[start as usize..=stop as usize].to_vec();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> JobResult<Option<String>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        Ok(inner.live_string(key, now).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> JobResult<()> {
        let expires_at = self.expires_at(ttl);
        let mut inner = self.inner.lock();
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> JobResult<bool> {
        let now = self.clock.now();
        let expires_at = self.expires_at(ttl);
        let mut inner = self.inner.lock();
        if inner.live_string(key, now).is_some() {
            return Ok(false);
        }
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(true)
    }

    async fn incr(&self, key: &str) -> JobResult<i64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let current = inner
            .live_string(key, now)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        inner
            .strings
            .insert(key.to_string(), (next.to_string(), None));
        Ok(next)
    }

    async fn del(&self, key: &str) -> JobResult<bool> {
        let mut inner = self.inner.lock();
        let existed = inner.strings.remove(key).is_some()
            | inner.sorted.remove(key).is_some()
            | inner.lists.remove(key).is_some();
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> JobResult<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        Ok(inner.live_string(key, now).is_some()
            || inner.sorted.contains_key(key)
            || inner.lists.contains_key(key))
    }

    async fn publish(&self, channel: &str, message: &str) -> JobResult<()> {
        let mut inner = self.inner.lock();
        if let Some(sender) = inner.channels.get(channel) {
            let _ = sender.send(message.to_string());
        } else {
            // Create the channel so late subscribers see future messages.
            inner
                .channels
                .insert(channel.to_string(), broadcast::channel(256).0);
        }
        Ok(())
    }

    async fn ping(&self) -> JobResult<()> {
        Ok(())
    }
}
