//! In-memory store for single-process deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::ThrottleStore;
use crate::error::Result;
use crate::throttle::ThrottleRecord;

/// Throttle records kept in a concurrent map of key to expiry times.
///
/// Operations on one key hold that key's shard lock, so
/// `insert_if_below` is atomic per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Vec<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records held, live or not.
    pub fn record_count(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.clear();
    }
}

fn live_count(expiries: &[i64], now: i64) -> u64 {
    expiries.iter().filter(|&&expire_at| expire_at > now).count() as u64
}

#[async_trait]
impl ThrottleStore for MemoryStore {
    async fn insert(&self, record: ThrottleRecord) -> Result<()> {
        self.records
            .entry(record.key)
            .or_default()
            .push(record.expire_at);
        Ok(())
    }

    async fn count_live(&self, key: &str, now: i64) -> Result<u64> {
        Ok(self
            .records
            .get(key)
            .map(|expiries| live_count(&expiries, now))
            .unwrap_or(0))
    }

    async fn delete_expired(&self, now: i64) -> Result<u64> {
        let mut removed = 0u64;
        self.records.retain(|_, expiries| {
            let before = expiries.len();
            expiries.retain(|&expire_at| expire_at > now);
            removed += (before - expiries.len()) as u64;
            !expiries.is_empty()
        });
        Ok(removed)
    }

    async fn insert_if_below(&self, record: ThrottleRecord, allowed: u64, now: i64) -> Result<bool> {
        let mut expiries = self.records.entry(record.key).or_default();
        if live_count(&expiries, now) >= allowed {
            return Ok(false);
        }
        expiries.push(record.expire_at);
        Ok(true)
    }
}
