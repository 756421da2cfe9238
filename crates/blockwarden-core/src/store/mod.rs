//! Durable per-IP remediation state.
//!
//! The [`BlockRecord`] is the unit of consistency for the whole engine:
//! every transition re-fetches the latest record, mutates it, and writes
//! it back. Records are created lazily on the first event for an IP and
//! never deleted.

pub mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use sqlite::SqliteStore;

/// Persistent remediation state for a single IP address.
///
/// Timestamps are Unix epoch seconds; `blocked_at == 0` means the IP is
/// not currently blocked. `block_count` is cumulative and never resets,
/// which is what makes cooldowns escalate across episodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub ip: String,
    pub blocked_at: i64,
    pub unblock_after: i64,
    pub block_count: i64,
    pub trigger_count: i64,
    pub last_event_time: i64,
    pub action_taken: bool,
}

impl BlockRecord {
    /// Whether a remediation block is currently in effect.
    pub fn is_blocked(&self) -> bool {
        self.blocked_at > 0
    }
}

/// CRUD surface the engine needs from its record store.
///
/// `get_or_create` must create a zero-valued record exactly once per
/// first-seen IP and must be safe to call concurrently for different IPs.
pub trait RecordStore: Send + Sync {
    fn get_or_create(&self, ip: &str) -> Result<BlockRecord>;
    fn update(&self, record: &BlockRecord) -> Result<()>;
    fn list_all(&self) -> Result<Vec<BlockRecord>>;
}

/// In-memory record store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, BlockRecord>>,
}

impl RecordStore for MemoryStore {
    fn get_or_create(&self, ip: &str) -> Result<BlockRecord> {
        let mut records = self.records.lock().expect("memory store poisoned");
        let record = records.entry(ip.to_string()).or_insert_with(|| BlockRecord {
            ip: ip.to_string(),
            ..BlockRecord::default()
        });
        Ok(record.clone())
    }

    fn update(&self, record: &BlockRecord) -> Result<()> {
        let mut records = self.records.lock().expect("memory store poisoned");
        records.insert(record.ip.clone(), record.clone());
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<BlockRecord>> {
        let records = self.records.lock().expect("memory store poisoned");
        Ok(records.values().cloned().collect())
    }
}
