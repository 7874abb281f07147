//! Persistent cache of IP addresses confirmed to belong to a blocked ASN.
//!
//! Entries are created the first time the reputation classifier confirms a
//! block and are never removed by this crate. Inserts are idempotent: one
//! record per IP, no matter how many concurrent requests confirm it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Error from a blocked-IP store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// A cached blocked IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedIpRecord {
    pub ip: String,
    /// Unix seconds when the block was first confirmed.
    pub created_at: u64,
}

impl BlockedIpRecord {
    fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            created_at: unix_now(),
        }
    }
}

/// Storage for blocked IPs, keyed by the IP string.
#[async_trait]
pub trait BlockedIpStore: Send + Sync {
    /// Check whether `ip` has a record.
    async fn exists(&self, ip: &str) -> Result<bool, StoreError>;

    /// Insert a record for `ip` unless one exists.
    ///
    /// Returns `true` if a new record was created.
    async fn upsert(&self, ip: &str) -> Result<bool, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryBlockedIpStore {
    records: RwLock<BTreeMap<String, BlockedIpRecord>>,
}

impl MemoryBlockedIpStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, ip: &str) -> Option<BlockedIpRecord> {
        self.records.read().ok()?.get(ip).cloned()
    }
}

#[async_trait]
impl BlockedIpStore for MemoryBlockedIpStore {
    async fn exists(&self, ip: &str) -> Result<bool, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.contains_key(ip))
    }

    async fn upsert(&self, ip: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.contains_key(ip) {
            return Ok(false);
        }
        records.insert(ip.to_string(), BlockedIpRecord::new(ip));
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Store persisted as a JSON array of records.
///
/// The whole file is loaded on open and rewritten (via a temporary file and
/// rename) on every new record.
pub struct FileBlockedIpStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, BlockedIpRecord>>,
}

impl FileBlockedIpStore {
    /// Open the store at `path`, creating it lazily on first insert.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            load_records(&path)?
        } else {
            BTreeMap::new()
        };

        info!(
            path = %path.display(),
            entries = records.len(),
            "Blocked IP cache loaded"
        );

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, records: &BTreeMap<String, BlockedIpRecord>) -> Result<(), StoreError> {
        let rows: Vec<&BlockedIpRecord> = records.values().collect();
        let content = serde_json::to_string_pretty(&rows)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

#[async_trait]
impl BlockedIpStore for FileBlockedIpStore {
    async fn exists(&self, ip: &str) -> Result<bool, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.contains_key(ip))
    }

    async fn upsert(&self, ip: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.contains_key(ip) {
            return Ok(false);
        }

        records.insert(ip.to_string(), BlockedIpRecord::new(ip));
        if let Err(e) = self.persist(&records) {
            // Keep memory and disk in agreement so a retry writes again.
            records.remove(ip);
            return Err(e);
        }

        debug!(ip = %ip, path = %self.path.display(), "Blocked IP persisted");
        Ok(true)
    }

    fn name(&self) -> &str {
        "file"
    }
}

fn load_records(path: &Path) -> Result<BTreeMap<String, BlockedIpRecord>, StoreError> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let rows: Vec<BlockedIpRecord> = serde_json::from_str(&content)?;
    // First record wins for duplicated keys.
    let mut records = BTreeMap::new();
    for row in rows {
        records.entry(row.ip.clone()).or_insert(row);
    }

    Ok(records)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
