//! The opaque persistent key/value store the core consumes: entries
//! keyed by raw IP bytes, values holding everything but the key
//! itself. Backed by RocksDB, with blocking calls pushed onto
//! `spawn_blocking` and a `prometheus::IntGauge` tracking entry count.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::IntGauge;
use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("failed to (de)serialize stored entry: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub ip: IpAddr,
    pub domain: String,
    pub ts: DateTime<Utc>,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn add(&self, entry: StoredEntry) -> Result<(), StoreError>;
    async fn del(&self, ip: IpAddr) -> Result<(), StoreError>;
    async fn fetch_all(&self) -> Result<Vec<StoredEntry>, StoreError>;
    async fn close(self: Box<Self>) -> Result<(), StoreError>;
}

fn ip_key(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn key_to_ip(key: &[u8]) -> Option<IpAddr> {
    match key.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(key);
            Some(IpAddr::from(octets))
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(key);
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

/// Serialized form stored under each key: everything except the IP,
/// which lives in the key itself.
#[derive(Serialize, Deserialize)]
struct Value {
    domain: String,
    ts: DateTime<Utc>,
}

/// A `PersistentStore` that keeps nothing. Used when the `Cache`
/// config key is absent: the daemon still runs, it just can't warm
/// boot and every restart re-learns its announced IPs from DNS
/// traffic.
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl PersistentStore for NullStore {
    async fn add(&self, _entry: StoredEntry) -> Result<(), StoreError> {
        Ok(())
    }

    async fn del(&self, _ip: IpAddr) -> Result<(), StoreError> {
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<StoredEntry>, StoreError> {
        Ok(Vec::new())
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct RocksStore {
    db: Arc<DB>,
    entry_count: IntGauge,
}

impl RocksStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;

        let entry_count = IntGauge::new(
            "dnsbgpd_cache_store_entries",
            "number of entries in the persistent cache store",
        )
        .expect("creating entry_count gauge");
        let _ = prometheus::register(Box::new(entry_count.clone()));

        let store = Self {
            db: Arc::new(db),
            entry_count,
        };
        store.refresh_entry_count();
        Ok(store)
    }

    fn refresh_entry_count(&self) {
        let count = self.db.iterator(rocksdb::IteratorMode::Start).count();
        self.entry_count.set(count as i64);
    }
}

#[async_trait]
impl PersistentStore for RocksStore {
    async fn add(&self, entry: StoredEntry) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        let key = ip_key(entry.ip);
        let value = serde_json::to_vec(&Value {
            domain: entry.domain,
            ts: entry.ts,
        })?;
        tokio::task::spawn_blocking(move || db.put(key, value))
            .await??;
        self.refresh_entry_count();
        Ok(())
    }

    async fn del(&self, ip: IpAddr) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        let key = ip_key(ip);
        tokio::task::spawn_blocking(move || db.delete(key))
            .await??;
        self.refresh_entry_count();
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let db = Arc::clone(&self.db);
        let rows: Result<Vec<(Box<[u8]>, Box<[u8]>)>, rocksdb::Error> = tokio::task::spawn_blocking(
            move || db.iterator(rocksdb::IteratorMode::Start).collect(),
        )
        .await?;

        let mut out = Vec::new();
        for (key, value) in rows? {
            let Some(ip) = key_to_ip(&key) else {
                tracing::warn!(len = key.len(), "skipping malformed cache-store key");
                continue;
            };
            let decoded: Value = serde_json::from_slice(&value)?;
            out.push(StoredEntry {
                ip,
                domain: decoded.domain,
                ts: decoded.ts,
            });
        }
        Ok(out)
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the `Arc<DB>` flushes and closes RocksDB; nothing
        // further to do once every clone of it is gone.
        Ok(())
    }
}
