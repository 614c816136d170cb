//! The working set of currently-announced IPs.
//!
//! A single [`parking_lot::RwLock`]-protected map is sufficient at the
//! expected scale of thousands of entries and DNS-event cadence; any
//! mutation, including refreshing `ts` via [`TtlCache::exists`], takes
//! the writer lock so updates are never torn.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub ip: IpAddr,
    pub domain: String,
    pub ts: DateTime<Utc>,
}

struct Inner {
    entries: RwLock<HashMap<IpAddr, CacheEntry>>,
}

/// Tracks announced IPs and fires an expiry callback exactly once per
/// entry once it has gone `ttl` without being re-observed or touched.
pub struct TtlCache {
    inner: Inner,
    ttl: Duration,
    on_expire: Box<dyn Fn(CacheEntry) + Send + Sync>,
}

impl TtlCache {
    pub fn new(ttl: Duration, on_expire: impl Fn(CacheEntry) + Send + Sync + 'static) -> Self {
        Self {
            inner: Inner {
                entries: RwLock::new(HashMap::new()),
            },
            ttl,
            on_expire: Box::new(on_expire),
        }
    }

    /// Insert or replace by `ip`, setting `ts` to now.
    pub fn add(&self, mut entry: CacheEntry) {
        entry.ts = Utc::now();
        self.inner.entries.write().insert(entry.ip, entry);
    }

    /// Insert verbatim, preserving the caller's `ts`. Used for warm-boot
    /// restoration from the persistent store, where the original
    /// observation time must be kept so the entry expires on schedule.
    pub fn add_with_ts(&self, entry: CacheEntry) {
        self.inner.entries.write().insert(entry.ip, entry);
    }

    /// Returns whether `ip` is present. If `touch` and present, advances
    /// `ts` to now without altering `domain`.
    pub fn exists(&self, ip: IpAddr, touch: bool) -> bool {
        let mut entries = self.inner.entries.write();
        match entries.get_mut(&ip) {
            Some(entry) => {
                if touch {
                    entry.ts = Utc::now();
                }
                true
            }
            None => false,
        }
    }

    /// A snapshot of all entries.
    pub fn get_all(&self) -> Vec<CacheEntry> {
        self.inner.entries.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Removes every entry whose age is `>= ttl` and invokes the expiry
    /// callback for each, after the entry has already been removed from
    /// the map so the callback can freely call back into other
    /// subsystems without risking reentrancy into this cache's lock.
    pub fn sweep_once(&self) {
        let now = Utc::now();
        let ttl_ms = self.ttl.as_millis() as i64;

        let expired: Vec<CacheEntry> = {
            let mut entries = self.inner.entries.write();
            let expired_ips: Vec<IpAddr> = entries
                .iter()
                .filter(|(_, entry)| now.signed_duration_since(entry.ts).num_milliseconds() >= ttl_ms)
                .map(|(ip, _)| *ip)
                .collect();
            expired_ips
                .into_iter()
                .filter_map(|ip| entries.remove(&ip))
                .collect()
        };

        for entry in expired {
            (self.on_expire)(entry);
        }
    }

    /// Spawns the once-per-minute expiry sweeper. The returned handle
    /// can be aborted on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                this.sweep_once();
            }
        })
    }
}
