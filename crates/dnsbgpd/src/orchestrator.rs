//! Wires the five core subsystems (domain matcher, answer parser,
//! TTL cache, BGP speaker, peer syncer) into the running daemon: warm
//! boot, DNS ingest, admission, and expiry.

use crate::bgp_actor::BgpHandle;
use answer_parser::{parse_answer, Candidate};
use anyhow::Context;
use bgp_speaker::{BgpConfig as SpeakerBgpConfig, BgpSpeaker};
use cache_store::{NullStore, PersistentStore, RocksStore, StoredEntry};
use chrono::Utc;
use dnsbgpd_config::Config;
use domain_matcher::DomainMatcher;
use peer_sync::{AdmitFn, GetAllFn, PeerEntry, PeerSync, SyncClient, SyncObserver, SyncTickReport};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use ttl_cache::{CacheEntry, TtlCache};

/// The handles that DNS ingest, peer admission and cache expiry all
/// need. Every field is cheap to clone, so this is passed by value
/// into spawned tasks and closures rather than threaded through as a
/// reference with an explicit lifetime.
#[derive(Clone)]
struct Shared {
    matcher: Arc<DomainMatcher>,
    cache: Arc<TtlCache>,
    bgp: BgpHandle,
    store: Arc<dyn PersistentStore>,
    sync_client: SyncClient,
    peers: Arc<Vec<SocketAddr>>,
}

pub struct Orchestrator {
    shared: Shared,
    bgp_task: tokio::task::JoinHandle<()>,
    peer_sync: PeerSync,
    sweeper: tokio::task::JoinHandle<()>,
    dnstap_workers: Vec<tokio::task::JoinHandle<()>>,
    signal_task: tokio::task::JoinHandle<()>,
}

/// `admit(entry, touch)`: if the cache already has `entry.ip`, a
/// `touch` refreshes `ts` and writes through; a non-touch (peer-
/// sourced, already known) is a no-op. Otherwise the entry is new:
/// announce via BGP, insert into the cache, write through, report
/// "new" so the caller can decide whether to rebroadcast.
///
/// The persistent-store write happens on a detached task: a
/// `StoreError` is logged and never blocks the in-memory path, which
/// remains authoritative.
fn admit_core(shared: &Shared, entry: CacheEntry, touch: bool) -> bool {
    if shared.cache.exists(entry.ip, touch) {
        if touch {
            spawn_store_add(&shared.store, &entry);
        }
        false
    } else {
        shared.bgp.add_host(entry.ip);
        shared.cache.add_with_ts(entry.clone());
        spawn_store_add(&shared.store, &entry);
        true
    }
}

fn spawn_store_add(store: &Arc<dyn PersistentStore>, entry: &CacheEntry) {
    let store = Arc::clone(store);
    let stored = StoredEntry {
        ip: entry.ip,
        domain: entry.domain.clone(),
        ts: entry.ts,
    };
    let ip = entry.ip;
    tokio::spawn(async move {
        if let Err(err) = store.add(stored).await {
            tracing::warn!(%err, %ip, "failed to persist cache entry");
        }
    });
}

/// `ingest`: drop candidates outside the allow-list,
/// otherwise admit with `touch = true` and, only for entries that are
/// genuinely new, broadcast to peers. Peer-sourced admissions never
/// reach this function, which is what keeps an entry from cycling
/// back through the mesh.
fn ingest(shared: &Shared, candidate: Candidate) {
    if !shared.matcher.has(&candidate.domain) {
        return;
    }
    let domain = candidate.domain.to_lowercase();
    let entry = CacheEntry {
        ip: candidate.ip,
        domain,
        ts: Utc::now(),
    };
    let peer_entry = PeerEntry {
        ip: entry.ip,
        domain: entry.domain.clone(),
        ts: entry.ts,
    };

    if admit_core(shared, entry, true) {
        let client = shared.sync_client.clone();
        let peers = Arc::clone(&shared.peers);
        tokio::spawn(async move {
            if let Err(err) = peer_sync::broadcast(&client, &peers, &peer_entry).await {
                tracing::warn!(%err, "broadcast to peers failed, will converge on next sync tick");
            }
        });
    }
}

impl Orchestrator {
    pub async fn start(config_path: &Path) -> anyhow::Result<Self> {
        let config = Config::load(config_path).context("loading configuration")?;

        let (matcher, stats) = DomainMatcher::from_file(&config.domains).with_context(|| {
            format!(
                "loading domain allow-list from {}",
                config.domains.display()
            )
        })?;
        tracing::info!(
            accepted = stats.accepted,
            skipped = stats.skipped_invalid,
            pruned = stats.pruned_descendants,
            "loaded domain allow-list"
        );
        let matcher = Arc::new(matcher);

        let store: Arc<dyn PersistentStore> = match &config.cache {
            Some(path) => {
                Arc::new(RocksStore::open(path).context("opening persistent cache store")?)
            }
            None => {
                tracing::warn!(
                    "no Cache path configured; announcements will not survive a restart"
                );
                Arc::new(NullStore)
            }
        };

        let source_ip_v4 = config.bgp.source_ip.and_then(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        });
        let bgp_config = SpeakerBgpConfig::new(
            config.bgp.asn,
            config.bgp.router_id,
            config.bgp_peers(),
            source_ip_v4,
            config.bgp.next_hop,
            config.bgp.next_hop_ipv6,
            config.ipv6,
        )
        .context("validating BGP configuration")?;
        let speaker = BgpSpeaker::start(bgp_config).context("starting BGP speaker")?;
        let (bgp, bgp_task) = BgpHandle::spawn(speaker);

        let cache = {
            let bgp = bgp.clone();
            let store = Arc::clone(&store);
            Arc::new(TtlCache::new(config.ttl, move |entry: CacheEntry| {
                // Runs under the cache's exclusive lock, already
                // released by the time this closure is called (the
                // entry has been removed). Must not touch the cache
                // again; BGP withdrawal and the store delete are both
                // pushed onto detached tasks.
                bgp.del_host(entry.ip);
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    if let Err(err) = store.del(entry.ip).await {
                        tracing::warn!(
                            %err,
                            ip = %entry.ip,
                            "failed to delete expired entry from persistent store"
                        );
                    }
                });
            }))
        };
        let sweeper = cache.spawn_sweeper();

        let restored = warm_boot(&store, &matcher, &cache, &bgp, config.ttl).await?;
        tracing::info!(restored, "warm boot complete");

        let sync_client = SyncClient::new();
        let mut peers = Vec::new();
        for peer in &config.syncer.peers {
            match peer.ip_and_port() {
                Some(addr) => peers.push(addr),
                None => {
                    tracing::warn!(%peer, "ignoring syncer peer with no resolvable host:port")
                }
            }
        }
        let peers = Arc::new(peers);

        let shared = Shared {
            matcher: Arc::clone(&matcher),
            cache: Arc::clone(&cache),
            bgp: bgp.clone(),
            store: Arc::clone(&store),
            sync_client: sync_client.clone(),
            peers: Arc::clone(&peers),
        };

        let get_all_fn: GetAllFn = {
            let cache = Arc::clone(&cache);
            Arc::new(move || {
                cache
                    .get_all()
                    .into_iter()
                    .map(|e| PeerEntry {
                        ip: e.ip,
                        domain: e.domain,
                        ts: e.ts,
                    })
                    .collect()
            })
        };
        let admit_fn: AdmitFn = {
            let shared = shared.clone();
            Arc::new(move |pe: PeerEntry, touch: bool| {
                let entry = CacheEntry {
                    ip: pe.ip,
                    domain: pe.domain,
                    ts: pe.ts,
                };
                admit_core(&shared, entry, touch)
            })
        };
        let observer: SyncObserver = Arc::new(|report: SyncTickReport| match report.error {
            Some(err) => tracing::warn!(peer = %report.peer, %err, "peer sync tick failed"),
            None if report.inserted > 0 => {
                tracing::debug!(peer = %report.peer, inserted = report.inserted, "peer sync tick")
            }
            None => {}
        });

        let peer_sync = PeerSync::start(
            config.syncer.listen,
            (*peers).clone(),
            config.syncer.sync_interval,
            get_all_fn,
            admit_fn,
            observer,
        );

        let perm = config.dnstap.perm.map(|p| p.0);
        let rx = dnstap_source::listen(config.dnstap.listen.clone(), perm)
            .await
            .context("binding DNSTap listener")?;
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let ipv6 = config.ipv6;
        let mut dnstap_workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = Arc::clone(&rx);
            let shared = shared.clone();
            dnstap_workers.push(tokio::spawn(async move {
                loop {
                    let frame = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(frame) = frame else {
                        return;
                    };
                    match parse_answer(&frame, ipv6) {
                        Ok(candidates) => {
                            for candidate in candidates {
                                ingest(&shared, candidate);
                            }
                        }
                        Err(err) => tracing::warn!(%err, "dropping malformed DNS answer"),
                    }
                }
            }));
        }

        let signal_task = crate::signals::spawn(
            Arc::clone(&matcher),
            config.domains.clone(),
            Arc::clone(&cache),
        );

        Ok(Self {
            shared,
            bgp_task,
            peer_sync,
            sweeper,
            dnstap_workers,
            signal_task,
        })
    }

    /// Closes PeerSync and the BGP speaker within their respective
    /// deadlines. The decoder workers, sweeper and signal loop
    /// have no graceful-shutdown contract of their own; the process
    /// is exiting, so they're simply aborted.
    pub async fn shutdown(self) {
        self.signal_task.abort();
        for worker in self.dnstap_workers {
            worker.abort();
        }
        self.sweeper.abort();

        self.peer_sync.shutdown().await;
        self.shared.bgp.close().await;
        let _ = self.bgp_task.await;

        tracing::info!("orchestrator shutdown complete");
    }
}

/// Warm boot: survivors get `cache.add_with_ts` (preserving the
/// persisted `ts`, not `cache.add`'s "set ts = now") so that an entry
/// close to expiry at restart time doesn't silently get a full fresh
/// TTL window; see DESIGN.md.
async fn warm_boot(
    store: &Arc<dyn PersistentStore>,
    matcher: &Arc<DomainMatcher>,
    cache: &Arc<TtlCache>,
    bgp: &BgpHandle,
    ttl: std::time::Duration,
) -> anyhow::Result<usize> {
    let stored_entries = store
        .fetch_all()
        .await
        .context("warm boot: fetching persisted entries")?;
    let ttl_ms = ttl.as_millis() as i64;
    let mut restored = 0usize;

    for stored in stored_entries {
        let age_ms = Utc::now().signed_duration_since(stored.ts).num_milliseconds();
        if age_ms >= ttl_ms {
            if let Err(err) = store.del(stored.ip).await {
                tracing::warn!(%err, ip = %stored.ip, "failed to delete expired warm-boot entry");
            }
            continue;
        }
        if !matcher.has(&stored.domain) {
            if let Err(err) = store.del(stored.ip).await {
                tracing::warn!(%err, ip = %stored.ip, "failed to delete vanished warm-boot entry");
            }
            continue;
        }

        cache.add_with_ts(CacheEntry {
            ip: stored.ip,
            domain: stored.domain,
            ts: stored.ts,
        });
        bgp.add_host(stored.ip);
        restored += 1;
    }

    Ok(restored)
}

#[cfg(test)]
mod test {
    use super::*;
    use bgp_speaker::BgpConfig as TestBgpConfig;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// An in-memory `PersistentStore` for exercising warm boot without
    /// RocksDB. `NullStore` can't stand in here: it never remembers
    /// anything, so every warm-boot branch (expired / vanished / kept)
    /// needs a store that actually holds what's added to it.
    #[derive(Default)]
    struct MemStore(Mutex<Vec<StoredEntry>>);

    #[async_trait::async_trait]
    impl PersistentStore for MemStore {
        async fn add(&self, entry: StoredEntry) -> Result<(), cache_store::StoreError> {
            let mut guard = self.0.lock();
            guard.retain(|e| e.ip != entry.ip);
            guard.push(entry);
            Ok(())
        }

        async fn del(&self, ip: IpAddr) -> Result<(), cache_store::StoreError> {
            self.0.lock().retain(|e| e.ip != ip);
            Ok(())
        }

        async fn fetch_all(&self) -> Result<Vec<StoredEntry>, cache_store::StoreError> {
            Ok(self.0.lock().clone())
        }

        async fn close(self: Box<Self>) -> Result<(), cache_store::StoreError> {
            Ok(())
        }
    }

    fn test_bgp_handle() -> BgpHandle {
        let config = TestBgpConfig::new(
            65000,
            Some(Ipv4Addr::new(10, 0, 0, 1)),
            vec!["127.0.0.1:1".parse().unwrap()],
            None,
            None,
            None,
            false,
        )
        .unwrap();
        let speaker = BgpSpeaker::start(config).unwrap();
        BgpHandle::spawn(speaker).0
    }

    fn test_shared() -> Shared {
        Shared {
            matcher: Arc::new(DomainMatcher::load(&["example.com".to_string()]).unwrap().0),
            cache: Arc::new(TtlCache::new(Duration::from_secs(3600), |_| {})),
            bgp: test_bgp_handle(),
            store: Arc::new(NullStore),
            sync_client: SyncClient::new(),
            peers: Arc::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn admit_core_reports_new_then_existing() {
        let shared = test_shared();
        let entry = CacheEntry {
            ip: "1.2.3.4".parse().unwrap(),
            domain: "example.com".to_string(),
            ts: Utc::now(),
        };
        assert!(admit_core(&shared, entry.clone(), true));
        assert!(!admit_core(&shared, entry, true));
        assert_eq!(shared.cache.count(), 1);
    }

    #[tokio::test]
    async fn ingest_drops_candidates_outside_allow_list() {
        let shared = test_shared();
        ingest(
            &shared,
            Candidate {
                ip: "9.9.9.9".parse().unwrap(),
                domain: "not-allowed.org".to_string(),
            },
        );
        assert_eq!(shared.cache.count(), 0);
    }

    #[tokio::test]
    async fn ingest_admits_matching_candidate() {
        let shared = test_shared();
        ingest(
            &shared,
            Candidate {
                ip: "9.9.9.9".parse().unwrap(),
                domain: "api.example.com".to_string(),
            },
        );
        assert_eq!(shared.cache.count(), 1);
        assert_eq!(shared.cache.get_all()[0].domain, "api.example.com");
    }

    #[tokio::test]
    async fn warm_boot_restores_fresh_entries_only() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemStore::default());
        let matcher = Arc::new(DomainMatcher::load(&["example.com".to_string()]).unwrap().0);
        let cache = Arc::new(TtlCache::new(Duration::from_secs(3600), |_| {}));
        let bgp = test_bgp_handle();

        let now = Utc::now();
        store
            .add(StoredEntry {
                ip: "1.1.1.1".parse().unwrap(),
                domain: "api.example.com".to_string(),
                ts: now,
            })
            .await
            .unwrap();
        store
            .add(StoredEntry {
                ip: "2.2.2.2".parse().unwrap(),
                domain: "api.example.com".to_string(),
                ts: now - ChronoDuration::hours(2),
            })
            .await
            .unwrap();
        store
            .add(StoredEntry {
                ip: "3.3.3.3".parse().unwrap(),
                domain: "no-longer-allowed.org".to_string(),
                ts: now,
            })
            .await
            .unwrap();

        let restored = warm_boot(&store, &matcher, &cache, &bgp, Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(restored, 1);
        assert_eq!(cache.count(), 1);
        assert!(cache.exists("1.1.1.1".parse().unwrap(), false));

        let remaining = store.fetch_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ip, "1.1.1.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn warm_boot_preserves_original_timestamp() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemStore::default());
        let matcher = Arc::new(DomainMatcher::load(&["example.com".to_string()]).unwrap().0);
        let cache = Arc::new(TtlCache::new(Duration::from_secs(3600), |_| {}));
        let bgp = test_bgp_handle();

        let original_ts = Utc::now() - ChronoDuration::minutes(30);
        store
            .add(StoredEntry {
                ip: "1.1.1.1".parse().unwrap(),
                domain: "api.example.com".to_string(),
                ts: original_ts,
            })
            .await
            .unwrap();

        warm_boot(&store, &matcher, &cache, &bgp, Duration::from_secs(3600))
            .await
            .unwrap();

        let restored_entry = &cache.get_all()[0];
        assert_eq!(restored_entry.ts, original_ts);
    }
}
