//! SIGHUP and SIGUSR1 are repurposed by this daemon (domain-list
//! reload and a stats dump, respectively) rather than treated as
//! shutdown triggers, so they're handled by a dedicated task
//! alongside `lifecycle::LifeCycle`'s own TERM/INT handling.

use domain_matcher::DomainMatcher;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use ttl_cache::TtlCache;

pub fn spawn(
    matcher: Arc<DomainMatcher>,
    domains_path: PathBuf,
    cache: Arc<TtlCache>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(%err, "failed to install SIGHUP handler");
                return;
            }
        };
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(%err, "failed to install SIGUSR1 handler");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = hup.recv() => {
                    match matcher.reload_from_file(&domains_path) {
                        Ok(stats) => tracing::info!(
                            accepted = stats.accepted,
                            skipped = stats.skipped_invalid,
                            pruned = stats.pruned_descendants,
                            "reloaded domain allow-list"
                        ),
                        Err(err) => tracing::warn!(
                            %err,
                            "domain reload failed, keeping previous allow-list"
                        ),
                    }
                }
                _ = usr1.recv() => {
                    tracing::info!(
                        cache_entries = cache.count(),
                        matcher_zones = matcher.zone_count(),
                        "dnsbgpd stats dump"
                    );
                }
            }
        }
    })
}
