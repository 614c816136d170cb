use crate::client::SyncClient;
use crate::entry::PeerEntry;
use crate::server::AdmitFn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Observability hook fired once per peer per sync tick.
pub type SyncObserver = Arc<dyn Fn(SyncTickReport) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SyncTickReport {
    pub peer: SocketAddr,
    pub inserted: usize,
    pub error: Option<String>,
}

/// One reconciliation pass: GET `/fetch` from each peer in turn and
/// feed every entry through `admit(_, touch=false)`. A peer error is
/// reported to `observer` and the loop continues with the next peer.
pub async fn sync_all(
    client: &SyncClient,
    peers: &[SocketAddr],
    admit: &AdmitFn,
    observer: &SyncObserver,
) {
    for peer in peers {
        match client.fetch(*peer).await {
            Ok(entries) => {
                let inserted = entries
                    .into_iter()
                    .filter(|entry: &PeerEntry| (admit)(entry.clone(), false))
                    .count();
                observer(SyncTickReport {
                    peer: *peer,
                    inserted,
                    error: None,
                });
            }
            Err(err) => {
                observer(SyncTickReport {
                    peer: *peer,
                    inserted: 0,
                    error: Some(err.to_string()),
                });
            }
        }
    }
}

/// Spawns the background reconciliation timer. Returns `None` if
/// `interval` is zero, per the `Syncer.SyncInterval = 0 disables`
/// config contract.
pub fn spawn_scheduler(
    interval: Duration,
    client: SyncClient,
    peers: Vec<SocketAddr>,
    admit: AdmitFn,
    observer: SyncObserver,
    mut shutdown: watch::Receiver<()>,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sync_all(&client, &peers, &admit, &observer).await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!("sync scheduler shutting down");
                    return;
                }
            }
        }
    }))
}
