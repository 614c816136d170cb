pub mod client;
pub mod entry;
pub mod scheduler;
pub mod server;

pub use client::{broadcast, SyncClient, SyncError};
pub use entry::PeerEntry;
pub use scheduler::{sync_all, SyncObserver, SyncTickReport};
pub use server::{AdmitFn, GetAllFn};

use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;

/// Wires the HTTP server, reconciliation scheduler and broadcast
/// client together behind a common shutdown contract: close the
/// shutdown channel to stop the scheduler, then gracefully shut down
/// the HTTP server with a 5-second deadline.
pub struct PeerSync {
    pub client: SyncClient,
    pub peers: Vec<SocketAddr>,
    shutdown_tx: watch::Sender<()>,
    server_task: tokio::task::JoinHandle<()>,
    scheduler_task: Option<tokio::task::JoinHandle<()>>,
}

impl PeerSync {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        listen: Option<SocketAddr>,
        peers: Vec<SocketAddr>,
        sync_interval: Duration,
        get_all: GetAllFn,
        admit: AdmitFn,
        observer: SyncObserver,
    ) -> Self {
        let client = SyncClient::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let server_task = match listen {
            Some(addr) => {
                let get_all = get_all.clone();
                let admit = admit.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    let shutdown = async move {
                        let _ = shutdown_rx.changed().await;
                    };
                    if let Err(err) = server::serve(addr, get_all, admit, shutdown).await {
                        tracing::error!(%err, "sync HTTP server exited with error");
                    }
                })
            }
            None => tokio::spawn(async {}),
        };

        let scheduler_task = scheduler::spawn_scheduler(
            sync_interval,
            client.clone(),
            peers.clone(),
            admit,
            observer,
            shutdown_rx,
        );

        Self {
            client,
            peers,
            shutdown_tx,
            server_task,
            scheduler_task,
        }
    }

    pub async fn broadcast(&self, entry: &PeerEntry) -> Result<(), SyncError> {
        client::broadcast(&self.client, &self.peers, entry).await
    }

    /// Stops the scheduler, then waits for the HTTP server task to
    /// finish (it enforces its own 5-second shutdown deadline
    /// internally).
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.scheduler_task {
            let _ = task.await;
        }
        let _ = self.server_task.await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn free_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn self_loop_broadcast_then_sync_tick() {
        let addr = free_addr();
        let store: Arc<Mutex<Vec<PeerEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let admitted: Arc<Mutex<Vec<PeerEntry>>> = Arc::new(Mutex::new(Vec::new()));

        let store_fetch = Arc::clone(&store);
        let get_all: GetAllFn = Arc::new(move || store_fetch.lock().clone());

        let store_admit = Arc::clone(&store);
        let admitted_clone = Arc::clone(&admitted);
        let admit: AdmitFn = Arc::new(move |entry: PeerEntry, _touch| {
            let mut guard = store_admit.lock();
            if guard.iter().any(|e| e.ip == entry.ip) {
                return false;
            }
            guard.push(entry.clone());
            admitted_clone.lock().push(entry);
            true
        });

        let observer: SyncObserver = Arc::new(|report| {
            assert!(report.error.is_none());
        });

        let sync = PeerSync::start(
            Some(addr),
            vec![addr],
            Duration::from_millis(20),
            get_all,
            admit,
            observer,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let e0 = PeerEntry {
            ip: "10.0.0.1".parse().unwrap(),
            domain: "seed.example".to_string(),
            ts: Utc::now(),
        };
        store.lock().push(e0.clone());

        let e2 = PeerEntry {
            ip: "10.0.0.2".parse().unwrap(),
            domain: "broadcast.example".to_string(),
            ts: Utc::now(),
        };
        sync.broadcast(&e2).await.unwrap();
        assert!(admitted.lock().iter().any(|e| e.ip == e2.ip));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(admitted.lock().iter().any(|e| e.ip == e0.ip));

        sync.shutdown().await;
    }
}
