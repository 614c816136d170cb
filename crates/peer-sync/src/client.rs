use crate::entry::PeerEntry;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to {peer} failed: {source}")]
    Request {
        peer: SocketAddr,
        #[source]
        source: reqwest::Error,
    },
    #[error("peer {peer} responded with status {status}")]
    BadStatus {
        peer: SocketAddr,
        status: reqwest::StatusCode,
    },
}

/// One shared HTTP client for talking to sibling instances, with a
/// 5-second timeout applied per request.
#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("building reqwest client"),
        }
    }

    pub async fn fetch(&self, peer: SocketAddr) -> Result<Vec<PeerEntry>, SyncError> {
        let url = format!("http://{peer}/fetch");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer, source })?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(SyncError::BadStatus {
                peer,
                status: resp.status(),
            });
        }
        resp.json::<Vec<PeerEntry>>()
            .await
            .map_err(|source| SyncError::Request { peer, source })
    }

    pub async fn put(&self, peer: SocketAddr, entry: &PeerEntry) -> Result<(), SyncError> {
        let url = format!("http://{peer}/put");
        let resp = self
            .http
            .put(&url)
            .json(entry)
            .send()
            .await
            .map_err(|source| SyncError::Request { peer, source })?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(SyncError::BadStatus {
                peer,
                status: resp.status(),
            });
        }
        Ok(())
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcasts `entry` to every peer in configuration order. Stops at
/// the first error and returns it; later peers simply miss this
/// broadcast and pick the entry up on the next sync tick. This
/// preserves the original (possibly accidental) short-circuit
/// behavior rather than retrying or continuing past a failure.
pub async fn broadcast(
    client: &SyncClient,
    peers: &[SocketAddr],
    entry: &PeerEntry,
) -> Result<(), SyncError> {
    for peer in peers {
        client.put(*peer, entry).await?;
    }
    Ok(())
}
