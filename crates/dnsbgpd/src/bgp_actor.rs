//! Routes add/del-path calls to a single task that owns the
//! [`BgpSpeaker`], so that its consuming `close()` can still run once
//! every runtime caller (ingest, peer admission, cache expiry) is
//! done with it, without needing to share the speaker behind an `Arc`
//! just to keep a last-owner reachable.

use bgp_speaker::BgpSpeaker;
use std::net::IpAddr;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Add(IpAddr),
    Del(IpAddr),
    Close(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct BgpHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl BgpHandle {
    /// Spawns the task that owns `speaker` for the remainder of the
    /// process. Returns a cheaply-cloneable handle plus the task's
    /// join handle, which the caller should await after `close()`.
    pub fn spawn(speaker: BgpSpeaker) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Add(ip) => speaker.add_host(ip),
                    Command::Del(ip) => speaker.del_host(ip),
                    Command::Close(ack) => {
                        speaker.close().await;
                        let _ = ack.send(());
                        return;
                    }
                }
            }
        });
        (Self { tx }, task)
    }

    pub fn add_host(&self, ip: IpAddr) {
        let _ = self.tx.send(Command::Add(ip));
    }

    pub fn del_host(&self, ip: IpAddr) {
        let _ = self.tx.send(Command::Del(ip));
    }

    /// Tears down every BGP session, bounded by `BgpSpeaker::close`'s
    /// own 5-second deadline. A no-op if the owning task already
    /// exited.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}
