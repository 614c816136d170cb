use crate::config::BgpConfig;
use crate::path::{path_for, AnnouncedPath};
use crate::session::PeerSession;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BgpError {
    #[error("failed to start BGP speaker: {0}")]
    StartFailed(String),
    #[error("failed to add peer {peer}: {reason}")]
    AddPeerFailed { peer: String, reason: String },
}

const CLOSE_DEADLINE: Duration = Duration::from_secs(5);

/// Maintains outbound BGP sessions to configured peers and keeps the
/// set of advertised host routes in sync with the TTL cache. Does not
/// accept inbound connections: this speaker only originates routes,
/// it never serves as a route reflector or transit peer.
pub struct BgpSpeaker {
    config: BgpConfig,
    sessions: Vec<PeerSession>,
    // ip -> path most recently announced for it, so delHost knows what
    // to withdraw without recomputing (and so a config change to
    // next-hop mid-flight can't desync withdraw from announce).
    announced: RwLock<HashMap<IpAddr, AnnouncedPath>>,
}

impl BgpSpeaker {
    /// Brings up sessions to every configured peer. A peer-add failure
    /// aborts startup entirely, per the startup contract: a
    /// half-started speaker is worse than none.
    pub fn start(config: BgpConfig) -> Result<Self, BgpError> {
        let mut sessions = Vec::with_capacity(config.peers.len());
        for peer in &config.peers {
            // PeerSession::start spawns its own reconnect loop; there
            // is no synchronous "add peer" failure mode once the
            // socket address itself is valid, which config
            // validation has already guaranteed.
            sessions.push(PeerSession::start(*peer));
        }

        Ok(Self {
            config,
            sessions,
            announced: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &BgpConfig {
        &self.config
    }

    /// Computes and announces the host route for `ip` on every peer.
    /// A `None` path (IPv6 with IPv6 disabled) is a silent no-op.
    pub fn add_host(&self, ip: IpAddr) {
        let Some(path) = path_for(ip, &self.config) else {
            return;
        };
        for session in &self.sessions {
            session.announce(path.clone());
        }
        self.announced.write().insert(ip, path);
    }

    /// Withdraws the host route for `ip`, if one was announced.
    pub fn del_host(&self, ip: IpAddr) {
        let path = self.announced.write().remove(&ip);
        let Some(path) = path else {
            return;
        };
        for session in &self.sessions {
            session.withdraw(path.clone());
        }
    }

    /// Current count of host routes believed to be announced, for the
    /// dump-stats signal handler.
    pub fn announced_count(&self) -> usize {
        self.announced.read().len()
    }

    pub fn established_peer_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state() == crate::session::SessionState::Established)
            .count()
    }

    /// Tears down every session within a 5-second deadline.
    pub async fn close(self) {
        let closes = self.sessions.into_iter().map(|s| s.close());
        let _ = tokio::time::timeout(CLOSE_DEADLINE, futures_join(closes)).await;
    }
}

async fn futures_join(iter: impl IntoIterator<Item = impl std::future::Future<Output = ()>>) {
    for fut in iter {
        fut.await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BgpConfig;
    use std::net::Ipv4Addr;

    fn config() -> BgpConfig {
        BgpConfig::new(
            65000,
            Some(Ipv4Addr::new(10, 0, 0, 1)),
            vec!["127.0.0.1:1".parse().unwrap()],
            None,
            None,
            None,
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn add_host_then_del_host_clears_bookkeeping() {
        let speaker = BgpSpeaker::start(config()).unwrap();
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        speaker.add_host(ip);
        assert_eq!(speaker.announced_count(), 1);
        speaker.del_host(ip);
        assert_eq!(speaker.announced_count(), 0);
    }

    #[tokio::test]
    async fn ipv6_host_with_ipv6_disabled_is_noop() {
        let speaker = BgpSpeaker::start(config()).unwrap();
        let ip: IpAddr = "2a03:2880::1".parse().unwrap();
        speaker.add_host(ip);
        assert_eq!(speaker.announced_count(), 0);
    }

    #[tokio::test]
    async fn del_host_without_prior_add_is_idempotent() {
        let speaker = BgpSpeaker::start(config()).unwrap();
        speaker.del_host("9.9.9.9".parse().unwrap());
        assert_eq!(speaker.announced_count(), 0);
    }
}
