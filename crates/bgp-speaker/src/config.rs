use net_address::HostOrSocketAddress;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

pub const DEFAULT_BGP_PORT: u16 = 179;

/// The sentinel IPv6 next-hop used when IPv6 is enabled but no explicit
/// `nextHopIPv6` was configured.
pub const DEFAULT_IPV6_NEXT_HOP: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BGP.AS must be a nonzero autonomous system number")]
    MissingAsn,
    #[error("BGP.Peers must list at least one peer")]
    EmptyPeers,
    #[error("peer address {0} does not resolve to an IP socket address")]
    PeerNotIp(String),
    #[error("at least one of BGP.NextHop, BGP.SourceIP or BGP.RouterID must be set")]
    NoNextHopSource,
}

#[derive(Debug, Clone)]
pub struct BgpConfig {
    pub asn: u32,
    pub router_id: Option<Ipv4Addr>,
    pub peers: Vec<SocketAddr>,
    pub source_ip: Option<Ipv4Addr>,
    pub next_hop: Option<Ipv4Addr>,
    pub next_hop_ipv6: Option<Ipv6Addr>,
    pub ipv6: bool,
}

impl BgpConfig {
    pub fn new(
        asn: u32,
        router_id: Option<Ipv4Addr>,
        peers: Vec<HostOrSocketAddress>,
        source_ip: Option<Ipv4Addr>,
        next_hop: Option<Ipv4Addr>,
        next_hop_ipv6: Option<Ipv6Addr>,
        ipv6: bool,
    ) -> Result<Self, ConfigError> {
        if asn == 0 {
            return Err(ConfigError::MissingAsn);
        }
        if peers.is_empty() {
            return Err(ConfigError::EmptyPeers);
        }

        let peers = peers
            .into_iter()
            .map(|mut p| {
                p.set_port_if_not_set(DEFAULT_BGP_PORT);
                socket_addr_of(&p).ok_or_else(|| ConfigError::PeerNotIp(format!("{p:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if next_hop.is_none() && source_ip.is_none() && router_id.is_none() {
            return Err(ConfigError::NoNextHopSource);
        }

        Ok(Self {
            asn,
            router_id,
            peers,
            source_ip,
            next_hop,
            next_hop_ipv6,
            ipv6,
        })
    }

    /// The IPv4 NEXT_HOP attribute used for host routes: the first
    /// defined of `nextHop`, `sourceIp`, `routerId`.
    pub fn ipv4_next_hop(&self) -> Option<Ipv4Addr> {
        self.next_hop.or(self.source_ip).or(self.router_id)
    }

    /// The IPv6 NEXT_HOP used for host routes when IPv6 is enabled.
    pub fn ipv6_next_hop(&self) -> Ipv6Addr {
        self.next_hop_ipv6.unwrap_or(DEFAULT_IPV6_NEXT_HOP)
    }
}

fn socket_addr_of(addr: &HostOrSocketAddress) -> Option<SocketAddr> {
    match addr {
        HostOrSocketAddress::V4Socket(a) => Some(SocketAddr::V4(*a)),
        HostOrSocketAddress::V6Socket(a) => Some(SocketAddr::V6(*a)),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn host(s: &str) -> HostOrSocketAddress {
        s.parse().unwrap()
    }

    #[test]
    fn rejects_zero_asn() {
        let err = BgpConfig::new(0, None, vec![host("10.0.0.1:179")], None, None, None, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAsn));
    }

    #[test]
    fn rejects_empty_peers() {
        let err = BgpConfig::new(65000, None, vec![], None, None, None, false).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPeers));
    }

    #[test]
    fn defaults_peer_port() {
        let cfg = BgpConfig::new(
            65000,
            Some(Ipv4Addr::new(10, 0, 0, 1)),
            vec![host("10.0.0.2")],
            None,
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(cfg.peers[0].port(), DEFAULT_BGP_PORT);
    }

    #[test]
    fn rejects_missing_next_hop_source() {
        let err = BgpConfig::new(65000, None, vec![host("10.0.0.2:179")], None, None, None, false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoNextHopSource));
    }

    #[test]
    fn next_hop_fallback_chain() {
        let cfg = BgpConfig::new(
            65000,
            Some(Ipv4Addr::new(9, 9, 9, 9)),
            vec![host("10.0.0.2:179")],
            Some(Ipv4Addr::new(8, 8, 8, 8)),
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(cfg.ipv4_next_hop(), Some(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
