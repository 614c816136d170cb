use crate::config::BgpConfig;
use bgp_rs::{Origin, Prefix, AFI};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The BGP-speaker-side twin of a cache entry: enough to build and
/// tear down a host route. IPv4 prefixes are always /32, IPv6 always
/// /128, matching the host-scoped-NLRI-only behavior this daemon
/// exposes on the wire.
#[derive(Debug, Clone)]
pub enum AnnouncedPath {
    V4 {
        prefix: Prefix,
        next_hop: Ipv4Addr,
        origin: Origin,
    },
    V6 {
        prefix: Prefix,
        next_hop: Ipv6Addr,
        origin: Origin,
    },
}

impl AnnouncedPath {
    pub fn afi(&self) -> AFI {
        match self {
            AnnouncedPath::V4 { .. } => AFI::IPV4,
            AnnouncedPath::V6 { .. } => AFI::IPV6,
        }
    }
}

/// Computes the path that should be announced for `ip`, or `None` if
/// this is an IPv6 address and IPv6 announcement is disabled (a
/// no-op the caller must not treat as an error).
pub fn path_for(ip: IpAddr, config: &BgpConfig) -> Option<AnnouncedPath> {
    match ip {
        IpAddr::V4(v4) => Some(AnnouncedPath::V4 {
            prefix: Prefix {
                protocol: AFI::IPV4,
                length: 32,
                prefix: v4.octets().to_vec(),
            },
            next_hop: config.ipv4_next_hop().unwrap_or(Ipv4Addr::UNSPECIFIED),
            origin: Origin::IGP,
        }),
        IpAddr::V6(v6) => {
            if !config.ipv6 {
                return None;
            }
            Some(AnnouncedPath::V6 {
                prefix: Prefix {
                    protocol: AFI::IPV6,
                    length: 128,
                    prefix: v6.octets().to_vec(),
                },
                next_hop: config.ipv6_next_hop(),
                origin: Origin::IGP,
            })
        }
    }
}
