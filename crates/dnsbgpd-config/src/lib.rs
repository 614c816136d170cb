//! TOML configuration for the daemon, mirroring the key table in this
//! codebase's deployment docs almost directly onto a `serde` struct
//! tree.

use net_address::HostOrSocketAddress;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BGP_PORT: u16 = 179;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BGP.AS is required and must be nonzero")]
    MissingAsn,
    #[error("BGP.Peers must list at least one peer")]
    EmptyBgpPeers,
    #[error(
        "at least one of BGP.NextHop, BGP.SourceIP or BGP.RouterID must be set, \
         otherwise the announced NEXT_HOP would be empty"
    )]
    NoNextHopSource,
    #[error("Syncer.Peers entry {0:?} has no port and Syncer has no default to apply")]
    SyncerPeerMissingPort(String),
    #[error("Domains path is required")]
    MissingDomains,
    #[error("failed to parse permission {0:?} as octal")]
    BadPerm(String),
}

/// Parses `DNSTap.Perm` from either a quoted octal string (`"0660"`)
/// or a bare integer, matching how most dnstap deployments write unix
/// socket permissions in their own config files.
#[derive(Debug, Clone, Copy)]
pub struct Perm(pub u32);

impl<'de> Deserialize<'de> for Perm {
    fn deserialize<D>(d: D) -> Result<Perm, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(u32),
            Str(String),
        }

        match Repr::deserialize(d)? {
            Repr::Int(v) => Ok(Perm(v)),
            Repr::Str(s) => u32::from_str_radix(s.trim_start_matches("0o"), 8)
                .map(Perm)
                .map_err(|_| serde::de::Error::custom(ConfigError::BadPerm(s))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DnstapConfig {
    #[serde(rename = "Listen")]
    pub listen: HostOrSocketAddress,
    #[serde(rename = "Perm")]
    pub perm: Option<Perm>,
}

#[derive(Debug, Deserialize)]
pub struct BgpConfig {
    #[serde(rename = "AS")]
    pub asn: u32,
    #[serde(rename = "RouterID")]
    pub router_id: Option<std::net::Ipv4Addr>,
    #[serde(rename = "Peers")]
    pub peers: Vec<HostOrSocketAddress>,
    #[serde(rename = "SourceIP")]
    pub source_ip: Option<std::net::IpAddr>,
    #[serde(rename = "NextHop")]
    pub next_hop: Option<std::net::Ipv4Addr>,
    #[serde(rename = "NextHopIPv6")]
    pub next_hop_ipv6: Option<std::net::Ipv6Addr>,
}

#[derive(Debug, Deserialize)]
pub struct SyncerConfig {
    #[serde(rename = "Listen")]
    pub listen: Option<std::net::SocketAddr>,
    #[serde(rename = "Peers", default)]
    pub peers: Vec<HostOrSocketAddress>,
    #[serde(rename = "SyncInterval", with = "duration_serde", default = "default_sync_interval")]
    pub sync_interval: Duration,
}

fn default_sync_interval() -> Duration {
    DEFAULT_SYNC_INTERVAL
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "Domains")]
    pub domains: PathBuf,
    #[serde(rename = "Cache")]
    pub cache: Option<PathBuf>,
    #[serde(rename = "TTL", with = "duration_serde", default = "default_ttl")]
    pub ttl: Duration,
    #[serde(rename = "IPv6", default)]
    pub ipv6: bool,
    #[serde(rename = "DNSTap")]
    pub dnstap: DnstapConfig,
    #[serde(rename = "BGP")]
    pub bgp: BgpConfig,
    #[serde(rename = "Syncer", default = "default_syncer")]
    pub syncer: SyncerConfig,
}

fn default_syncer() -> SyncerConfig {
    SyncerConfig {
        listen: None,
        peers: Vec::new(),
        sync_interval: DEFAULT_SYNC_INTERVAL,
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domains.as_os_str().is_empty() {
            return Err(ConfigError::MissingDomains);
        }
        if self.bgp.asn == 0 {
            return Err(ConfigError::MissingAsn);
        }
        if self.bgp.peers.is_empty() {
            return Err(ConfigError::EmptyBgpPeers);
        }
        if self.bgp.next_hop.is_none() && self.bgp.source_ip.is_none() && self.bgp.router_id.is_none() {
            return Err(ConfigError::NoNextHopSource);
        }
        for peer in &self.syncer.peers {
            if peer.port().is_none() && peer.unix().is_none() {
                return Err(ConfigError::SyncerPeerMissingPort(peer.to_string()));
            }
        }
        Ok(())
    }

    /// BGP peers with the default port applied where the config left
    /// it unspecified.
    pub fn bgp_peers(&self) -> Vec<HostOrSocketAddress> {
        self.bgp
            .peers
            .iter()
            .cloned()
            .map(|mut p| {
                p.set_port_if_not_set(DEFAULT_BGP_PORT);
                p
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = r#"
Domains = "/etc/dnsbgpd/zones.txt"
Cache = "/var/lib/dnsbgpd/cache"
TTL = "24h"
IPv6 = true

[DNSTap]
Listen = "/var/run/dnstap.sock"
Perm = "0660"

[BGP]
AS = 65001
RouterID = "10.0.0.1"
Peers = ["10.0.0.2", "10.0.0.3:1790"]
NextHop = "10.0.0.1"

[Syncer]
Listen = "0.0.0.0:8080"
Peers = ["10.0.0.2:8080"]
SyncInterval = "5m"
"#;

    #[test]
    fn parses_full_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();
        k9::assert_equal!(config.ttl, Duration::from_secs(24 * 3600));
        k9::assert_equal!(config.syncer.sync_interval, Duration::from_secs(5 * 60));
        assert!(config.ipv6);
        let peers = config.bgp_peers();
        k9::assert_equal!(peers[0].port(), Some(DEFAULT_BGP_PORT));
        k9::assert_equal!(peers[1].port(), Some(1790));
    }

    #[test]
    fn perm_accepts_integer_form() {
        let text = SAMPLE.replace(r#"Perm = "0660""#, "Perm = 432");
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.dnstap.perm.unwrap().0, 0o660);
    }

    #[test]
    fn rejects_zero_asn() {
        let text = SAMPLE.replace("AS = 65001", "AS = 0");
        let config = Config::parse(&text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingAsn)));
    }

    #[test]
    fn rejects_missing_next_hop_source() {
        let text = SAMPLE
            .replace("RouterID = \"10.0.0.1\"\n", "")
            .replace("NextHop = \"10.0.0.1\"\n", "");
        let config = Config::parse(&text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoNextHopSource)
        ));
    }

    #[test]
    fn rejects_syncer_peer_without_port() {
        let text = SAMPLE.replace(r#"Peers = ["10.0.0.2:8080"]"#, r#"Peers = ["10.0.0.2"]"#);
        let config = Config::parse(&text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SyncerPeerMissingPort(_))
        ));
    }

    #[test]
    fn default_ttl_and_sync_interval_apply() {
        let text = SAMPLE
            .lines()
            .filter(|l| !l.starts_with("TTL") && !l.starts_with("SyncInterval"))
            .collect::<Vec<_>>()
            .join("\n");
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert_eq!(config.syncer.sync_interval, DEFAULT_SYNC_INTERVAL);
    }
}
