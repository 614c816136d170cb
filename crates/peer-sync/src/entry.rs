use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// The wire representation of a cache entry as exchanged between
/// peers. Field names are capitalized to match the JSON this daemon's
/// siblings (and any warm-booted older version) already speak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "TS")]
    pub ts: DateTime<Utc>,
}
