//! Turns one DNS reply into zero or more (IP, FQDN) candidates.
//!
//! Only the Answer section matters: the parser walks it in order,
//! remembering the first name seen (from either the head CNAME or the
//! first address record) and attributing every subsequent address
//! record to that name. This is what lets an allow-list of
//! user-facing names (`facebook.com`) cover addresses that only show
//! up at the tail of a CNAME chain (`mqtt-mini.c10r.facebook.com`).

use hickory_proto::op::Message;
use hickory_proto::rr::{Record, RecordType};
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to parse DNS message")]
    Dns(#[from] hickory_proto::ProtoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ip: IpAddr,
    pub domain: String,
}

/// Parses a raw DNS message and returns the candidates found in its
/// Answer section. `ipv6_enabled` controls whether AAAA records are
/// considered at all.
pub fn parse_answer(raw: &[u8], ipv6_enabled: bool) -> Result<Vec<Candidate>, DecodeError> {
    let message = Message::from_vec(raw)?;
    Ok(parse_records(message.answers(), ipv6_enabled))
}

fn parse_records(records: &[Record], ipv6_enabled: bool) -> Vec<Candidate> {
    let mut domain: Option<String> = None;
    let mut out = Vec::new();

    for record in records {
        match record.record_type() {
            RecordType::CNAME => {
                if domain.is_none() {
                    domain = Some(strip_trailing_dot(&record.name().to_utf8()));
                }
            }
            RecordType::A => {
                if domain.is_none() {
                    domain = Some(strip_trailing_dot(&record.name().to_utf8()));
                }
                if let (Some(d), Some(rdata)) = (&domain, record.data()) {
                    if let Some(a) = rdata.as_a() {
                        out.push(Candidate {
                            ip: IpAddr::V4(a.0),
                            domain: d.clone(),
                        });
                    }
                }
            }
            RecordType::AAAA => {
                if !ipv6_enabled {
                    continue;
                }
                if domain.is_none() {
                    domain = Some(strip_trailing_dot(&record.name().to_utf8()));
                }
                if let (Some(d), Some(rdata)) = (&domain, record.data()) {
                    if let Some(aaaa) = rdata.as_aaaa() {
                        out.push(Candidate {
                            ip: IpAddr::V6(aaaa.0),
                            domain: d.clone(),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    out
}

fn strip_trailing_dot(s: &str) -> String {
    s.strip_suffix('.').unwrap_or(s).to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use hickory_proto::rr::rdata::{A, AAAA, CNAME};
    use hickory_proto::rr::{Name, RData};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::str::FromStr;

    fn message_with(records: Vec<Record>) -> Message {
        let mut message = Message::new();
        for r in records {
            message.add_answer(r);
        }
        message
    }

    #[test]
    fn cname_attribution_ipv6_off() {
        let head = Name::from_ascii("mqtt-mini.facebook.com.").unwrap();
        let tail = Name::from_ascii("mqtt-mini.c10r.facebook.com.").unwrap();

        let message = message_with(vec![
            Record::from_rdata(head.clone(), 300, RData::CNAME(CNAME(tail.clone()))),
            Record::from_rdata(
                tail.clone(),
                300,
                RData::A(A(Ipv4Addr::new(157, 240, 17, 34))),
            ),
            Record::from_rdata(
                tail,
                300,
                RData::AAAA(AAAA(
                    Ipv6Addr::from_str("2a03:2880:f15b:84:face:b00c:0:1ea0").unwrap(),
                )),
            ),
        ]);

        let candidates = parse_records(message.answers(), false);
        k9::assert_equal!(
            candidates,
            vec![Candidate {
                ip: IpAddr::V4(Ipv4Addr::new(157, 240, 17, 34)),
                domain: "mqtt-mini.facebook.com".to_string(),
            }]
        );
    }

    #[test]
    fn cname_attribution_ipv6_on() {
        let head = Name::from_ascii("mqtt-mini.facebook.com.").unwrap();
        let tail = Name::from_ascii("mqtt-mini.c10r.facebook.com.").unwrap();

        let message = message_with(vec![
            Record::from_rdata(head.clone(), 300, RData::CNAME(CNAME(tail.clone()))),
            Record::from_rdata(
                tail.clone(),
                300,
                RData::A(A(Ipv4Addr::new(157, 240, 17, 34))),
            ),
            Record::from_rdata(
                tail,
                300,
                RData::AAAA(AAAA(
                    Ipv6Addr::from_str("2a03:2880:f15b:84:face:b00c:0:1ea0").unwrap(),
                )),
            ),
        ]);

        let candidates = parse_records(message.answers(), true);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.domain == "mqtt-mini.facebook.com"));
    }

    #[test]
    fn empty_answer_emits_nothing() {
        let message = message_with(vec![]);
        assert!(parse_records(message.answers(), true).is_empty());
    }

    #[test]
    fn no_cname_uses_a_owner_as_domain() {
        let name = Name::from_ascii("direct.example.com.").unwrap();
        let message = message_with(vec![Record::from_rdata(
            name,
            300,
            RData::A(A(Ipv4Addr::new(10, 0, 0, 1))),
        )]);
        let candidates = parse_records(message.answers(), false);
        assert_eq!(candidates[0].domain, "direct.example.com");
    }

    #[test]
    fn multiple_a_records_share_domain() {
        let name = Name::from_ascii("multi.example.com.").unwrap();
        let message = message_with(vec![
            Record::from_rdata(name.clone(), 300, RData::A(A(Ipv4Addr::new(10, 0, 0, 1)))),
            Record::from_rdata(name, 300, RData::A(A(Ipv4Addr::new(10, 0, 0, 2)))),
        ]);
        let candidates = parse_records(message.answers(), false);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.domain == "multi.example.com"));
    }
}
