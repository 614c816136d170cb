//! An allow-list of DNS zones, stored as a label trie so that
//! "does `fqdn` fall under any configured zone" is a single descent
//! rather than a linear scan.
//!
//! Zones are inserted one label at a time starting from the TLD
//! (`facebook.com` inserts `com` then `facebook`), which is the same
//! traversal order as reversing the zone's labels and walking the
//! result left to right. A zone whose ancestor is already present is
//! pruned at load time, which guarantees at most one terminal node on
//! any root-to-leaf path; lookup can therefore stop at the first
//! terminal it encounters.

use arc_swap::ArcSwap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static ZONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9]+(-[a-z0-9]+)*\.)+[a-z]{2,}$").unwrap());

#[derive(Debug, Error)]
pub enum MatcherLoadError {
    #[error("no domains loaded")]
    NoDomainsLoaded,
    #[error("failed to read domain file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    terminal: bool,
}

impl Node {
    fn insert(&mut self, labels: &[&str]) {
        match labels.split_first() {
            None => self.terminal = true,
            Some((label, rest)) => {
                self.children
                    .entry((*label).to_string())
                    .or_default()
                    .insert(rest);
            }
        }
    }
}

/// Splits a domain into its labels, ordered from TLD to most specific
/// (i.e. the order you'd get by reversing the label list of the
/// domain as originally written).
fn labels_tld_first(domain: &str) -> Vec<&str> {
    let mut labels: Vec<&str> = domain.split('.').collect();
    labels.reverse();
    labels
}

/// Stats about a load, useful for the `dump-stats` signal handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub accepted: usize,
    pub skipped_invalid: usize,
    pub pruned_descendants: usize,
}

pub struct DomainMatcher {
    root: ArcSwap<Node>,
}

impl DomainMatcher {
    /// Build a matcher from an in-memory list of candidate zone lines.
    /// Each line is lowercased, validated against the zone regex, and
    /// (if valid) reversed for subsumption pruning. Returns the built
    /// matcher together with load statistics, or `NoDomainsLoaded` if
    /// nothing survived validation.
    pub fn load(lines: &[String]) -> Result<(Self, LoadStats), MatcherLoadError> {
        let (root, stats) = build_tree(lines)?;
        Ok((
            Self {
                root: ArcSwap::new(Arc::new(root)),
            },
            stats,
        ))
    }

    pub fn from_file(path: &std::path::Path) -> Result<(Self, LoadStats), MatcherLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| MatcherLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        Self::load(&lines)
    }

    /// Atomically replace the tree with a freshly loaded one. On
    /// failure (no domains loaded, or the file could not be read) the
    /// existing tree is left untouched and the error is returned for
    /// the caller to log.
    pub fn reload_from_file(&self, path: &std::path::Path) -> Result<LoadStats, MatcherLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| MatcherLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        let (root, stats) = build_tree(&lines)?;
        self.root.store(Arc::new(root));
        Ok(stats)
    }

    /// Returns true if `fqdn` falls under any loaded zone.
    pub fn has(&self, fqdn: &str) -> bool {
        let fqdn = fqdn.trim_end_matches('.').to_lowercase();
        let labels = labels_tld_first(&fqdn);
        let root = self.root.load();
        let mut node = &**root;
        for label in labels {
            match node.children.get(label) {
                Some(child) => {
                    node = child;
                    if node.terminal {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    /// Number of distinct (post-pruning) zones currently loaded.
    pub fn zone_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            let mut n = if node.terminal { 1 } else { 0 };
            for child in node.children.values() {
                n += count(child);
            }
            n
        }
        count(&self.root.load())
    }
}

/// Reverses a domain's label order, e.g. `api.facebook.com` becomes
/// `com.facebook.api`.
pub fn reverse_labels(domain: &str) -> String {
    labels_tld_first(domain).join(".")
}

fn build_tree(lines: &[String]) -> Result<(Node, LoadStats), MatcherLoadError> {
    let mut stats = LoadStats::default();
    let mut reversed: Vec<String> = Vec::new();

    for line in lines {
        let candidate = line.trim().to_lowercase();
        if candidate.is_empty() {
            continue;
        }
        if !ZONE_RE.is_match(&candidate) {
            stats.skipped_invalid += 1;
            continue;
        }
        reversed.push(reverse_labels(&candidate));
    }

    // Sorting lexicographically makes ancestors precede any of their
    // descendants, since an ancestor's reversed form is a proper
    // label-aligned prefix (and thus sorts first among strings that
    // share that prefix).
    reversed.sort();

    let mut root = Node::default();
    let mut accepted_reversed: Vec<String> = Vec::new();

    for candidate in reversed {
        let is_descendant = accepted_reversed.iter().any(|existing| {
            candidate.starts_with(existing.as_str())
                && (candidate.len() == existing.len()
                    || candidate.as_bytes()[existing.len()] == b'.')
        });
        if is_descendant {
            stats.pruned_descendants += 1;
            continue;
        }
        let labels: Vec<&str> = candidate.split('.').collect();
        root.insert(&labels);
        accepted_reversed.push(candidate);
        stats.accepted += 1;
    }

    if stats.accepted == 0 {
        return Err(MatcherLoadError::NoDomainsLoaded);
    }

    Ok((root, stats))
}

#[cfg(test)]
mod test {
    use super::*;

    fn matcher(zones: &[&str]) -> DomainMatcher {
        let lines: Vec<String> = zones.iter().map(|z| z.to_string()).collect();
        DomainMatcher::load(&lines).unwrap().0
    }

    #[test]
    fn zone_subsumption() {
        let m = matcher(&["facebook.com"]);
        assert!(m.has("api.facebook.com"));
        assert!(!m.has("facebookk.com"));
        assert!(m.has("facebook.com"));
    }

    #[test]
    fn label_reverse() {
        k9::assert_equal!(reverse_labels("api.facebook.com"), "com.facebook.api");
        k9::assert_equal!(reverse_labels("a.b.c.d.e.f.g"), "g.f.e.d.c.b.a");
    }

    #[test]
    fn reverse_round_trips() {
        for d in ["example.com", "a.b.c.example.org", "single"] {
            assert_eq!(reverse_labels(&reverse_labels(d)), d);
        }
    }

    #[test]
    fn pruning_keeps_coarsest_zone() {
        let (m, stats) = DomainMatcher::load(&[
            "example.com".to_string(),
            "www.example.com".to_string(),
        ])
        .unwrap();
        k9::assert_equal!(stats.accepted, 1);
        k9::assert_equal!(stats.pruned_descendants, 1);
        assert!(m.has("www.example.com"));
        assert!(m.has("anything.example.com"));
    }

    #[test]
    fn invalid_lines_are_skipped() {
        let (_m, stats) = DomainMatcher::load(&[
            "example.com".to_string(),
            "not a domain".to_string(),
            "UPPER.EXAMPLE.ORG".to_string(),
            "".to_string(),
        ])
        .unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.skipped_invalid, 1);
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = DomainMatcher::load(&["not a domain".to_string()]).unwrap_err();
        assert!(matches!(err, MatcherLoadError::NoDomainsLoaded));
    }

    #[test]
    fn reload_preserves_old_tree_on_failure() {
        let (m, _) = DomainMatcher::load(&["example.com".to_string()]).unwrap();
        let tmp = std::env::temp_dir().join(format!(
            "domain-matcher-test-{}.txt",
            std::process::id()
        ));
        std::fs::write(&tmp, "not a domain\n").unwrap();
        let err = m.reload_from_file(&tmp).unwrap_err();
        assert!(matches!(err, MatcherLoadError::NoDomainsLoaded));
        assert!(m.has("example.com"));
        std::fs::remove_file(&tmp).ok();
    }
}
