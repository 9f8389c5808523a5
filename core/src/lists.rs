use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainLists {
    pub blacklist: Vec<String>,
    pub approved: Vec<String>,
    pub search_engines: Vec<String>,
    pub banned_hotkeys: Vec<String>,
}

/// Immutable view of [`DomainLists`] taken at the start of a round. The
/// version is a content hash so a round can be audited against the exact
/// lists it ran with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    blacklist: BTreeSet<String>,
    approved: BTreeSet<String>,
    search_engines: BTreeSet<String>,
    banned_hotkeys: BTreeSet<String>,
    version: String,
}

impl ListSnapshot {
    pub fn capture(lists: &DomainLists) -> Arc<Self> {
        let blacklist = normalize_domains(&lists.blacklist);
        let approved = normalize_domains(&lists.approved);
        let search_engines = normalize_domains(&lists.search_engines);
        let banned_hotkeys: BTreeSet<String> = lists
            .banned_hotkeys
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        let mut hasher = Sha256::new();
        for (tag, set) in [
            ("blacklist", &blacklist),
            ("approved", &approved),
            ("search_engines", &search_engines),
            ("banned_hotkeys", &banned_hotkeys),
        ] {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
            for entry in set {
                hasher.update(entry.as_bytes());
                hasher.update([0u8]);
            }
        }
        let version = hex::encode(hasher.finalize());

        Arc::new(Self {
            blacklist,
            approved,
            search_engines,
            banned_hotkeys,
            version,
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::capture(&DomainLists::default())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_blacklisted(&self, domain: &str) -> bool {
        self.blacklist.contains(domain)
    }

    pub fn is_approved(&self, domain: &str) -> bool {
        self.approved.contains(domain)
    }

    pub fn is_search_engine(&self, domain: &str) -> bool {
        self.search_engines.contains(domain)
    }

    pub fn is_banned(&self, hotkey: &str) -> bool {
        self.banned_hotkeys.contains(hotkey)
    }

    pub fn banned_hotkeys(&self) -> &BTreeSet<String> {
        &self.banned_hotkeys
    }
}

fn normalize_domains(domains: &[String]) -> BTreeSet<String> {
    domains
        .iter()
        .map(|d| {
            d.trim()
                .trim_end_matches('.')
                .trim_start_matches("www.")
                .to_ascii_lowercase()
        })
        .filter(|d| !d.is_empty())
        .collect()
}

pub fn parse_hotkey_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
