use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::load_json_config;
use crate::url_normalize::host_without_port;
use crate::LOG_TARGET;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainsConfig {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub match_subdomains: bool,
}

/// Allow-list of hosts, loaded once at startup and mutable only in memory
/// thereafter. `add`/`remove` never touch disk; `reload` re-reads
/// the backing file and swaps the set atomically from the caller's
/// perspective.
pub struct DomainFilter {
    path: Option<PathBuf>,
    state: RwLock<State>,
}

struct State {
    domains: HashSet<String>,
    match_subdomains: bool,
}

impl DomainFilter {
    /// Loads from `path`; a missing or malformed file yields an empty
    /// whitelist with a logged warning rather than a startup failure.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = load_json_config::<DomainsConfig>(&path).unwrap_or_default();
        Self {
            path: Some(path),
            state: RwLock::new(State::from_config(config)),
        }
    }

    /// Builds a filter directly from an in-memory config, with no backing
    /// file (`reload` becomes a no-op).
    pub fn from_config(config: DomainsConfig) -> Self {
        Self {
            path: None,
            state: RwLock::new(State::from_config(config)),
        }
    }

    #[instrument(skip(self), target = "feedcurrent::core")]
    pub fn is_allowed(&self, host: &str) -> bool {
        let query = normalize_query(host);
        let state = self.state.read().expect("domain filter lock poisoned");

        if state.domains.contains(&query) {
            return true;
        }

        if state.match_subdomains {
            return state
                .domains
                .iter()
                .any(|allowed| is_strict_subdomain(&query, allowed));
        }

        false
    }

    pub fn add_domain(&self, host: &str) {
        let query = normalize_query(host);
        self.state
            .write()
            .expect("domain filter lock poisoned")
            .domains
            .insert(query);
    }

    pub fn remove_domain(&self, host: &str) {
        let query = normalize_query(host);
        self.state
            .write()
            .expect("domain filter lock poisoned")
            .domains
            .remove(&query);
    }

    pub fn reload(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        self.reload_from(path);
    }

    fn reload_from(&self, path: &Path) {
        match load_json_config::<DomainsConfig>(path) {
            Some(config) => {
                *self.state.write().expect("domain filter lock poisoned") =
                    State::from_config(config);
            }
            None => {
                tracing::warn!(target: LOG_TARGET, "Keeping previous domain whitelist after failed reload");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("domain filter lock poisoned").domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl State {
    fn from_config(config: DomainsConfig) -> Self {
        Self {
            domains: config
                .domains
                .iter()
                .map(|d| normalize_query(d))
                .collect(),
            match_subdomains: config.match_subdomains,
        }
    }
}

fn normalize_query(host: &str) -> String {
    let host = host_without_port(&host.to_lowercase());
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// True iff `query` is exactly `"<label>.<allowed>"` for some non-empty
/// label — a strict DNS-label suffix, never a bare substring match
/// (`fakenytimes.com` never matches `nytimes.com`).
fn is_strict_subdomain(query: &str, allowed: &str) -> bool {
    query
        .strip_suffix(allowed)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .is_some_and(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(domains: &[&str], match_subdomains: bool) -> DomainFilter {
        DomainFilter::from_config(DomainsConfig {
            domains: domains.iter().map(|s| s.to_string()).collect(),
            match_subdomains,
        })
    }

    #[test]
    fn exact_match_allowed() {
        let f = filter(&["nytimes.com"], false);
        assert!(f.is_allowed("nytimes.com"));
    }

    #[test]
    fn www_prefix_stripped_on_query() {
        let f = filter(&["nytimes.com"], false);
        assert!(f.is_allowed("www.nytimes.com"));
    }

    #[test]
    fn subdomain_denied_without_flag() {
        let f = filter(&["nytimes.com"], false);
        assert!(!f.is_allowed("cooking.nytimes.com"));
    }

    #[test]
    fn subdomain_allowed_with_flag() {
        let f = filter(&["nytimes.com"], true);
        assert!(f.is_allowed("cooking.nytimes.com"));
    }

    #[test]
    fn substring_never_matches() {
        let f = filter(&["nytimes.com"], true);
        assert!(!f.is_allowed("fakenytimes.com"));
    }

    #[test]
    fn missing_file_yields_empty_set() {
        let f = DomainFilter::load("/nonexistent/domains.json");
        assert!(f.is_empty());
        assert!(!f.is_allowed("nytimes.com"));
    }

    #[test]
    fn runtime_add_and_remove() {
        let f = filter(&[], false);
        assert!(!f.is_allowed("example.com"));
        f.add_domain("example.com");
        assert!(f.is_allowed("example.com"));
        f.remove_domain("example.com");
        assert!(!f.is_allowed("example.com"));
    }
}
