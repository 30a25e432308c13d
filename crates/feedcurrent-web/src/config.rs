/// Service identity presented at `/`, `/.well-known/did.json`, and
/// `describeFeedGenerator`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub hostname: String,
    pub feed_name: String,
}

impl ServiceConfig {
    pub fn new(hostname: String, feed_name: String) -> Self {
        Self { hostname, feed_name }
    }

    /// `did:web:<host>`, derived from `hostname` with any scheme and port
    /// stripped, matching the source's `SERVICE_DID` derivation.
    pub fn service_did(&self) -> String {
        let without_scheme = self
            .hostname
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host_only = without_scheme.split(':').next().unwrap_or(without_scheme);
        format!("did:web:{host_only}")
    }

    /// True iff `feed` ends with `/app.bsky.feed.generator/<feed_name>`
    /// (`getFeedSkeleton` validation).
    pub fn accepts_feed(&self, feed: &str) -> bool {
        feed.ends_with(&format!("/app.bsky.feed.generator/{}", self.feed_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_did_strips_scheme_and_port() {
        let config = ServiceConfig::new("https://feed.example.com:8443".into(), "trending-news".into());
        assert_eq!(config.service_did(), "did:web:feed.example.com");
    }

    #[test]
    fn accepts_feed_matches_suffix_only() {
        let config = ServiceConfig::new("feed.example.com".into(), "trending-news".into());
        assert!(config.accepts_feed("at://did:plc:abc/app.bsky.feed.generator/trending-news"));
        assert!(!config.accepts_feed("at://did:plc:abc/app.bsky.feed.generator/other-feed"));
    }
}
