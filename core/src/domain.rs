use url::{Host, Url};

const SEARCH_QUERY_KEYS: &[&str] = &["q", "query", "p", "search", "text", "wd"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    url: Url,
    domain: String,
}

impl SourceUrl {
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        let domain = registrable_domain(&url)?;
        Some(Self { url, domain })
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    // A `search` path segment together with a query-term parameter.
    pub fn is_search_results_page(&self) -> bool {
        let has_search_segment = self
            .url
            .path_segments()
            .map(|mut segments| {
                segments.any(|s| {
                    let s = s.to_ascii_lowercase();
                    s == "search" || s == "search.php" || s == "results"
                })
            })
            .unwrap_or(false);

        if !has_search_segment {
            return false;
        }

        self.url
            .query_pairs()
            .any(|(key, _)| SEARCH_QUERY_KEYS.contains(&key.to_ascii_lowercase().as_str()))
    }
}

/// Reduce a URL host to the domain a registrant controls, using the public
/// suffix list. IP literals, single-label hosts and bare suffixes are
/// returned as-is.
pub fn registrable_domain(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
        Host::Domain(host) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() {
                return None;
            }
            Some(
                psl::domain_str(&host)
                    .map(str::to_string)
                    .unwrap_or(host),
            )
        }
    }
}

pub fn extract_domain(raw: &str) -> Option<String> {
    SourceUrl::parse(raw).map(|source| source.domain)
}
