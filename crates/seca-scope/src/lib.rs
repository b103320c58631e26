//! Canonical target handling and scope expansion for SECA.
//!
//! Targets are deduplicated on their canonical URL form: lowercase scheme and
//! host, `http` default scheme, no fragment, path defaulting to `/`, a single
//! trailing slash stripped above the root, query preserved. An injected
//! [`Crawler`] can expand the scope before dispatch; crawl failures are
//! warnings, never fatal.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

// ─── Canonicalization ────────────────────────────────────────────────────────

/// Canonicalize a raw target string into the form used as the dedup key.
///
/// Inputs that cannot be parsed as a URL even after the scheme default are
/// kept verbatim (trimmed) so an operator-listed target is never silently
/// dropped.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let Ok(url) = Url::parse(&candidate) else {
        debug!(target = trimmed, "target is not a URL, keeping raw form");
        return trimmed.to_string();
    };
    let Some(host) = url.host_str() else {
        return trimmed.to_string();
    };

    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    // The url crate lowercases scheme and host and elides default ports.
    let mut canonical = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    canonical.push_str(&path);
    if let Some(query) = url.query() {
        canonical.push('?');
        canonical.push_str(query);
    }
    canonical
}

/// Canonical host of a target, if it parses as a URL.
pub fn host_of(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    Url::parse(&candidate)
        .ok()?
        .host_str()
        .map(str::to_string)
}

// ─── Target set ──────────────────────────────────────────────────────────────

/// Ordered, deduplicated collection of canonical targets.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw inputs, preserving first-appearance order of
    /// distinct canonical forms.
    pub fn from_raw<I, S>(raws: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for raw in raws {
            set.add(raw.as_ref());
        }
        set
    }

    /// Add a raw target. Returns true on first insertion of its canonical
    /// form, false for duplicates.
    pub fn add(&mut self, raw: &str) -> bool {
        let canonical = canonicalize(raw);
        if self.seen.insert(canonical.clone()) {
            self.ordered.push(canonical);
            true
        } else {
            false
        }
    }

    /// Canonical targets in insertion order.
    pub fn targets(&self) -> &[String] {
        &self.ordered
    }

    /// Whether the canonical form of `raw` is already present.
    pub fn contains(&self, raw: &str) -> bool {
        self.seen.contains(&canonicalize(raw))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

// ─── Crawl expansion ─────────────────────────────────────────────────────────

/// Options handed to the injected crawler for scope expansion.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: usize,
    pub max_pages: usize,
    /// Restrict discovered links to the seed's host.
    pub same_host_only: bool,
    pub js_auto_detect: bool,
    pub js_force: bool,
    /// How long a JS-rendering crawler waits for the page to settle.
    pub js_wait: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 50,
            same_host_only: true,
            js_auto_detect: false,
            js_force: false,
            js_wait: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
#[error("crawl failed: {0}")]
pub struct CrawlError(pub String);

/// Link discovery seam. Implementations issue read-only fetches only.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn discover(&self, seed: &str, opts: &CrawlOptions) -> Result<Vec<String>, CrawlError>;
}

/// Expand a target set by asking the crawler for in-scope links per seed.
///
/// Only the originally present targets are used as seeds; newly discovered
/// targets are appended after them and never reordered. Returns the number
/// of targets added.
pub async fn expand_scope(
    set: &mut TargetSet,
    crawler: &dyn Crawler,
    opts: &CrawlOptions,
) -> usize {
    let seeds: Vec<String> = set.targets().to_vec();
    let mut added = 0;
    for seed in seeds {
        match crawler.discover(&seed, opts).await {
            Ok(links) => {
                let seed_host = host_of(&seed);
                for link in links {
                    if opts.same_host_only && host_of(&link) != seed_host {
                        debug!(seed = %seed, link = %link, "dropping off-host link");
                        continue;
                    }
                    if set.add(&link) {
                        added += 1;
                    }
                }
            }
            Err(e) => {
                warn!(seed = %seed, error = %e, "crawl failed, continuing without expansion");
            }
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_dedup_order() {
        let set = TargetSet::from_raw([
            "https://x.test",
            "https://x.test/",
            "https://x.test/#frag",
            "https://x.test/login",
        ]);
        assert_eq!(
            set.targets(),
            ["https://x.test/", "https://x.test/login"]
        );
    }

    #[test]
    fn test_default_scheme() {
        assert_eq!(canonicalize("x.test"), "http://x.test/");
        assert_eq!(canonicalize("x.test/admin"), "http://x.test/admin");
    }

    #[test]
    fn test_scheme_and_host_lowercased() {
        assert_eq!(canonicalize("HTTPS://X.Test/Path"), "https://x.test/Path");
    }

    #[test]
    fn test_query_preserved_fragment_dropped() {
        assert_eq!(
            canonicalize("https://x.test/search?q=a&p=2#middle"),
            "https://x.test/search?q=a&p=2"
        );
    }

    #[test]
    fn test_default_port_elided_explicit_port_kept() {
        assert_eq!(canonicalize("https://x.test:443/"), "https://x.test/");
        assert_eq!(canonicalize("https://x.test:8443/"), "https://x.test:8443/");
    }

    #[test]
    fn test_trailing_slash_stripped_above_root() {
        assert_eq!(canonicalize("https://x.test/a/b/"), "https://x.test/a/b");
        assert_eq!(canonicalize("https://x.test/"), "https://x.test/");
    }

    #[test]
    fn test_unparseable_input_kept_raw() {
        assert_eq!(canonicalize("  ://broken  "), "://broken");
        let mut set = TargetSet::new();
        assert!(set.add("://broken"));
        assert!(!set.add("://broken"));
    }

    #[test]
    fn test_add_returns_true_on_first_insertion() {
        let mut set = TargetSet::new();
        assert!(set.add("https://a.test"));
        assert!(!set.add("https://a.test/"));
        assert!(set.add("https://b.test"));
        assert_eq!(set.len(), 2);
    }

    struct FixedCrawler {
        links: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl Crawler for FixedCrawler {
        async fn discover(
            &self,
            _seed: &str,
            _opts: &CrawlOptions,
        ) -> Result<Vec<String>, CrawlError> {
            if self.fail {
                Err(CrawlError("boom".into()))
            } else {
                Ok(self.links.clone())
            }
        }
    }

    #[tokio::test]
    async fn test_expand_appends_unique_after_originals() {
        let mut set = TargetSet::from_raw(["https://x.test"]);
        let crawler = FixedCrawler {
            links: vec![
                "https://x.test/login".into(),
                "https://x.test".into(),
                "https://x.test/login/".into(),
            ],
            fail: false,
        };
        let added = expand_scope(&mut set, &crawler, &CrawlOptions::default()).await;
        assert_eq!(added, 1);
        assert_eq!(
            set.targets(),
            ["https://x.test/", "https://x.test/login"]
        );
    }

    #[tokio::test]
    async fn test_expand_filters_off_host_links() {
        let mut set = TargetSet::from_raw(["https://x.test"]);
        let crawler = FixedCrawler {
            links: vec!["https://evil.test/".into(), "https://x.test/a".into()],
            fail: false,
        };
        expand_scope(&mut set, &crawler, &CrawlOptions::default()).await;
        assert_eq!(set.targets(), ["https://x.test/", "https://x.test/a"]);
    }

    #[tokio::test]
    async fn test_expand_crawl_failure_is_not_fatal() {
        let mut set = TargetSet::from_raw(["https://x.test"]);
        let crawler = FixedCrawler {
            links: vec![],
            fail: true,
        };
        let added = expand_scope(&mut set, &crawler, &CrawlOptions::default()).await;
        assert_eq!(added, 0);
        assert_eq!(set.targets(), ["https://x.test/"]);
    }
}
