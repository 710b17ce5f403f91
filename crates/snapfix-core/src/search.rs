//! Site-restricted web search against the DuckDuckGo HTML endpoint.
//!
//! The endpoint returns unstructured markup which is parsed defensively:
//! result anchors carry a fixed `result__a` class marker, and hrefs may be
//! redirect URLs carrying the real destination in a `uddg` query parameter.
//! Any internal failure, including a markup shape change that matches zero
//! anchors, degrades to an empty result list. Callers never see an error.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::conversation::SearchResult;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Outbound web search seam.
pub trait WebSearcher: Send + Sync {
    /// Returns up to `max_results` hits for a site-restricted query.
    /// Degrades to an empty list on failure; never errors.
    fn search(
        &self,
        query: &str,
        site_allowlist: &[&str],
        max_results: usize,
    ) -> impl Future<Output = Vec<SearchResult>> + Send;
}

/// DuckDuckGo HTML search client.
pub struct DuckDuckGoSearcher {
    http: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearcher {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(timeout, SEARCH_ENDPOINT)
    }

    pub fn with_endpoint(timeout: Duration, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }

    async fn fetch(&self, query: &str) -> Result<String, reqwest::Error> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(&[("q", query)])
            .send()
            .await?
            .error_for_status()?;
        response.text().await
    }
}

impl WebSearcher for DuckDuckGoSearcher {
    async fn search(
        &self,
        query: &str,
        site_allowlist: &[&str],
        max_results: usize,
    ) -> Vec<SearchResult> {
        let restricted = restrict_query(query, site_allowlist);
        match self.fetch(&restricted).await {
            Ok(html) => extract_results(&html, max_results),
            Err(err) => {
                tracing::warn!(query, error = %err, "web search failed, degrading to empty results");
                Vec::new()
            }
        }
    }
}

/// Combines a query with a site-restriction clause:
/// `query (site:A OR site:B OR ...)`. No clause when the allowlist is empty.
pub(crate) fn restrict_query(query: &str, site_allowlist: &[&str]) -> String {
    if site_allowlist.is_empty() {
        return query.to_string();
    }
    let clause = site_allowlist
        .iter()
        .map(|site| format!("site:{site}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("{query} ({clause})")
}

/// Extracts `(title, url)` pairs from result anchors, stopping once
/// `max_results` entries are collected.
pub(crate) fn extract_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="[^"]*result__a[^"]*"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("anchor pattern is valid")
    });

    let mut results = Vec::new();
    for capture in anchor.captures_iter(html) {
        if results.len() >= max_results {
            break;
        }
        let href = unescape_entities(&capture[1]);
        let url = resolve_redirect(&href);
        let title = unescape_entities(strip_tags(&capture[2]).trim());
        if url.is_empty() || title.is_empty() {
            continue;
        }
        results.push(SearchResult {
            title,
            url,
            snippet: String::new(),
        });
    }
    results
}

/// When the href is a DuckDuckGo redirect, decodes and substitutes the
/// real destination from its `uddg` query parameter; otherwise the href is
/// used as-is.
pub(crate) fn resolve_redirect(href: &str) -> String {
    if !href.contains("duckduckgo.com/l/") {
        return href.to_string();
    }

    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    let Ok(parsed) = Url::parse(&absolute) else {
        return href.to_string();
    };
    parsed
        .query_pairs()
        .find(|(key, _)| key == "uddg")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| href.to_string())
}

/// Strips embedded markup from extracted title text.
fn strip_tags(fragment: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"));
    tag.replace_all(fragment, "").into_owned()
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
        <div class="result">
          <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpart&amp;rut=abc123">Example <b>Part</b> Store</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://ifixit.com/guide">iFixit Repair &amp; Teardown Guide</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://shop.example.org/item">Replacement Item</a>
        </div>
    "#;

    #[test]
    fn restrict_query_builds_site_clause() {
        let query = restrict_query("washer door seal", &["amazon.com", "ebay.com"]);
        assert_eq!(query, "washer door seal (site:amazon.com OR site:ebay.com)");
    }

    #[test]
    fn restrict_query_without_allowlist_is_unchanged() {
        assert_eq!(restrict_query("door seal", &[]), "door seal");
    }

    #[test]
    fn extract_decodes_redirect_urls() {
        let results = extract_results(SAMPLE_HTML, 10);
        assert_eq!(results[0].url, "https://example.com/part");
        assert_eq!(results[0].title, "Example Part Store");
    }

    #[test]
    fn extract_keeps_direct_urls_as_is() {
        let results = extract_results(SAMPLE_HTML, 10);
        assert_eq!(results[1].url, "https://ifixit.com/guide");
        assert_eq!(results[1].title, "iFixit Repair & Teardown Guide");
    }

    #[test]
    fn extract_stops_at_max_results() {
        assert_eq!(extract_results(SAMPLE_HTML, 2).len(), 2);
        assert_eq!(extract_results(SAMPLE_HTML, 10).len(), 3);
    }

    #[test]
    fn unmatched_markup_degrades_to_empty() {
        assert!(extract_results("<html><body>layout changed</body></html>", 5).is_empty());
    }

    #[test]
    fn resolve_redirect_extracts_uddg_parameter() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpart&rut=9f27";
        assert_eq!(resolve_redirect(href), "https://example.com/part");
    }

    #[test]
    fn resolve_redirect_passes_through_plain_urls() {
        assert_eq!(
            resolve_redirect("https://example.com/direct"),
            "https://example.com/direct"
        );
    }

    #[test]
    fn resolve_redirect_without_uddg_keeps_href() {
        let href = "https://duckduckgo.com/l/?other=1";
        assert_eq!(resolve_redirect(href), href);
    }
}
