//! Bing SERP scraping backend.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{debug, warn};

use super::{SearchBackend, SearchItem};

const BING_SEARCH_URL: &str = "https://www.bing.com/search";
const PAGE_SIZE: usize = 10;

static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/68.0.3440.106 Safari/537.36",
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Ubuntu Chromium/49.0.2623.108 Chrome/49.0.2623.108 Safari/537.36",
    "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/41.0.2228.0 Safari/537.36",
    "Mozilla/5.0 (Windows; U; Windows NT 6.1; rv:2.2) Gecko/20110201",
];

static RESULT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<li class="b_algo".*?</li>"#).expect("invalid block regex"));
static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<h2[^>]*>\s*<a[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("invalid link regex")
});
static RESULT_SNIPPET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<p[^>]*>(.*?)</p>").expect("invalid snippet regex"));
static NEXT_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a[^>]*title="Next page""#).expect("invalid next-page regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("invalid tag regex"));

/// Scraping backend against the Bing results page.
pub struct BingSearch {
    client: reqwest::Client,
}

impl BingSearch {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_page(&self, query: &str, first: usize) -> anyhow::Result<String> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let response = self
            .client
            .get(BING_SEARCH_URL)
            .query(&[("q", query), ("first", &first.to_string())])
            .header("User-Agent", user_agent)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://www.bing.com/")
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}

impl Default for BingSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for BingSearch {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SearchItem> {
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut results = Vec::new();
        let mut first = 1;

        while results.len() < limit {
            let html = match self.fetch_page(query, first).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(%query, first, error = %err, "bing page fetch failed");
                    break;
                }
            };

            let (items, has_next) = parse_results_page(&html, results.len());
            debug!(%query, first, count = items.len(), "parsed bing result page");
            if items.is_empty() {
                break;
            }
            results.extend(items);
            if !has_next {
                break;
            }
            first += PAGE_SIZE;
        }

        results.truncate(limit);
        results
    }
}

/// Best-effort extraction of result blocks from one SERP. Returns the items
/// plus whether a next-page link is present.
fn parse_results_page(html: &str, rank_start: usize) -> (Vec<SearchItem>, bool) {
    let mut items = Vec::new();
    let mut rank = rank_start;

    for block in RESULT_BLOCK.find_iter(html) {
        let block = block.as_str();
        let Some(link) = RESULT_LINK.captures(block) else {
            continue;
        };
        rank += 1;

        let url = strip_tags(&link[1]);
        let title = strip_tags(&link[2]);
        let description = RESULT_SNIPPET
            .captures(block)
            .map(|caps| strip_tags(&caps[1]))
            .filter(|text| !text.is_empty());

        items.push(SearchItem {
            title: if title.is_empty() {
                format!("Bing Result {rank}")
            } else {
                title
            },
            url,
            description,
        });
    }

    (items, NEXT_PAGE.is_match(html))
}

fn strip_tags(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, "");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
<ol id="b_results">
<li class="b_algo"><h2><a href="https://example.com/rust?a=1&amp;b=2">The <strong>Rust</strong> Language</a></h2>
<div><p>A language empowering everyone to build reliable software.</p></div></li>
<li class="b_algo"><h2><a href="https://example.org/tokio">Tokio</a></h2></li>
<li class="b_algo"><div>no heading here</div></li>
</ol>
<a title="Next page" href="/search?q=rust&amp;first=11">Next</a>
"#;

    #[test]
    fn parses_title_url_and_snippet() {
        let (items, has_next) = parse_results_page(SAMPLE_PAGE, 0);
        assert_eq!(items.len(), 2);
        assert!(has_next);

        assert_eq!(items[0].title, "The Rust Language");
        assert_eq!(items[0].url, "https://example.com/rust?a=1&b=2");
        assert_eq!(
            items[0].description.as_deref(),
            Some("A language empowering everyone to build reliable software.")
        );

        assert_eq!(items[1].title, "Tokio");
        assert!(items[1].description.is_none());
    }

    #[test]
    fn garbage_input_parses_to_nothing() {
        let (items, has_next) = parse_results_page("<html><body>nope</body></html>", 0);
        assert!(items.is_empty());
        assert!(!has_next);
    }

    #[test]
    fn strip_tags_decodes_entities() {
        assert_eq!(strip_tags("<b>a &amp; b</b> "), "a & b");
    }
}
