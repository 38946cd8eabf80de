//! Web search backends.
//!
//! Two swappable engines return ordered {title, url, description} triples.
//! Every failure, HTTP or parse, degrades to an empty result list and is
//! logged; nothing is raised to the caller.

mod bing;
mod ddg;

pub use bing::BingSearch;
pub use ddg::DuckDuckGo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
}

/// A query-in, results-out search engine.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name for logs and CLI selection.
    fn name(&self) -> &'static str;

    /// Best-effort search; failures yield an empty list.
    async fn search(&self, query: &str, limit: usize) -> Vec<SearchItem>;
}

/// Numbered plain-text rendering used as agent tool output.
pub fn render_results(query: &str, items: &[SearchItem]) -> String {
    if items.is_empty() {
        return "No results found.".to_string();
    }

    let mut out = format!("Top {} results for '{}':\n", items.len(), query);
    for (idx, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}\n{}\n{}\n",
            idx + 1,
            item.title,
            item.url,
            item.description.as_deref().unwrap_or("")
        ));
    }
    out
}

/// Resolve a backend by its config/CLI name.
pub fn backend_from_name(name: &str) -> Option<Box<dyn SearchBackend>> {
    match name {
        "bing" => Some(Box::new(BingSearch::new())),
        "duckduckgo" | "ddg" => Some(Box::new(DuckDuckGo::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reports_empty_result_sets() {
        assert_eq!(render_results("anything", &[]), "No results found.");
    }

    #[test]
    fn render_numbers_items_in_order() {
        let items = vec![
            SearchItem {
                title: "First".to_string(),
                url: "https://a.example".to_string(),
                description: Some("snippet".to_string()),
            },
            SearchItem {
                title: "Second".to_string(),
                url: "https://b.example".to_string(),
                description: None,
            },
        ];
        let rendered = render_results("query", &items);
        assert!(rendered.starts_with("Top 2 results for 'query':"));
        assert!(rendered.contains("1. First\nhttps://a.example\nsnippet"));
        assert!(rendered.contains("2. Second\nhttps://b.example\n"));
    }

    #[test]
    fn backend_lookup_covers_aliases() {
        assert!(backend_from_name("bing").is_some());
        assert!(backend_from_name("ddg").is_some());
        assert!(backend_from_name("duckduckgo").is_some());
        assert!(backend_from_name("altavista").is_none());
    }
}
