//! DuckDuckGo hosted-API backend.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{SearchBackend, SearchItem};

const DDG_API_URL: &str = "https://api.duckduckgo.com/";

/// Backend over the DuckDuckGo instant-answer JSON API.
pub struct DuckDuckGo {
    client: reqwest::Client,
}

impl DuckDuckGo {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, query: &str) -> anyhow::Result<ApiResponse> {
        let response = self
            .client
            .get(DDG_API_URL)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("no_redirect", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

impl Default for DuckDuckGo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGo {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SearchItem> {
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        match self.fetch(query).await {
            Ok(response) => items_from_response(response, limit),
            Err(err) => {
                warn!(%query, error = %err, "duckduckgo query failed");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<Topic>,
}

/// Related topics arrive either as plain results or as named groups of
/// results; both shapes carry the same fields.
#[derive(Debug, Deserialize)]
struct Topic {
    #[serde(rename = "Text", default)]
    text: Option<String>,
    #[serde(rename = "FirstURL", default)]
    first_url: Option<String>,
    #[serde(rename = "Topics", default)]
    topics: Vec<Topic>,
}

fn items_from_response(response: ApiResponse, limit: usize) -> Vec<SearchItem> {
    let mut items = Vec::new();

    if !response.abstract_url.is_empty() {
        items.push(SearchItem {
            title: if response.heading.is_empty() {
                response.abstract_url.clone()
            } else {
                response.heading.clone()
            },
            url: response.abstract_url.clone(),
            description: (!response.abstract_text.is_empty()).then(|| response.abstract_text.clone()),
        });
    }

    flatten_topics(&response.related_topics, &mut items, limit);
    items.truncate(limit);
    items
}

fn flatten_topics(topics: &[Topic], items: &mut Vec<SearchItem>, limit: usize) {
    for topic in topics {
        if items.len() >= limit {
            return;
        }
        match (&topic.first_url, &topic.text) {
            (Some(url), Some(text)) if !url.is_empty() => {
                items.push(SearchItem {
                    title: text.clone(),
                    url: url.clone(),
                    description: Some(text.clone()),
                });
            }
            _ => flatten_topics(&topic.topics, items, limit),
        }
    }
}
