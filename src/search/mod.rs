//! Web search provider
//!
//! Workers gather raw material through a search provider before asking the
//! LLM to extract structured findings. The provider is an external
//! collaborator behind [`SearchProvider`]; the bundled implementation speaks
//! the JSON POST protocol of hosted search APIs (Tavily and compatible).

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// External search capability.
///
/// `params` is the free-form search-parameter map carried on the work item
/// (depth, time range, domain filters); providers merge it over their own
/// defaults.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, params: &Map<String, Value>) -> Result<Vec<SearchHit>>;
}

/// HTTP search provider for Tavily-style JSON search APIs.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, max_results: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            max_results,
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, params: &Map<String, Value>) -> Result<Vec<SearchHit>> {
        // Defaults tuned for research; the work item's params win on conflict.
        let mut payload = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "advanced",
            "include_answer": false,
            "include_raw_content": false,
            "include_images": false,
            "max_results": self.max_results,
        });
        if let Some(obj) = payload.as_object_mut() {
            for (k, v) in params {
                obj.insert(k.clone(), v.clone());
            }
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Search(format!("Search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Search(format!(
                "Search API returned {} for query '{query}'",
                response.status()
            )));
        }

        let body: SearchApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::Search(format!("Malformed search response: {e}")))?;

        Ok(body.results)
    }
}

/// Format search hits as a prompt block the research LLM can cite from.
pub fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    let mut output = format!("Found {} search results for '{}':\n\n", hits.len(), query);
    for (i, hit) in hits.iter().enumerate() {
        output.push_str(&format!("{}. **{}**\n   URL: {}\n", i + 1, hit.title, hit.url));
        let snippet: String = hit.content.chars().take(300).collect();
        output.push_str(&format!("   Content: {snippet}\n"));
        if let Some(date) = &hit.published_date {
            output.push_str(&format!("   Published: {date}\n"));
        }
        if let Some(score) = hit.score {
            output.push_str(&format!("   Relevance Score: {score:.3}\n"));
        }
        output.push('\n');
    }
    output
}
