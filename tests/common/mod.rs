//! Shared test doubles and fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use atlas::search::SearchHit;
use atlas::store::paths::{manifest_key, DatePartition, OutcomePath};
use atlas::store::put_json;
use atlas::types::{AppError, Manifest, Result};
use atlas::{LLMClient, ObjectStore, SearchProvider};
use chrono::Utc;
use serde_json::{Map, Value};

// ============= Mock LLM Client =============

/// Mock LLM client with a fixed response.
#[derive(Clone)]
pub struct MockLLMClient {
    response: String,
    should_fail: bool,
}

impl MockLLMClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            response: String::new(),
            should_fail: true,
        }
    }

    /// Responds with a valid two-topic decomposition plan.
    pub fn decomposition() -> Self {
        Self::new(
            r#"[
  {"topic": "What are the current performance best practices?",
   "search_queries": ["performance best practices guide"],
   "search_params": {"search_depth": "advanced"}},
  {"topic": "Which security issues surfaced in the last year?",
   "search_queries": ["security advisories last 12 months"]}
]"#,
        )
    }

    /// Responds with valid structured research findings.
    pub fn findings() -> Self {
        Self::new(
            r#"{
  "executive_summary": "The topic is well understood.",
  "key_insights": [{
    "insight": "Adopt the documented approach",
    "source_url": "https://example.com/guide",
    "confidence": "high",
    "actionability": "Follow the guide"
  }],
  "sources_consulted": ["https://example.com/guide"],
  "research_quality": {
    "source_count": 1,
    "confidence_score": 0.9,
    "coverage_assessment": "partial"
  }
}"#,
        )
    }

    /// Responds with a sectioned synthesis report.
    pub fn report() -> Self {
        Self::new(
            "## Executive Summary\nFindings are consistent across projects.\n\n\
             ## Recommended Action Items\nAdopt the documented approaches.\n\n\
             Overall confidence: 80%",
        )
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self.response.clone())
    }

    async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

// ============= Mock Search Provider =============

/// Mock search provider returning one canned hit per query.
pub struct MockSearchProvider {
    pub should_fail: bool,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self { should_fail: false }
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, _params: &Map<String, Value>) -> Result<Vec<SearchHit>> {
        if self.should_fail {
            return Err(AppError::Search("Mock search failure".to_string()));
        }
        Ok(vec![SearchHit {
            title: format!("Result for {query}"),
            url: "https://example.com/guide".to_string(),
            content: "Canned search content".to_string(),
            published_date: None,
            score: Some(0.8),
        }])
    }
}

// ============= Fixtures =============

/// Write a manifest for a run of `topics` under today's date partition.
pub async fn seed_manifest(store: &dyn ObjectStore, run_id: &str, topics: &[&str]) -> Manifest {
    let date = DatePartition::today();
    let manifest = Manifest {
        total_sub_topics: topics.len(),
        project_count: 1,
        run_id: run_id.to_string(),
        timestamp: Utc::now(),
        expected_files: topics
            .iter()
            .map(|t| OutcomePath::expected(date, run_id, "proj", t))
            .collect(),
    };
    put_json(store, &manifest_key(date, run_id), &manifest)
        .await
        .unwrap();
    manifest
}

/// Write a minimal success record at an expected path.
pub async fn seed_success(store: &dyn ObjectStore, path: &OutcomePath) {
    let outcome = serde_json::json!({
        "metadata": {
            "runId": path.run_id,
            "projectName": path.project,
            "subTopic": "seeded topic",
            "searchQueries": [],
            "timestamp": Utc::now(),
            "configVersion": "test",
            "executionTimeSeconds": 0.1,
            "model": "mock-model"
        },
        "structuredFindings": {
            "executive_summary": "Seeded summary",
            "key_insights": [{
                "insight": "Seeded insight",
                "source_url": "https://example.com",
                "confidence": "medium",
                "actionability": "None"
            }],
            "sources_consulted": ["https://example.com"]
        },
        "rawAgentOutput": "seeded"
    });
    put_json(store, &path.render(), &outcome).await.unwrap();
}
