//! Work item execution
//!
//! A worker owns one delivered work item end to end: run the item's search
//! queries, research the sub-topic with the LLM, parse the structured
//! findings, and write exactly one outcome record at the item's pre-assigned
//! path. Success and failure are both durable records, so the completion
//! tracker counts a failed attempt the same way it counts a successful one.
//!
//! Malformed LLM output is not an error: it degrades to a low-confidence
//! placeholder payload carrying a `parsing_error` annotation, and the item
//! still succeeds. Only search/LLM/store failures take the failure path, and
//! those propagate after the failure record lands so the queue's retry policy
//! applies.

use crate::llm::LLMClient;
use crate::queue::QueueReceiver;
use crate::search::{format_hits, SearchProvider};
use crate::store::paths::OutcomePath;
use crate::store::{put_json, ObjectStore};
use crate::types::{
    AppError, FailureRecord, OutcomeMetadata, ResearchOutcome, Result, StructuredFindings,
    WorkItem,
};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::time::Instant;
use tracing::{error, info, warn};

const DEFAULT_WORKER_PROMPT: &str = r#"You are a specialized research agent conducting deep research on specific topics.

Your research approach:
1. Use the provided search results to find current, authoritative information
2. Synthesize findings into structured insights with mandatory source citations
3. CRITICAL: Every claim must be tied to a specific source URL
4. Provide confidence assessments and actionability for each finding

Focus on quality over quantity - find the most relevant and current information."#;

const OUTPUT_FORMAT: &str = r#"MANDATORY OUTPUT FORMAT:
Your final response MUST be a valid JSON object. Every insight must include a source URL.
No insights without sources will be accepted.

JSON Structure:
{
  "executive_summary": "2-3 sentence overview of key findings",
  "key_insights": [
    {
      "insight": "Specific, actionable finding or recommendation",
      "source_url": "Exact URL where this information was found",
      "confidence": "high|medium|low based on source authority and evidence",
      "actionability": "How this can be practically implemented",
      "relevance_score": 7
    }
  ],
  "sources_consulted": ["complete list of all URLs referenced"],
  "research_quality": {
    "source_count": 5,
    "confidence_score": 0.85,
    "coverage_assessment": "comprehensive|partial|limited"
  }
}

Quality Requirements:
- Minimum 3 high-quality insights with sources
- All URLs must come from the provided search results
- Insights must be specific and actionable
- Confidence levels must be justified"#;

pub struct ResearchWorker {
    store: std::sync::Arc<dyn ObjectStore>,
    search: std::sync::Arc<dyn SearchProvider>,
    llm: std::sync::Arc<dyn LLMClient>,
}

impl ResearchWorker {
    pub fn new(
        store: std::sync::Arc<dyn ObjectStore>,
        search: std::sync::Arc<dyn SearchProvider>,
        llm: std::sync::Arc<dyn LLMClient>,
    ) -> Self {
        Self { store, search, llm }
    }

    /// Process one work item, writing a success or failure record. Returns
    /// the key the outcome landed at.
    pub async fn process(&self, item: &WorkItem) -> Result<OutcomePath> {
        info!(
            run_id = %item.run_id,
            project = %item.project_name,
            sub_topic = %item.sub_topic,
            "Processing sub-topic"
        );

        match self.research(item).await {
            Ok(outcome) => {
                // The path was assigned at dispatch; a redelivered item
                // overwrites the same key instead of duplicating.
                put_json(self.store.as_ref(), &item.expected_path.render(), &outcome).await?;
                info!(
                    sub_topic = %item.sub_topic,
                    key = %item.expected_path,
                    "Stored research outcome"
                );
                Ok(item.expected_path.clone())
            }
            Err(e) => {
                self.record_failure(item, &e).await;
                Err(e)
            }
        }
    }

    async fn research(&self, item: &WorkItem) -> Result<ResearchOutcome> {
        let started = Instant::now();

        let evidence = self.gather_evidence(item).await?;
        let system = build_worker_prompt(item);
        let prompt = build_research_query(item, &evidence);

        let raw_output = self.llm.generate_with_system(&system, &prompt).await?;
        let findings = parse_structured_findings(&raw_output);

        Ok(ResearchOutcome {
            metadata: OutcomeMetadata {
                run_id: item.run_id.clone(),
                project_name: item.project_name.clone(),
                sub_topic: item.sub_topic.clone(),
                search_queries: item.search_queries.clone(),
                search_params: item.search_params.clone(),
                timestamp: Utc::now(),
                config_version: item.config_version.clone(),
                execution_time_seconds: (started.elapsed().as_secs_f64() * 100.0).round() / 100.0,
                model: self.llm.model_name().to_string(),
            },
            structured_findings: findings,
            raw_agent_output: raw_output,
        })
    }

    /// Run every search query concurrently, tolerating individual failures.
    /// Errors only when no query produced results.
    async fn gather_evidence(&self, item: &WorkItem) -> Result<String> {
        let searches = item
            .search_queries
            .iter()
            .map(|query| self.search.search(query, &item.search_params));
        let results = join_all(searches).await;

        let mut blocks = Vec::with_capacity(item.search_queries.len());
        let mut last_error = None;
        for (query, result) in item.search_queries.iter().zip(results) {
            match result {
                Ok(hits) => blocks.push(format_hits(query, &hits)),
                Err(e) => {
                    warn!(query = %query, "Search query failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        if blocks.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| AppError::Search("No search queries on work item".to_string())));
        }
        Ok(blocks.join("\n"))
    }

    /// Best effort: a lost failure record only degrades completion tracking,
    /// it must never mask the original error.
    async fn record_failure(&self, item: &WorkItem, cause: &AppError) {
        let record = FailureRecord {
            sub_topic: item.sub_topic.clone(),
            error: cause.to_string(),
            timestamp: Utc::now(),
            state: crate::store::paths::OutcomeState::Failed,
        };
        let key = item.expected_path.failed_variant().render();
        match put_json(self.store.as_ref(), &key, &record).await {
            Ok(()) => error!(sub_topic = %item.sub_topic, key = %key, "Stored failure record: {cause}"),
            Err(e) => error!(sub_topic = %item.sub_topic, "Failed to store failure record: {e}"),
        }
    }

    /// Consume work items from a queue receiver until the queue closes. Item
    /// failures are logged and do not stop the loop.
    pub async fn run(&self, receiver: &QueueReceiver) {
        loop {
            match receiver.recv().await {
                Ok(Some(item)) => {
                    if let Err(e) = self.process(&item).await {
                        error!(sub_topic = %item.sub_topic, "Work item failed: {e}");
                    }
                }
                Ok(None) => break,
                Err(e) => error!("Discarding undecodable work item: {e}"),
            }
        }
    }
}

fn build_worker_prompt(item: &WorkItem) -> String {
    let base = item
        .prompts
        .worker_prompt_template
        .as_deref()
        .unwrap_or(DEFAULT_WORKER_PROMPT);

    let description = item
        .project
        .description
        .as_deref()
        .unwrap_or("No description provided");
    let focus_areas = if item.project.focus_areas.is_empty() {
        "General improvement".to_string()
    } else {
        item.project.focus_areas.join(", ")
    };
    let known_issues = if item.project.known_issues.is_empty() {
        "None reported".to_string()
    } else {
        item.project.known_issues.join(", ")
    };

    let queries = item
        .search_queries
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{base}\n\n\
         Project Context:\n\
         - Project: {project}\n\
         - Description: {description}\n\
         - Focus Areas: {focus_areas}\n\
         - Known Issues: {known_issues}\n\n\
         Your Current Research Topic: {topic}\n\n\
         Optimized Search Queries Used:\n{queries}\n\n\
         {OUTPUT_FORMAT}",
        project = item.project_name,
        topic = item.sub_topic,
    )
}

fn build_research_query(item: &WorkItem, evidence: &str) -> String {
    format!(
        "Research this topic comprehensively using the search results below: {topic}\n\n\
         {evidence}\n\
         Respond with a single valid JSON object in the mandated structure.",
        topic = item.sub_topic,
    )
}

/// Parse and validate the structured JSON findings from raw model output.
///
/// Accepts the span from the first `{` to the last `}` so surrounding prose
/// is tolerated. Any validation failure downgrades to a low-confidence
/// placeholder rather than failing the item; the raw output is preserved
/// alongside for manual review.
pub fn parse_structured_findings(raw_output: &str) -> StructuredFindings {
    match try_parse_findings(raw_output) {
        Ok(findings) => findings,
        Err(reason) => {
            warn!("Could not parse structured findings: {reason}");
            placeholder_findings(reason)
        }
    }
}

fn try_parse_findings(raw_output: &str) -> std::result::Result<StructuredFindings, String> {
    let start = raw_output
        .find('{')
        .ok_or_else(|| "No JSON object found in output".to_string())?;
    let end = raw_output
        .rfind('}')
        .ok_or_else(|| "No JSON object found in output".to_string())?;
    let json_str = &raw_output[start..=end];

    let value: Value =
        serde_json::from_str(json_str).map_err(|e| format!("Invalid JSON: {e}"))?;

    for field in ["executive_summary", "key_insights", "sources_consulted"] {
        if value.get(field).is_none() {
            return Err(format!("Missing required field: {field}"));
        }
    }
    let insights = value["key_insights"]
        .as_array()
        .ok_or_else(|| "key_insights must be a list".to_string())?;
    for insight in insights {
        if insight.get("source_url").is_none() {
            return Err("Each insight must have a source_url".to_string());
        }
    }

    serde_json::from_value(value).map_err(|e| format!("Findings schema mismatch: {e}"))
}

fn placeholder_findings(reason: String) -> StructuredFindings {
    use crate::types::{ConfidenceLabel, CoverageAssessment, KeyInsight, ResearchQuality};

    StructuredFindings {
        executive_summary: "Research completed but output format could not be parsed".to_string(),
        key_insights: vec![KeyInsight {
            insight: "Raw research data available in agent output".to_string(),
            source_url: "N/A - parsing error".to_string(),
            confidence: ConfidenceLabel::Low,
            actionability: "Manual review required".to_string(),
            relevance_score: None,
        }],
        sources_consulted: Vec::new(),
        research_quality: ResearchQuality {
            source_count: 0,
            confidence_score: 0.3,
            coverage_assessment: CoverageAssessment::Limited,
        },
        parsing_error: Some(reason),
    }
}
