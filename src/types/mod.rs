use crate::store::paths::{OutcomePath, OutcomeState};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

// ============= Work Item Types =============

/// One unit of dispatched work: a single sub-topic with its search strategy.
///
/// Built by the decomposer, serialized as the queue message body, consumed by
/// exactly one worker attempt. The expected outcome path is fixed before
/// dispatch, so redelivery re-writes the same key instead of duplicating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub sub_topic: String,
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub search_params: Map<String, Value>,
    /// Where the success record must land; the failed sibling is derived.
    pub expected_path: OutcomePath,
    /// Copy of the originating project config so the worker never re-fetches.
    pub project: ProjectConfig,
    #[serde(default)]
    pub prompts: ResearchPrompts,
    pub config_version: String,
}

/// A research sub-topic with its optimized search strategy, as produced by
/// decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTopicPlan {
    pub topic: String,
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub search_params: Map<String, Value>,
}

/// One project to research, from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub research_topic: Option<String>,
    #[serde(default)]
    pub known_issues: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// Shared prompt templates carried along with each work item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPrompts {
    #[serde(default)]
    pub worker_prompt_template: Option<String>,
}

// ============= Manifest Types =============

/// Durable record of what a run was expected to produce.
///
/// Written once per run after all work items have been enqueued; read many
/// times by the completion tracker; never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub total_sub_topics: usize,
    pub project_count: usize,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub expected_files: Vec<OutcomePath>,
}

// ============= Outcome Record Types =============

/// A successful outcome record: structured findings plus the raw output they
/// were parsed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOutcome {
    pub metadata: OutcomeMetadata,
    pub structured_findings: StructuredFindings,
    pub raw_agent_output: String,
}

/// Execution metadata attached to a successful outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeMetadata {
    pub run_id: String,
    pub project_name: String,
    pub sub_topic: String,
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub search_params: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub config_version: String,
    pub execution_time_seconds: f64,
    pub model: String,
}

/// The minimal schema every success payload must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFindings {
    pub executive_summary: String,
    pub key_insights: Vec<KeyInsight>,
    pub sources_consulted: Vec<String>,
    #[serde(default)]
    pub research_quality: ResearchQuality,
    /// Set when the raw output failed validation and a placeholder payload
    /// was substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_error: Option<String>,
}

/// One finding with its mandatory source reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInsight {
    pub insight: String,
    pub source_url: String,
    pub confidence: ConfidenceLabel,
    pub actionability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<u8>,
}

/// Confidence label attached to each insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

/// Aggregate quality signals for one outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuality {
    pub source_count: usize,
    pub confidence_score: f64,
    pub coverage_assessment: CoverageAssessment,
}

impl Default for ResearchQuality {
    fn default() -> Self {
        Self {
            source_count: 0,
            confidence_score: 0.0,
            coverage_assessment: CoverageAssessment::Limited,
        }
    }
}

/// How thoroughly the sources covered the sub-topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageAssessment {
    Comprehensive,
    Partial,
    Limited,
}

/// A failed outcome record written to the failure namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub sub_topic: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub state: OutcomeState,
}

// ============= Completion Types =============

/// Classification of a run's completion, derived on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Every expected outcome (success or failed) has materialized.
    Complete,
    /// Completion rate is at or above the configured minimum.
    Acceptable,
    /// Below the minimum; the coordinator should keep polling.
    Incomplete,
    /// No manifest exists for the requested run.
    NotFound,
}

/// Derived view of how much of a run has materialized. Never persisted on its
/// own; embedded in report metadata.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionStatus {
    pub status: Completion,
    pub run_id: String,
    pub total_expected: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub total_completed: usize,
    pub completion_rate: f64,
    /// Expected paths with neither a success nor a failed record yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<String>)]
    pub missing: Vec<OutcomePath>,
}

impl CompletionStatus {
    /// Completion view for a run whose manifest does not exist.
    pub fn not_found(run_id: &str) -> Self {
        Self {
            status: Completion::NotFound,
            run_id: run_id.to_string(),
            total_expected: 0,
            success_count: 0,
            failed_count: 0,
            total_completed: 0,
            completion_rate: 0.0,
            missing: Vec::new(),
        }
    }
}

// ============= API Request/Response Types =============

/// Request to kick off a research run. All fields optional; configuration
/// supplies the project list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DispatchRequest {
    /// Restrict the run to these configured projects by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<String>>,
}

/// Summary returned to the caller of a dispatch operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatchSummary {
    pub message: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub sub_topics_queued: usize,
    pub total_projects: usize,
}

/// Trigger payload for the synthesis coordinator. Re-emitted verbatim (with
/// an incremented `retry_count`) when the coordinator reschedules itself, so
/// no state lives anywhere but this payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SynthesisRequest {
    /// Date to synthesize; defaults to today (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_date: Option<NaiveDate>,
    /// Run to synthesize; defaults to the most recent run for the date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Strictly increases by one per reschedule.
    #[serde(default)]
    pub retry_count: u32,
}

/// Response for a synthesis invocation that ended in a scheduled retry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SynthesisInProgress {
    pub message: String,
    pub retry_count: u32,
    pub next_check_in_secs: u64,
}

/// Response for a synthesis invocation that produced a report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SynthesisCompleted {
    pub message: String,
    pub run_id: String,
    pub report_location: String,
    pub completion_status: CompletionStatus,
    pub confidence_score: f64,
}

// ============= Report Types =============

/// The stored synthesis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    pub metadata: ReportMetadata,
    pub comprehensive_report: String,
    pub report_sections: Vec<ReportSection>,
}

/// Metadata stored alongside the report body, including the completion view
/// the synthesis was performed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub synthesis_date: DateTime<Utc>,
    pub research_period: String,
    pub run_id: String,
    pub execution_time_seconds: f64,
    pub completion_status: CompletionStatus,
    pub total_research_files: usize,
    pub failed_research_files: usize,
    pub synthesis_model: String,
    pub overall_confidence_score: f64,
}

/// One extracted section of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
}

// ============= Error Types =============

/// Application-wide error taxonomy.
///
/// Configuration and store errors are fatal for the invocation that hits
/// them; per-item execution errors are recorded and propagated so queue-level
/// retry applies; malformed LLM output is downgraded before it ever becomes
/// an error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Configuration(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::LLM(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Search(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Store(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Queue(msg) => (axum::http::StatusCode::BAD_GATEWAY, msg),
            AppError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paths::{DatePartition, OutcomePath};

    #[test]
    fn test_manifest_wire_format() {
        let date = DatePartition::from_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        let manifest = Manifest {
            total_sub_topics: 2,
            project_count: 1,
            run_id: "run-1".to_string(),
            timestamp: Utc::now(),
            expected_files: vec![
                OutcomePath::expected(date, "run-1", "proj", "Topic One"),
                OutcomePath::expected(date, "run-1", "proj", "Topic Two"),
            ],
        };

        let json: Value =
            serde_json::from_str(&serde_json::to_string(&manifest).unwrap()).unwrap();
        assert_eq!(json["totalSubTopics"], 2);
        assert_eq!(json["projectCount"], 1);
        assert_eq!(json["runId"], "run-1");
        assert_eq!(
            json["expectedFiles"][0],
            "research/2024/01/15/run-1/success/proj_topic-one.json"
        );
    }

    #[test]
    fn test_failure_record_wire_format() {
        let record = FailureRecord {
            sub_topic: "Topic".to_string(),
            error: "quota exceeded".to_string(),
            timestamp: Utc::now(),
            state: OutcomeState::Failed,
        };
        let json: Value = serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(json["subTopic"], "Topic");
        assert_eq!(json["state"], "failed");
    }

    #[test]
    fn test_work_item_roundtrip() {
        let date = DatePartition::from_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let item = WorkItem {
            run_id: "r".to_string(),
            timestamp: Utc::now(),
            project_name: "proj".to_string(),
            sub_topic: "Topic".to_string(),
            search_queries: vec!["q1".to_string()],
            search_params: Map::new(),
            expected_path: OutcomePath::expected(date, "r", "proj", "Topic"),
            project: ProjectConfig {
                name: "proj".to_string(),
                ..Default::default()
            },
            prompts: ResearchPrompts::default(),
            config_version: "1".to_string(),
        };

        let json = serde_json::to_string(&item).unwrap();
        assert!(
            json.contains("\"expectedPath\":\"research/2024/03/01/r/success/proj_topic.json\"")
        );
        let back: WorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expected_path, item.expected_path);
    }

    #[test]
    fn test_synthesis_request_retry_count_defaults() {
        let req: SynthesisRequest = serde_json::from_str("{\"run_id\":\"abc\"}").unwrap();
        assert_eq!(req.retry_count, 0);
        assert_eq!(req.run_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_structured_findings_minimal_schema() {
        let raw = serde_json::json!({
            "executive_summary": "Summary",
            "key_insights": [{
                "insight": "Finding",
                "source_url": "https://example.com",
                "confidence": "medium",
                "actionability": "Do the thing"
            }],
            "sources_consulted": ["https://example.com"]
        });
        let findings: StructuredFindings = serde_json::from_value(raw).unwrap();
        assert_eq!(findings.key_insights.len(), 1);
        assert_eq!(findings.key_insights[0].confidence, ConfidenceLabel::Medium);
        assert_eq!(findings.research_quality.source_count, 0);
        assert!(findings.parsing_error.is_none());
    }
}
