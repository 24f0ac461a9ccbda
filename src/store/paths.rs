//! Typed object-store paths
//!
//! Every artifact the pipeline writes lives at a path that is a pure function
//! of (run id, date partition, project, sub-topic slug, outcome state). The
//! decomposer computes these paths before dispatch, so the manifest and the
//! worker that eventually writes the record always agree on the same key.
//!
//! Outcome paths are a typed value rather than raw strings: switching a path
//! between the success and failed namespaces is a state change on
//! [`OutcomePath`], never a substring replacement.

use crate::types::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Root prefix for per-run research artifacts.
pub const RESEARCH_PREFIX: &str = "research";
/// Root prefix for synthesized reports.
pub const REPORTS_PREFIX: &str = "reports";
/// File name of the per-run manifest.
pub const MANIFEST_FILE: &str = "_manifest.json";

/// Maximum slug length before word-boundary truncation.
const MAX_SLUG_LEN: usize = 50;

/// Terminal state of a work item, mapped to a path namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeState {
    /// The worker produced structured findings.
    Success,
    /// The worker's execution failed and an error record was written.
    Failed,
}

impl OutcomeState {
    /// Path segment for this state's namespace.
    pub fn namespace(&self) -> &'static str {
        match self {
            OutcomeState::Success => "success",
            OutcomeState::Failed => "failed",
        }
    }
}

/// Date partition used for path bucketing (`YYYY/MM/DD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DatePartition(NaiveDate);

impl DatePartition {
    /// Partition for a timestamp's UTC calendar date.
    pub fn from_timestamp(ts: &DateTime<Utc>) -> Self {
        Self(ts.date_naive())
    }

    /// Partition for an explicit date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Partition for the current UTC date.
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    /// The underlying date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Parse a `YYYY/MM/DD` path segment.
    pub fn parse(segment: &str) -> Result<Self> {
        NaiveDate::parse_from_str(segment, "%Y/%m/%d")
            .map(Self)
            .map_err(|e| AppError::InvalidInput(format!("Invalid date partition '{segment}': {e}")))
    }
}

impl fmt::Display for DatePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y/%m/%d"))
    }
}

/// Fully-qualified path of one outcome record.
///
/// Renders as
/// `research/<YYYY/MM/DD>/<run-id>/<success|failed>/<project>_<slug>.json`.
/// Serializes to and from that rendered string so the wire format stays a
/// plain path while code works with the typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomePath {
    pub date: DatePartition,
    pub run_id: String,
    pub project: String,
    pub slug: String,
    pub state: OutcomeState,
}

impl OutcomePath {
    /// The expected (success-namespace) path for a sub-topic, computed at
    /// decomposition time.
    pub fn expected(date: DatePartition, run_id: &str, project: &str, sub_topic: &str) -> Self {
        Self {
            date,
            run_id: run_id.to_string(),
            project: project.to_string(),
            slug: slugify(sub_topic),
            state: OutcomeState::Success,
        }
    }

    /// The same path under the other namespace.
    pub fn with_state(&self, state: OutcomeState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// The failure-namespace sibling of this path.
    pub fn failed_variant(&self) -> Self {
        self.with_state(OutcomeState::Failed)
    }

    /// Render the full object key.
    pub fn render(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}_{}.json",
            RESEARCH_PREFIX,
            self.date,
            self.run_id,
            self.state.namespace(),
            self.project,
            self.slug
        )
    }
}

impl fmt::Display for OutcomePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl FromStr for OutcomePath {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        // research/YYYY/MM/DD/<run>/<state>/<project>_<slug>.json
        if parts.len() != 7 || parts[0] != RESEARCH_PREFIX {
            return Err(AppError::InvalidInput(format!("Not an outcome path: {s}")));
        }
        let date = DatePartition::parse(&parts[1..4].join("/"))?;
        let run_id = parts[4].to_string();
        let state = match parts[5] {
            "success" => OutcomeState::Success,
            "failed" => OutcomeState::Failed,
            other => {
                return Err(AppError::InvalidInput(format!(
                    "Unknown outcome namespace '{other}' in path: {s}"
                )));
            }
        };
        let file = parts[6]
            .strip_suffix(".json")
            .ok_or_else(|| AppError::InvalidInput(format!("Outcome path must end in .json: {s}")))?;
        // Slugs never contain underscores, so the last one separates the
        // project (which may contain them) from the slug.
        let (project, slug) = file
            .rsplit_once('_')
            .ok_or_else(|| AppError::InvalidInput(format!("Malformed outcome file name: {s}")))?;

        Ok(Self {
            date,
            run_id,
            project: project.to_string(),
            slug: slug.to_string(),
            state,
        })
    }
}

impl Serialize for OutcomePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for OutcomePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Key of the per-run manifest: `research/<date>/<run-id>/_manifest.json`.
pub fn manifest_key(date: DatePartition, run_id: &str) -> String {
    format!("{RESEARCH_PREFIX}/{date}/{run_id}/{MANIFEST_FILE}")
}

/// Prefix under which one run's outcome records for a state live.
pub fn outcome_prefix(date: DatePartition, run_id: &str, state: OutcomeState) -> String {
    format!("{RESEARCH_PREFIX}/{date}/{run_id}/{}/", state.namespace())
}

/// Prefix under which all of a date's runs live.
pub fn date_prefix(date: DatePartition) -> String {
    format!("{RESEARCH_PREFIX}/{date}/")
}

/// Key of a synthesized report, timestamped to the second.
pub fn report_key(date: DatePartition, run_id: &str, ts: &DateTime<Utc>) -> String {
    format!(
        "{REPORTS_PREFIX}/{date}/comprehensive_research_report_{run_id}_{}.json",
        ts.format("%H%M%S")
    )
}

/// Create a bounded, human-readable slug from a sub-topic.
///
/// Lower-cases, strips everything outside `[a-z0-9 -]`, collapses whitespace
/// and hyphen runs to single hyphens, and truncates at a word boundary.
/// Distinct sub-topics of one project can collide after truncation; that is
/// an accepted risk and is not deduplicated.
pub fn slugify(topic: &str) -> String {
    let lowered = topic.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut last_hyphen = true; // suppress leading hyphens
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_hyphen = false;
        } else if (c.is_whitespace() || c == '-') && !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
        // all other punctuation is dropped
    }
    let mut slug = slug.trim_matches('-').to_string();

    if slug.len() > MAX_SLUG_LEN {
        let cut = &slug[..MAX_SLUG_LEN];
        slug = match cut.rfind('-') {
            Some(idx) => cut[..idx].to_string(),
            None => cut.to_string(),
        };
    }

    if slug.is_empty() {
        "research-topic".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> DatePartition {
        DatePartition::from_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
    }

    #[test]
    fn test_slugify_punctuation_and_spaces() {
        assert_eq!(
            slugify("AI Tools: Privacy & Security!!"),
            "ai-tools-privacy-security"
        );
    }

    #[test]
    fn test_slugify_collapses_hyphen_runs() {
        assert_eq!(slugify("a --  b"), "a-b");
        assert_eq!(slugify("--leading and trailing--"), "leading-and-trailing");
    }

    #[test]
    fn test_slugify_truncates_at_word_boundary() {
        let topic = "what are the primary use cases and benefits of the tool in production";
        let slug = slugify(topic);
        assert!(slug.len() <= 50);
        assert!(!slug.ends_with('-'));
        // Must end on a complete word from the input
        assert!(topic.replace(' ', "-").starts_with(&slug));
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify("!!!"), "research-topic");
        assert_eq!(slugify(""), "research-topic");
    }

    #[test]
    fn test_outcome_path_render() {
        let path = OutcomePath::expected(partition(), "run-1", "webproj", "Cache Invalidation");
        assert_eq!(
            path.render(),
            "research/2024/01/15/run-1/success/webproj_cache-invalidation.json"
        );
        assert_eq!(
            path.failed_variant().render(),
            "research/2024/01/15/run-1/failed/webproj_cache-invalidation.json"
        );
    }

    #[test]
    fn test_outcome_path_roundtrip() {
        let path = OutcomePath::expected(partition(), "abc-123", "proj", "Some Topic Here");
        let parsed: OutcomePath = path.render().parse().unwrap();
        assert_eq!(parsed, path);

        let failed: OutcomePath = path.failed_variant().render().parse().unwrap();
        assert_eq!(failed.state, OutcomeState::Failed);
    }

    #[test]
    fn test_outcome_path_rejects_foreign_keys() {
        assert!("reports/2024/01/15/x.json".parse::<OutcomePath>().is_err());
        assert!("research/2024/01/15/run/_manifest.json"
            .parse::<OutcomePath>()
            .is_err());
    }

    #[test]
    fn test_outcome_path_serde_as_string() {
        let path = OutcomePath::expected(partition(), "r", "p", "t");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, format!("\"{}\"", path.render()));
        let back: OutcomePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_manifest_and_report_keys() {
        assert_eq!(
            manifest_key(partition(), "run-9"),
            "research/2024/01/15/run-9/_manifest.json"
        );
        let ts = DateTime::parse_from_rfc3339("2024-01-15T14:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            report_key(partition(), "run-9", &ts),
            "reports/2024/01/15/comprehensive_research_report_run-9_143005.json"
        );
    }

    #[test]
    fn test_namespace_mapping_is_pure() {
        assert_eq!(OutcomeState::Success.namespace(), "success");
        assert_eq!(OutcomeState::Failed.namespace(), "failed");
    }
}
