//! Synthesis coordination
//!
//! The fan-in half of the pipeline. An invocation resolves its target run,
//! checks completion through the tracker, and either reschedules itself
//! (bounded by the retry budget) or aggregates every available outcome record
//! into a comprehensive report. Rescheduling is non-blocking: the request is
//! handed to a [`RetryScheduler`] with `retry_count + 1` and the invocation
//! returns immediately, so the only retry state that exists anywhere is the
//! counter inside the request payload itself.

use crate::config::SynthesisConfig;
use crate::llm::LLMClient;
use crate::research::tracker::CompletionTracker;
use crate::store::paths::{outcome_prefix, report_key, DatePartition, OutcomeState};
use crate::store::{get_json, put_json, ObjectStore};
use crate::types::{
    AppError, Completion, CompletionStatus, ReportMetadata, ReportSection, ResearchOutcome,
    Result, SynthesisCompleted, SynthesisInProgress, SynthesisReport, SynthesisRequest,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Re-emits a synthesis request after a delay.
///
/// Implementations must not block the caller; the schedule call returns as
/// soon as the retry is accepted.
#[async_trait]
pub trait RetryScheduler: Send + Sync {
    async fn schedule(&self, request: SynthesisRequest, delay: Duration) -> Result<()>;
}

/// Scheduler that delivers delayed requests over an in-process channel. The
/// server's synthesis loop consumes the receiver and re-invokes the
/// coordinator for each request.
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<SynthesisRequest>,
}

impl ChannelScheduler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SynthesisRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RetryScheduler for ChannelScheduler {
    async fn schedule(&self, request: SynthesisRequest, delay: Duration) -> Result<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(request).is_err() {
                warn!("Synthesis retry dropped: receiver closed");
            }
        });
        Ok(())
    }
}

/// What one coordinator invocation resolved to.
#[derive(Debug)]
pub enum SynthesisOutcome {
    /// The run is below the completion threshold; a retry was scheduled.
    InProgress(SynthesisInProgress),
    /// A report was generated and stored.
    Completed(SynthesisCompleted),
}

pub struct SynthesisCoordinator {
    store: Arc<dyn ObjectStore>,
    llm: Arc<dyn LLMClient>,
    scheduler: Arc<dyn RetryScheduler>,
}

impl SynthesisCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        llm: Arc<dyn LLMClient>,
        scheduler: Arc<dyn RetryScheduler>,
    ) -> Self {
        Self {
            store,
            llm,
            scheduler,
        }
    }

    /// Run one synthesis invocation against the request's target run.
    pub async fn synthesize(
        &self,
        config: &SynthesisConfig,
        request: SynthesisRequest,
    ) -> Result<SynthesisOutcome> {
        let date = request
            .synthesis_date
            .map(DatePartition::from_date)
            .unwrap_or_else(DatePartition::today);
        let tracker = CompletionTracker::new(self.store.as_ref());

        let run_id = match &request.run_id {
            Some(run_id) => run_id.clone(),
            None => tracker.most_recent_run(date).await?.ok_or_else(|| {
                AppError::NotFound(format!("No research runs found for date {date}"))
            })?,
        };

        info!(run_id = %run_id, date = %date, retry = request.retry_count, "Synthesizing research");

        let completion = tracker
            .check(date, &run_id, config.minimum_completion_rate)
            .await?;

        match completion.status {
            Completion::NotFound => {
                return Err(AppError::NotFound(format!(
                    "No manifest found for run {run_id} on {date}"
                )));
            }
            Completion::Incomplete if request.retry_count < config.max_retries => {
                let retry = SynthesisRequest {
                    synthesis_date: Some(date.date()),
                    run_id: Some(run_id),
                    retry_count: request.retry_count + 1,
                };
                let delay = Duration::from_secs(config.retry_delay_secs);
                match self.scheduler.schedule(retry.clone(), delay).await {
                    Ok(()) => {
                        info!(
                            rate = completion.completion_rate,
                            retry = retry.retry_count,
                            "Research incomplete, scheduled retry"
                        );
                        return Ok(SynthesisOutcome::InProgress(SynthesisInProgress {
                            message: format!(
                                "Research incomplete, retry {} scheduled",
                                retry.retry_count
                            ),
                            retry_count: retry.retry_count,
                            next_check_in_secs: config.retry_delay_secs,
                        }));
                    }
                    Err(e) => {
                        // Losing the retry is worse than a thin report.
                        warn!("Failed to schedule retry ({e}), proceeding with partial data");
                    }
                }
            }
            Completion::Incomplete => {
                warn!(
                    rate = completion.completion_rate,
                    "Retry budget exhausted, proceeding with partial data"
                );
            }
            Completion::Complete | Completion::Acceptable => {}
        }

        let run_id = completion.run_id.clone();
        let report = self.generate_report(config, date, completion).await?;
        let key = report_key(date, &run_id, &Utc::now());

        // An unstored report is a lost run; surface store failures.
        put_json(self.store.as_ref(), &key, &report).await?;
        info!(run_id = %run_id, report = %key, "Stored synthesis report");

        Ok(SynthesisOutcome::Completed(SynthesisCompleted {
            message: "Synthesis completed successfully".to_string(),
            run_id,
            report_location: key,
            confidence_score: report.metadata.overall_confidence_score,
            completion_status: report.metadata.completion_status,
        }))
    }

    async fn generate_report(
        &self,
        config: &SynthesisConfig,
        date: DatePartition,
        completion: CompletionStatus,
    ) -> Result<SynthesisReport> {
        let started = Instant::now();

        let outcomes = self.load_outcomes(date, &completion.run_id).await?;
        let system = build_synthesis_prompt(config, &completion);
        let query = build_synthesis_query(date, &completion, &outcomes);

        let report_text = self.llm.generate_with_system(&system, &query).await?;

        let confidence = extract_confidence_score(&report_text);
        let sections = extract_report_sections(&report_text, &config.report_sections);

        Ok(SynthesisReport {
            metadata: ReportMetadata {
                synthesis_date: Utc::now(),
                research_period: date.to_string(),
                run_id: completion.run_id.clone(),
                execution_time_seconds: (started.elapsed().as_secs_f64() * 100.0).round() / 100.0,
                total_research_files: completion.success_count,
                failed_research_files: completion.failed_count,
                synthesis_model: self.llm.model_name().to_string(),
                overall_confidence_score: confidence,
                completion_status: completion,
            },
            comprehensive_report: report_text,
            report_sections: sections,
        })
    }

    /// Read every success record for the run, skipping unreadable ones.
    async fn load_outcomes(
        &self,
        date: DatePartition,
        run_id: &str,
    ) -> Result<Vec<ResearchOutcome>> {
        let keys = self
            .store
            .list(&outcome_prefix(date, run_id, OutcomeState::Success))
            .await?;

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            match get_json::<ResearchOutcome>(self.store.as_ref(), &key).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => warn!(key = %key, "Skipping unreadable outcome record: {e}"),
            }
        }
        Ok(outcomes)
    }
}

fn build_synthesis_prompt(config: &SynthesisConfig, completion: &CompletionStatus) -> String {
    let sections = config
        .report_sections
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");

    let completion_guidance = if completion.completion_rate < 1.0 {
        format!(
            "\nIMPORTANT: Research is {:.1}% complete. Some findings may be missing.\n\
             - Adjust confidence levels accordingly\n\
             - Clearly note any gaps in coverage\n\
             - Focus on insights from available data\n\
             - Mention limitations in your analysis\n",
            completion.completion_rate * 100.0
        )
    } else {
        String::new()
    };

    format!(
        "You are a senior research analyst tasked with synthesizing multiple research findings \
         into a comprehensive report.\n\
         {completion_guidance}\n\
         Your approach:\n\
         1. Analyze each research finding provided below\n\
         2. Synthesize information across all research areas with awareness of any gaps\n\
         3. Identify patterns, connections, and insights that span multiple topics\n\
         4. Generate actionable recommendations based on the collective findings\n\n\
         Report Structure (aim for ~{max_length} words total):\n{sections}\n\n\
         Quality Standards:\n\
         - Ensure logical flow from findings to actionable recommendations\n\
         - Balance technical depth with executive accessibility\n\
         - Provide concrete next steps rather than generic advice\n\
         - Account for any research gaps in confidence assessments",
        max_length = config.max_report_length,
    )
}

fn build_synthesis_query(
    date: DatePartition,
    completion: &CompletionStatus,
    outcomes: &[ResearchOutcome],
) -> String {
    let mut digest = String::new();
    for outcome in outcomes {
        digest.push_str(&format!(
            "\n## [{project}] {topic}\nSummary: {summary}\n",
            project = outcome.metadata.project_name,
            topic = outcome.metadata.sub_topic,
            summary = outcome.structured_findings.executive_summary,
        ));
        for insight in &outcome.structured_findings.key_insights {
            digest.push_str(&format!(
                "- {insight} (source: {url})\n",
                insight = insight.insight,
                url = insight.source_url,
            ));
        }
    }

    format!(
        "Analyze research for {date} (run: {run_id}) and generate a comprehensive report.\n\n\
         COMPLETION STATUS:\n\
         - Expected files: {expected}\n\
         - Successfully completed: {success}\n\
         - Failed: {failed}\n\
         - Completion rate: {rate:.1}%\n\n\
         RESEARCH FINDINGS:\n{digest}\n\
         Focus on creating actionable insights that connect findings across different research \
         areas. If research is incomplete, clearly note what's missing and adjust confidence \
         accordingly.",
        run_id = completion.run_id,
        expected = completion.total_expected,
        success = completion.success_count,
        failed = completion.failed_count,
        rate = completion.completion_rate * 100.0,
    )
}

/// Extract an overall confidence score from the report text.
///
/// Prefers an explicit "overall/synthesis/report confidence: NN%" statement;
/// otherwise estimates from content-quality signals, capped at 0.95.
pub fn extract_confidence_score(content: &str) -> f64 {
    let lowered = content.to_lowercase();

    for label in [
        "overall confidence",
        "synthesis confidence",
        "report confidence",
    ] {
        if let Some(score) = find_percent_after(&lowered, label) {
            return score / 100.0;
        }
    }

    let quality_indicators = [
        lowered.contains("executive summary"),
        lowered.contains("recommendations"),
        lowered.contains("findings"),
        lowered.contains("implementation"),
        content.len() > 1000,
        content.matches('\n').count() > 20,
    ];

    let bonus = quality_indicators.iter().filter(|&&hit| hit).count() as f64 * 0.03;
    (0.75 + bonus).min(0.95)
}

/// Find `"<label>[:] NN[.N]%"` in already-lowercased text.
fn find_percent_after(lowered: &str, label: &str) -> Option<f64> {
    let mut search_from = 0;
    while let Some(pos) = lowered[search_from..].find(label) {
        let after = &lowered[search_from + pos + label.len()..];
        let after = after.trim_start_matches([':', ' ']);

        let digits: String = after
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if !digits.is_empty() && after[digits.len()..].starts_with('%') {
            if let Ok(value) = digits.parse::<f64>() {
                return Some(value);
            }
        }
        search_from += pos + label.len();
    }
    None
}

/// Pull the configured sections out of the report text by their markdown
/// headers, truncating each to a preview length.
pub fn extract_report_sections(content: &str, expected: &[String]) -> Vec<ReportSection> {
    const PREVIEW_LEN: usize = 500;

    let mut sections = Vec::new();
    for name in expected {
        let Some(body) = find_section_body(content, name) else {
            continue;
        };
        let body = body.trim();
        if body.is_empty() {
            continue;
        }
        let preview = if body.len() > PREVIEW_LEN {
            let mut cut = PREVIEW_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &body[..cut])
        } else {
            body.to_string()
        };
        sections.push(ReportSection {
            title: name.clone(),
            content: preview,
        });
    }
    sections
}

/// Locate a section's body: the text between its header line and the next
/// header (or end of input). Matches `## Name`, `# Name`, and `Name:` forms.
fn find_section_body<'c>(content: &'c str, name: &str) -> Option<&'c str> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let header = line.trim_end().trim_start_matches(['#', ' ']);
        let header = header.strip_suffix(':').unwrap_or(header).trim();
        if !header.eq_ignore_ascii_case(name) {
            continue;
        }

        let body_start = line_start + line.len();
        let body_end = content[body_start..]
            .find("\n#")
            .map(|i| body_start + i)
            .unwrap_or(content.len());
        return Some(&content[body_start..body_end]);
    }
    None
}
