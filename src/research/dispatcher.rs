//! Run dispatch
//!
//! Fans a run out: decomposes every selected project, enqueues one work item
//! per sub-topic, and finally writes the run manifest recording what was
//! expected. The manifest is written last so its expected-file list is the
//! authoritative ground truth for completion tracking; a failure on one
//! project never blocks the others.

use crate::config::AtlasConfig;
use crate::llm::LLMClient;
use crate::queue::DispatchQueue;
use crate::research::decomposer::TopicDecomposer;
use crate::store::paths::{manifest_key, DatePartition, OutcomePath};
use crate::store::{put_json, ObjectStore};
use crate::types::{
    AppError, DispatchRequest, DispatchSummary, Manifest, ProjectConfig, ResearchPrompts, Result,
    WorkItem,
};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

pub struct Dispatcher<'a> {
    store: &'a dyn ObjectStore,
    queue: &'a dyn DispatchQueue,
    llm: &'a dyn LLMClient,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        queue: &'a dyn DispatchQueue,
        llm: &'a dyn LLMClient,
    ) -> Self {
        Self { store, queue, llm }
    }

    /// Start a new research run and return its dispatch summary.
    pub async fn dispatch(
        &self,
        config: &AtlasConfig,
        request: &DispatchRequest,
    ) -> Result<DispatchSummary> {
        let run_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let date = DatePartition::from_timestamp(&timestamp);

        info!(run_id = %run_id, "Starting research coordination run");

        let projects = select_projects(config, request)?;

        let decomposer = TopicDecomposer::new(self.llm, &config.decomposition);
        let prompts = ResearchPrompts {
            worker_prompt_template: config.research_prompts.worker_prompt_template.clone(),
        };

        let mut expected_files: Vec<OutcomePath> = Vec::new();
        let mut total_sub_topics = 0usize;

        for project in &projects {
            info!(project = %project.name, "Decomposing research topics");
            let plans = decomposer.decompose(project).await;

            // One project's enqueue failure must not block the rest of the
            // run; the manifest only records what actually went out.
            let mut queued = 0usize;
            let mut failed: Option<AppError> = None;
            for plan in plans {
                let expected_path =
                    OutcomePath::expected(date, &run_id, &project.name, &plan.topic);
                let item = WorkItem {
                    run_id: run_id.clone(),
                    timestamp,
                    project_name: project.name.clone(),
                    sub_topic: plan.topic,
                    search_queries: plan.search_queries,
                    search_params: plan.search_params,
                    expected_path: expected_path.clone(),
                    project: (*project).clone(),
                    prompts: prompts.clone(),
                    config_version: config.version.clone(),
                };

                if let Err(e) = self.queue.enqueue(item).await {
                    failed = Some(e);
                    break;
                }
                expected_files.push(expected_path);
                queued += 1;
            }

            match failed {
                Some(e) => error!(project = %project.name, "Error queueing sub-topics: {e}"),
                None => info!(project = %project.name, queued, "Queued sub-topics"),
            }
            total_sub_topics += queued;
        }

        let manifest = Manifest {
            total_sub_topics,
            project_count: projects.len(),
            run_id: run_id.clone(),
            timestamp,
            expected_files,
        };
        let key = manifest_key(date, &run_id);
        put_json(self.store, &key, &manifest).await?;
        info!(run_id = %run_id, manifest = %key, "Created run manifest");

        Ok(DispatchSummary {
            message: "Research coordination completed".to_string(),
            run_id,
            timestamp,
            sub_topics_queued: total_sub_topics,
            total_projects: projects.len(),
        })
    }
}

/// Resolve the project set for a run, honoring the request's name filter.
///
/// Rejects names that cannot form a valid outcome path: an empty name, or one
/// containing `/`, would render a path the workers cannot parse back, leaving
/// the manifest waiting on a record that can never be written.
pub(crate) fn select_projects<'c>(
    config: &'c AtlasConfig,
    request: &DispatchRequest,
) -> Result<Vec<&'c ProjectConfig>> {
    let selected: Vec<&ProjectConfig> = match &request.projects {
        Some(names) => {
            let mut selected = Vec::with_capacity(names.len());
            for name in names {
                let project = config.project(name).ok_or_else(|| {
                    AppError::InvalidInput(format!("Unknown project: {name}"))
                })?;
                selected.push(project);
            }
            selected
        }
        None => config.projects.iter().collect(),
    };

    if selected.is_empty() {
        return Err(AppError::InvalidInput(
            "No projects configured for research".to_string(),
        ));
    }
    for project in &selected {
        if project.name.is_empty() || project.name.contains('/') {
            return Err(AppError::InvalidInput(format!(
                "Invalid project name '{}': must be non-empty and must not contain '/'",
                project.name
            )));
        }
    }
    Ok(selected)
}
