//! Topic decomposition
//!
//! Turns one project into a set of focused, independently-researchable
//! sub-topics, each with 2-3 optimized search queries and suggested search
//! parameters. Decomposition never fails a run: malformed or invalid LLM
//! output degrades to the configured fallback topics, and an LLM error
//! degrades to a single topic derived from the project itself.

use crate::config::DecompositionConfig;
use crate::llm::LLMClient;
use crate::types::{ProjectConfig, SubTopicPlan};
use serde_json::{Map, Value};
use tracing::{info, warn};

const DEFAULT_DECOMPOSITION_PROMPT: &str = r#"You are a senior research analyst. Your goal is to create a research plan by deconstructing a high-level topic into a set of specific, independent, and answerable questions. These questions will be sent to individual research agents.

For the given topic, generate a JSON array of sub-questions designed to cover these distinct angles:
1. **Core Purpose & Functionality**: What is this tool/concept, and what primary problem does it solve for users?
2. **Reported Issues & Limitations**: What are the most common bugs, user complaints, or inherent drawbacks?
3. **Comparative Analysis**: How does it compare to its main alternatives?
4. **Recent Activity & Security**: What are the latest updates, news, or security discussions related to it in the last 12 months?
5. **Implementation & Best Practices**: What are the current best practices, optimization techniques, or recommended approaches?

Each sub-question should include:
- A clear, focused research topic
- 2-3 optimized search queries (under 400 characters each)
- Suggested search parameters for better results

Return ONLY a JSON array with this structure:
[
  {
    "topic": "What are the primary use cases and benefits of the tool?",
    "search_queries": [
      "tool name primary use cases benefits documentation",
      "tool name user testimonials success stories"
    ],
    "search_params": {
      "time_range": "year",
      "search_depth": "advanced",
      "include_domains": ["github.com", "stackoverflow.com", "reddit.com"]
    }
  }
]"#;

/// Sub-topic minimum length; anything shorter is noise from the model.
const MIN_TOPIC_LEN: usize = 10;

/// Decomposes a project's research focus into dispatchable sub-topic plans.
pub struct TopicDecomposer<'a> {
    llm: &'a dyn LLMClient,
    config: &'a DecompositionConfig,
}

impl<'a> TopicDecomposer<'a> {
    pub fn new(llm: &'a dyn LLMClient, config: &'a DecompositionConfig) -> Self {
        Self { llm, config }
    }

    /// Produce sub-topic plans for a project. Infallible by design: every
    /// degradation path ends in a usable plan set.
    pub async fn decompose(&self, project: &ProjectConfig) -> Vec<SubTopicPlan> {
        let prompt = self.build_prompt(project);

        let raw = match self.llm.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    project = %project.name,
                    "Topic decomposition call failed ({e}), using project-derived fallback"
                );
                return vec![self.project_fallback(project)];
            }
        };

        let plans = parse_sub_topic_plans(&raw);
        if plans.is_empty() {
            warn!(
                project = %project.name,
                "Decomposition output produced no valid sub-topics, using configured fallback"
            );
            return self.configured_fallback();
        }

        info!(
            project = %project.name,
            sub_topics = plans.len(),
            "Generated sub-topics"
        );
        plans
    }

    fn build_prompt(&self, project: &ProjectConfig) -> String {
        let base = self
            .config
            .prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_DECOMPOSITION_PROMPT);

        let description = project
            .description
            .as_deref()
            .unwrap_or("No description provided");
        let research_topic = project
            .research_topic
            .as_deref()
            .unwrap_or("General Enhancement");
        let known_issues = if project.known_issues.is_empty() {
            "None".to_string()
        } else {
            project.known_issues.join(", ")
        };
        let focus_areas = if project.focus_areas.is_empty() {
            "General".to_string()
        } else {
            project.focus_areas.join(", ")
        };

        // Broad projects get at least one sub-topic per focus area.
        let mut target_count = self.config.default_sub_topic_count;
        if project.focus_areas.len() > 3 {
            target_count = target_count.max(project.focus_areas.len());
        }

        format!(
            "{base}\n\n\
             Project Details:\n\
             - Name: {name}\n\
             - Description: {description}\n\
             - Research Focus: {research_topic}\n\
             - Known Issues: {known_issues}\n\
             - Focus Areas: {focus_areas}\n\n\
             Generate {target_count} focused sub-topics with optimized search strategies.\n\n\
             Search Query Guidelines:\n\
             - Keep queries under 400 characters\n\
             - Use specific technical terms relevant to the project\n\
             - Include timeframes when looking for current trends\n\
             - Suggest domain filtering for authoritative sources\n\
             - Consider \"advanced\" search depth for technical topics",
            name = project.name,
        )
    }

    /// Deterministic plans from the configured fallback topic list.
    fn configured_fallback(&self) -> Vec<SubTopicPlan> {
        self.config
            .fallback_topics
            .iter()
            .map(|topic| {
                let mut params = Map::new();
                params.insert(
                    "search_depth".to_string(),
                    Value::String(self.config.default_search_depth.clone()),
                );
                params.insert("time_range".to_string(), Value::String("year".to_string()));
                SubTopicPlan {
                    topic: topic.clone(),
                    search_queries: vec![
                        format!("{topic} best practices"),
                        format!("{topic} recent developments"),
                    ],
                    search_params: params,
                }
            })
            .collect()
    }

    /// Single plan built from the project itself, for when the LLM call
    /// errors outright.
    fn project_fallback(&self, project: &ProjectConfig) -> SubTopicPlan {
        let research_topic = project
            .research_topic
            .as_deref()
            .unwrap_or("General Enhancement");
        let mut params = Map::new();
        params.insert(
            "search_depth".to_string(),
            Value::String("basic".to_string()),
        );
        SubTopicPlan {
            topic: format!("Technical analysis: {research_topic}"),
            search_queries: vec![
                format!("{} optimization techniques", project.name),
                format!("{research_topic} best practices"),
            ],
            search_params: params,
        }
    }
}

/// Parse the model's JSON array output, tolerating markdown code fences and
/// dropping entries that fail validation.
fn parse_sub_topic_plans(raw: &str) -> Vec<SubTopicPlan> {
    let cleaned = strip_code_fences(raw);

    let items: Vec<Value> = match serde_json::from_str(cleaned) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!("Decomposition output is valid JSON but not an array");
            return Vec::new();
        }
        Err(e) => {
            warn!("Decomposition output is not valid JSON: {e}");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<SubTopicPlan>(item) {
            Ok(plan) if plan.topic.trim().len() > MIN_TOPIC_LEN && !plan.search_queries.is_empty() => {
                Some(plan)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Dropping malformed sub-topic entry: {e}");
                None
            }
        })
        .collect()
}

/// Strip a surrounding ```json / ``` fence if the model added one.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppError, Result};
    use async_trait::async_trait;

    struct ScriptedLLM {
        response: Result<String>,
    }

    impl ScriptedLLM {
        fn ok(body: &str) -> Self {
            Self {
                response: Ok(body.to_string()),
            }
        }

        fn err(msg: &str) -> Self {
            Self {
                response: Err(AppError::LLM(msg.to_string())),
            }
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(AppError::LLM(e.to_string())),
            }
        }

        async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
            self.generate(prompt).await
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn project() -> ProjectConfig {
        ProjectConfig {
            name: "webapp".to_string(),
            description: Some("A web application".to_string()),
            research_topic: Some("Performance tuning".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_parses_fenced_json_and_filters_invalid_entries() {
        let llm = ScriptedLLM::ok(
            r#"```json
[
  {"topic": "What caching strategies fit this workload?",
   "search_queries": ["web caching strategies comparison"],
   "search_params": {"search_depth": "advanced"}},
  {"topic": "short", "search_queries": ["x"]},
  {"topic": "A long enough topic without queries", "search_queries": []}
]
```"#,
        );
        let config = DecompositionConfig::default();
        let decomposer = TopicDecomposer::new(&llm, &config);

        let plans = decomposer.decompose(&project()).await;
        assert_eq!(plans.len(), 1);
        assert!(plans[0].topic.contains("caching"));
        assert_eq!(
            plans[0].search_params.get("search_depth"),
            Some(&Value::String("advanced".to_string()))
        );
    }

    #[tokio::test]
    async fn test_invalid_output_uses_configured_fallback() {
        let llm = ScriptedLLM::ok("I could not produce JSON, sorry.");
        let config = DecompositionConfig::default();
        let decomposer = TopicDecomposer::new(&llm, &config);

        let plans = decomposer.decompose(&project()).await;
        assert_eq!(plans.len(), config.fallback_topics.len());
        assert_eq!(plans[0].topic, config.fallback_topics[0]);
        assert_eq!(plans[0].search_queries.len(), 2);
    }

    #[tokio::test]
    async fn test_llm_error_uses_project_fallback() {
        let llm = ScriptedLLM::err("connection refused");
        let config = DecompositionConfig::default();
        let decomposer = TopicDecomposer::new(&llm, &config);

        let plans = decomposer.decompose(&project()).await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].topic, "Technical analysis: Performance tuning");
        assert!(plans[0].search_queries[0].contains("webapp"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("[1]"), "[1]");
    }
}
