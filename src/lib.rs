//! # A.T.L.A.S - Agentic Topic-Level Aggregation & Synthesis
//!
//! A fan-out/fan-in research pipeline: projects are decomposed into focused
//! sub-topics, researched in parallel by workers, tracked to completion
//! through a run manifest, and synthesized into a comprehensive report once
//! enough of the run has materialized.
//!
//! ## Overview
//!
//! A.T.L.A.S can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `atlas-server` binary
//! 2. **As a library** - Import the pipeline components into your own project
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use atlas::{Provider, LLMClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::Ollama {
//!         base_url: "http://localhost:11434".to_string(),
//!         model: "llama3.2:3b".to_string(),
//!     };
//!
//!     let client = provider.create_client().await?;
//!     let response = client.generate("Hello, world!").await?;
//!     println!("{}", response);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The pipeline stages share nothing but the object store and the queue
//! payloads:
//!
//! - **Dispatch** (`POST /api/research/dispatch`): decompose projects,
//!   enqueue work items, write the run manifest.
//! - **Workers**: consume work items, search, research, and write exactly one
//!   success or failure record at the item's pre-assigned path.
//! - **Synthesis** (`POST /api/research/synthesize`): poll the manifest until
//!   the run is complete enough, then aggregate the outcome records into a
//!   stored report. Polling is bounded by a retry budget carried in the
//!   request payload itself.

/// HTTP API handlers and routes.
pub mod api;
/// TOML configuration and the shared config manager.
pub mod config;
/// LLM provider clients and abstractions.
pub mod llm;
/// Model metadata catalog (context windows, pricing) with tiered fallback.
pub mod metadata;
/// Dispatch queue abstraction for fan-out.
pub mod queue;
/// The research pipeline: decomposer, dispatcher, worker, tracker, synthesis.
pub mod research;
/// Web search providers.
pub mod search;
/// Object store abstraction and the typed outcome-path grammar.
pub mod store;
/// Core types (work items, manifests, outcomes, errors).
pub mod types;

// Re-export commonly used types
pub use config::{AtlasConfig, AtlasConfigManager};
pub use llm::{LLMClient, Provider};
pub use metadata::{CatalogSource, CatalogUpdater, ModelCatalog};
pub use queue::{DispatchQueue, InMemoryQueue, QueueReceiver};
pub use research::{
    ChannelScheduler, CompletionTracker, Dispatcher, ResearchWorker, RetryScheduler,
    SynthesisCoordinator, SynthesisOutcome, TopicDecomposer,
};
pub use search::{HttpSearchProvider, SearchProvider};
pub use store::{FsStore, MemoryStore, ObjectStore};
pub use types::{AppError, Result};

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML-based configuration with lockless reads.
    pub config_manager: Arc<AtlasConfigManager>,
    /// Durable store for manifests, outcome records, and reports.
    pub store: Arc<dyn ObjectStore>,
    /// Producer side of the work-item queue.
    pub queue: Arc<dyn DispatchQueue>,
    /// Scheduler the synthesis coordinator hands retries to.
    pub scheduler: Arc<dyn RetryScheduler>,
    /// Model metadata catalog.
    pub catalog: Arc<ModelCatalog>,
}

/// Build the full application router over an [`AppState`].
pub fn create_app(state: AppState) -> axum::Router {
    use tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .nest("/api", api::create_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
