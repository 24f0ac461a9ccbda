//! The fan-out/fan-in research pipeline
//!
//! A run flows through four stages:
//!
//! 1. [`decomposer`] breaks each project into focused sub-topics with
//!    optimized search strategies.
//! 2. [`dispatcher`] fans the sub-topics out as work items over the dispatch
//!    queue and writes the run manifest.
//! 3. [`worker`] executes one work item at a time: search, research, and a
//!    success or failure record at the item's pre-assigned path.
//! 4. [`synthesis`] polls completion through [`tracker`] and aggregates the
//!    outcome records into a comprehensive report once enough of the run has
//!    materialized.
//!
//! The stages share no state beyond the object store and the queue message
//! payloads, so each can be retried or re-run independently.

pub mod decomposer;
pub mod dispatcher;
pub mod synthesis;
pub mod tracker;
pub mod worker;

pub use decomposer::TopicDecomposer;
pub use dispatcher::Dispatcher;
pub use synthesis::{ChannelScheduler, RetryScheduler, SynthesisCoordinator, SynthesisOutcome};
pub use tracker::CompletionTracker;
pub use worker::ResearchWorker;
