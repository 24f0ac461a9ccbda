//! HTTP API Handlers and Routes
//!
//! The REST layer over the pipeline, built on the Axum web framework.
//!
//! # API Endpoints
//!
//! ## Research (`/api/research`)
//! - `POST /api/research/dispatch` - Start a research run (fan-out)
//! - `POST /api/research/synthesize` - Synthesize a run into a report (fan-in)
//! - `GET /api/research/runs/{run_id}` - Completion status of a run
//!
//! ## Operations
//! - `POST /api/catalog/refresh` - Reload the model metadata catalog
//! - `POST /api/catalog/update` - Fetch and store a fresh catalog document
//! - `POST /api/config/reload` - Reload the TOML configuration from disk
//!
//! ## Health (`/api/health`)
//! - `GET /api/health` - Health check endpoint
//!
//! All endpoints are unauthenticated; the server is expected to sit behind
//! trusted infrastructure.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

pub use routes::create_router;
