//! LLM Provider Clients and Abstractions
//!
//! A unified interface over the language-model providers the pipeline
//! delegates to: topic decomposition, per-sub-topic research, and report
//! synthesis all go through [`LLMClient`]. Providers are selected at runtime
//! via the [`Provider`] enum and enabled with Cargo features:
//!
//! - `ollama` - local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints

/// Core LLM client trait and the provider factory.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{LLMClient, Provider};
