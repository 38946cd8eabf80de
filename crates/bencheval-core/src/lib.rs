//! Core building blocks for running model benchmarks.
//!
//! This crate provides the interactive Docker-backed session executor, an
//! OpenRouter-compatible chat sampler, best-effort web search backends and
//! the grading loop used by the BrowseComp runner.

mod config;
mod eval;
mod executor;
mod logging;
mod sampler;
mod search;
mod security;

pub use config::{
    Config, ConfigLoader, ExecutorSection, LlmConfig, LoggingConfig, SearchConfig,
};
pub use eval::{
    analyze_log, format_grader_prompt, format_query, load_cases, parse_grade, BrowseCompRunner,
    CaseRecord, EvalCase, EvalMetrics,
};
pub use executor::{SessionExecutor, SessionExecutorConfig};
pub use logging::{append_json_line, eval_log_path, sanitize_text};
pub use sampler::{ChatMessage, OpenRouterSampler, Sampler, SamplerResponse};
pub use search::{
    backend_from_name, render_results, BingSearch, DuckDuckGo, SearchBackend, SearchItem,
};
pub use security::{require_env, SecretValue};

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for bencheval.
#[derive(Debug, Error)]
pub enum BenchevalError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session '{0}' does not exist")]
    SessionNotFound(String),
    #[error("session '{0}' already exists")]
    SessionExists(String),
    #[error("container runtime error: {0}")]
    Container(#[from] bollard::errors::Error),
    #[error("session I/O error: {0}")]
    SessionIo(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BenchevalError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}
