//! Shared types, error model, and configuration for PaperScout.
//!
//! This crate is the foundation depended on by all other PaperScout crates.
//! It provides:
//! - [`PaperScoutError`], the unified error type
//! - Domain types ([`EvaluationRecord`], [`CorpusEntry`], [`RelevantEntry`], [`Document`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, LlmConfig, PipelineConfig, SearchConfig, SearchFailurePolicy,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{PaperScoutError, Result};
pub use types::{
    CorpusEntry, DEFAULT_MIN_SCORE, Document, EvaluationRecord, MAX_RELEVANCE_SCORE,
    RelevantEntry, RunSummary,
};
