//! Core pipeline orchestration and domain logic for PaperScout.
//!
//! This crate ties together evaluation, extraction, persistence and synthesis
//! into the two-stage research workflow ([`pipeline::ResearchPipeline`]).

pub mod collaborators;
pub mod corpus;
pub mod extractor;
pub mod llm;
pub mod pipeline;

pub use collaborators::{FileEvaluator, SearchEvaluator, Synthesizer};
pub use corpus::{BoundedCorpusReader, TRUNCATION_MARKER};
pub use extractor::{Candidate, EvaluationOutput};
pub use pipeline::{
    PersistStats, PipelineOutcome, PipelineState, ProgressReporter, ResearchPipeline,
    SilentProgress,
};
