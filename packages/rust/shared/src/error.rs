//! Error types for PaperScout.
//!
//! Library crates use [`PaperScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PaperScout operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the search or model endpoints.
    #[error("network error: {0}")]
    Network(String),

    /// Response parsing error (Atom feed, chat completion payload).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A search, evaluation or synthesis collaborator failed as a whole.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record failed the well-formedness invariant.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Evaluator output did not have a recognizable shape.
    #[error("extraction error: {message}")]
    Extraction { message: String },

    /// A pipeline stage failed; carries the stage label and the states the
    /// run went through, ending in `failed`.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: &'static str,
        transitions: Vec<&'static str>,
        #[source]
        source: Box<PaperScoutError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperScoutError>;

impl PaperScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an extraction (unrecognized shape) error.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a stage label to an error.
    pub fn stage(stage: &'static str, source: PaperScoutError) -> Self {
        Self::StageFailed {
            stage,
            transitions: Vec::new(),
            source: Box::new(source),
        }
    }

    /// Record the state labels a failed run went through.
    pub fn with_transitions(self, labels: Vec<&'static str>) -> Self {
        match self {
            Self::StageFailed { stage, source, .. } => Self::StageFailed {
                stage,
                transitions: labels,
                source,
            },
            other => other,
        }
    }

    /// State labels of a failed run, oldest first. Empty for other errors.
    pub fn transitions(&self) -> &[&'static str] {
        match self {
            Self::StageFailed { transitions, .. } => transitions,
            _ => &[],
        }
    }

    /// The stage label, if this error came out of a pipeline stage.
    pub fn stage_label(&self) -> Option<&'static str> {
        match self {
            Self::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// True for failures of the storage layer or the filesystem.
    pub fn is_persistence(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Io { .. } => true,
            Self::StageFailed { source, .. } => source.is_persistence(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PaperScoutError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PaperScoutError::validation("relevance_score 11 out of range");
        assert!(err.to_string().contains("relevance_score 11"));
    }

    #[test]
    fn stage_label_is_visible() {
        let err = PaperScoutError::stage("init", PaperScoutError::Storage("disk full".into()));
        assert_eq!(err.to_string(), "init stage failed: storage error: disk full");
        assert_eq!(err.stage_label(), Some("init"));
        assert!(err.is_persistence());

        let err = PaperScoutError::stage("synthesize", PaperScoutError::Collaborator("503".into()));
        assert!(!err.is_persistence());
        assert!(err.transitions().is_empty());
    }

    #[test]
    fn stage_failure_carries_transitions() {
        let err = PaperScoutError::stage("init", PaperScoutError::Storage("disk full".into()))
            .with_transitions(vec!["init", "failed"]);
        assert_eq!(err.transitions(), ["init", "failed"]);
        assert_eq!(err.stage_label(), Some("init"));

        let plain = PaperScoutError::config("x").with_transitions(vec!["init"]);
        assert!(plain.transitions().is_empty());
    }
}
