//! Collaborators the pipeline delegates to.
//!
//! The pipeline never constructs these itself; callers hand them in. The
//! LLM-backed implementations live in [`crate::llm`]; [`FileEvaluator`] replays
//! evaluator output saved to disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use paperscout_shared::{PaperScoutError, Result};

use crate::extractor::EvaluationOutput;

/// Stage one: find candidate papers for a topic and evaluate each.
#[async_trait]
pub trait SearchEvaluator: Send + Sync {
    /// Evaluator outputs in evaluation order.
    ///
    /// An `Err` means the collaborator failed as a whole; individual bad
    /// candidates belong in the output and are filtered by the extractor.
    async fn evaluate(&self, topic: &str) -> Result<Vec<EvaluationOutput>>;
}

/// Stage two: turn the bounded corpus into an answer.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// `corpus` may be empty.
    async fn synthesize(&self, topic: &str, corpus: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// FileEvaluator
// ---------------------------------------------------------------------------

/// Replays evaluator outputs from a JSON file.
///
/// The file holds an array whose elements are each one evaluator output (a
/// record, an `{"items": [...]}` container, or a loose mapping). Any other
/// top-level value is treated as a single output.
#[derive(Debug, Clone)]
pub struct FileEvaluator {
    path: PathBuf,
}

impl FileEvaluator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and classify the file's outputs. Unrecognized elements are skipped.
    pub fn load(&self) -> Result<Vec<EvaluationOutput>> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| PaperScoutError::io(&self.path, e))?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            PaperScoutError::parse(format!("{}: invalid JSON: {e}", self.path.display()))
        })?;

        let elements = match value {
            Value::Array(elements) => elements,
            other => vec![other],
        };

        let mut outputs = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            match EvaluationOutput::from_json(element) {
                Ok(Some(output)) => outputs.push(output),
                Ok(None) => {}
                Err(e) => warn!(index, error = %e, "skipping unrecognized output"),
            }
        }
        Ok(outputs)
    }
}

#[async_trait]
impl SearchEvaluator for FileEvaluator {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn evaluate(&self, topic: &str) -> Result<Vec<EvaluationOutput>> {
        let outputs = self
            .load()
            .map_err(|e| PaperScoutError::Collaborator(format!("candidate file unusable: {e}")))?;
        info!(topic, outputs = outputs.len(), "loaded evaluator outputs from file");
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor;
    use uuid::Uuid;

    #[tokio::test]
    async fn replays_fixture_file() {
        let evaluator = FileEvaluator::new("../../../fixtures/candidates/transformers.json");
        let outputs = evaluator.evaluate("successors to transformers").await.unwrap();
        assert_eq!(outputs.len(), 3);

        let records = extractor::extract_all(&outputs);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2312.00752", "2305.13048", "2307.08621", "1706.03762"]);
    }

    #[tokio::test]
    async fn missing_file_is_collaborator_failure() {
        let path = std::env::temp_dir().join(format!("ps_missing_{}.json", Uuid::now_v7()));
        let err = FileEvaluator::new(path).evaluate("x").await.unwrap_err();
        assert!(matches!(err, PaperScoutError::Collaborator(_)));
    }

    #[test]
    fn non_array_file_is_one_output() {
        let path = std::env::temp_dir().join(format!("ps_single_{}.json", Uuid::now_v7()));
        std::fs::write(
            &path,
            r#"{"id": "A", "relevance_score": 7, "is_relevant": true, "summary": "a"}"#,
        )
        .unwrap();
        let outputs = FileEvaluator::new(&path).load().unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(matches!(outputs[0], EvaluationOutput::SingleRecord(_)));
    }

    #[test]
    fn unrecognized_elements_are_skipped() {
        let path = std::env::temp_dir().join(format!("ps_mixed_{}.json", Uuid::now_v7()));
        std::fs::write(
            &path,
            r#"["prose", null, {"items": []}, 42]"#,
        )
        .unwrap();
        let outputs = FileEvaluator::new(&path).load().unwrap();
        assert_eq!(outputs, vec![EvaluationOutput::RecordContainer { items: vec![] }]);
    }
}
