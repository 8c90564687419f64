//! Two-stage research pipeline: topic → evaluate & persist → synthesize.
//!
//! ```text
//! Init ──▶ SearchAndExtract ──▶ Synthesize ──▶ Done
//!   │             │                  │
//!   └─────────────┴──────────────────┴──▶ Failed
//! ```
//!
//! Stage two only starts after stage one has fully returned, and reads the
//! corpus through the same store handle stage one wrote to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use paperscout_artifacts::ReportWriter;
use paperscout_shared::{
    CorpusEntry, EvaluationRecord, PaperScoutError, PipelineConfig, Result, RunSummary,
    SearchFailurePolicy,
};
use paperscout_storage::CorpusStore;

use crate::collaborators::{SearchEvaluator, Synthesizer};
use crate::corpus::BoundedCorpusReader;
use crate::extractor;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    SearchAndExtract,
    Synthesize,
    Done,
    Failed,
}

impl PipelineState {
    /// Label used in logs and on stage errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::SearchAndExtract => "search_and_extract",
            Self::Synthesize => "synthesize",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        match (self, next) {
            (Self::Init, Self::SearchAndExtract)
            | (Self::SearchAndExtract, Self::Synthesize)
            | (Self::Synthesize, Self::Done) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called on entering each state, `Init` included.
    fn state(&self, state: PipelineState);
    /// Called after each record is committed to the corpus.
    fn record_stored(&self, id: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, outcome: &PipelineOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn state(&self, _state: PipelineState) {}
    fn record_stored(&self, _id: &str, _current: usize, _total: usize) {}
    fn done(&self, _outcome: &PipelineOutcome) {}
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Counts from the persistence step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Well-formed records handed to persistence.
    pub extracted: usize,
    /// Records written to the corpus.
    pub stored: usize,
    /// Records skipped because `is_relevant` was false.
    pub skipped_irrelevant: usize,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The synthesizer's answer.
    pub answer: String,
    pub stats: PersistStats,
    /// Stage-one collaborator failure tolerated under `Continue`.
    pub search_error: Option<String>,
    /// Characters of corpus text handed to the synthesizer.
    pub corpus_chars: usize,
    /// Every state entered, in order, starting with `Init`.
    pub transitions: Vec<PipelineState>,
    /// `run.json`, if it could be written.
    pub summary_path: Option<PathBuf>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Tracks and announces transitions for one run.
struct StateMachine<'a> {
    current: PipelineState,
    history: Vec<PipelineState>,
    progress: &'a dyn ProgressReporter,
}

impl<'a> StateMachine<'a> {
    fn start(progress: &'a dyn ProgressReporter) -> Self {
        progress.state(PipelineState::Init);
        Self {
            current: PipelineState::Init,
            history: vec![PipelineState::Init],
            progress,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.current.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.current
        );
        info!(from = %self.current, to = %next, "stage transition");
        self.current = next;
        self.history.push(next);
        self.progress.state(next);
    }

    /// Move to `Failed`, labelling `err` with the stage it came from.
    fn fail(&mut self, err: PaperScoutError) -> PaperScoutError {
        let stage = self.current.label();
        error!(stage, error = %err, "pipeline failed");
        self.advance(PipelineState::Failed);
        let labels = self.history.iter().map(PipelineState::label).collect();
        PaperScoutError::stage(stage, err).with_transitions(labels)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The research pipeline with its collaborators.
pub struct ResearchPipeline {
    config: PipelineConfig,
    evaluator: Arc<dyn SearchEvaluator>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl ResearchPipeline {
    pub fn new(
        config: PipelineConfig,
        evaluator: Arc<dyn SearchEvaluator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config,
            evaluator,
            synthesizer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run both stages for `topic`.
    ///
    /// Errors are [`PaperScoutError::StageFailed`] carrying the label of the
    /// stage that failed. Whatever stage one committed before a failure stays
    /// in the store.
    #[instrument(skip_all, fields(topic = %topic, run_id = %Uuid::now_v7()))]
    pub async fn run(
        &self,
        topic: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let started_at = Utc::now();
        let mut machine = StateMachine::start(progress);

        info!(
            output_dir = %self.config.output_dir.display(),
            min_score = self.config.min_score,
            budget = self.config.char_budget,
            "starting research pipeline"
        );

        // --- Init ---
        let (store, writer) = match self.init().await {
            Ok(handles) => handles,
            Err(e) => return Err(machine.fail(e)),
        };

        // --- Stage one: search, evaluate, extract, persist ---
        machine.advance(PipelineState::SearchAndExtract);
        let mut stats = PersistStats::default();
        let mut search_error = None;

        match self.evaluator.evaluate(topic).await {
            Ok(outputs) => {
                let records = extractor::extract_all(&outputs);
                stats = match persist_records(&store, writer.as_ref(), &records, progress).await {
                    Ok(stats) => stats,
                    Err(e) => return Err(machine.fail(e)),
                };
            }
            Err(e) => {
                let e = as_collaborator(e);
                match self.config.on_search_failure {
                    SearchFailurePolicy::Continue => {
                        warn!(error = %e, "search/evaluation failed, synthesizing from existing corpus");
                        search_error = Some(e.to_string());
                    }
                    SearchFailurePolicy::Abort => return Err(machine.fail(e)),
                }
            }
        }

        // --- Stage two: bounded read, synthesize ---
        machine.advance(PipelineState::Synthesize);
        let reader = BoundedCorpusReader::from(&self.config);
        let corpus = match reader.read(&store).await {
            Ok(text) => text,
            Err(e) => return Err(machine.fail(e)),
        };
        let corpus_chars = corpus.chars().count();

        let answer = match self.synthesizer.synthesize(topic, &corpus).await {
            Ok(answer) => answer,
            Err(e) => return Err(machine.fail(as_collaborator(e))),
        };

        machine.advance(PipelineState::Done);

        let summary = RunSummary {
            topic: topic.to_string(),
            extracted: stats.extracted,
            stored: stats.stored,
            skipped_irrelevant: stats.skipped_irrelevant,
            min_score: self.config.min_score,
            corpus_chars,
            search_error: search_error.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        let summary_path =
            match paperscout_artifacts::write_run_summary(&self.config.output_dir, &summary) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "failed to write run summary");
                    None
                }
            };

        let outcome = PipelineOutcome {
            answer,
            stats,
            search_error,
            corpus_chars,
            transitions: machine.history,
            summary_path,
            elapsed: start.elapsed(),
        };

        progress.done(&outcome);

        info!(
            stored = outcome.stats.stored,
            skipped = outcome.stats.skipped_irrelevant,
            corpus_chars,
            elapsed_ms = outcome.elapsed.as_millis(),
            "research pipeline complete"
        );

        Ok(outcome)
    }

    /// Create the output directories and open the store.
    async fn init(&self) -> Result<(CorpusStore, Option<ReportWriter>)> {
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir).map_err(|e| PaperScoutError::io(output_dir, e))?;

        let writer = if self.config.write_reports {
            let writer = ReportWriter::new(output_dir);
            std::fs::create_dir_all(writer.reports_dir())
                .map_err(|e| PaperScoutError::io(writer.reports_dir(), e))?;
            Some(writer)
        } else {
            None
        };

        let store = CorpusStore::initialize(&self.config.store_path()).await?;
        Ok((store, writer))
    }
}

fn as_collaborator(err: PaperScoutError) -> PaperScoutError {
    match err {
        PaperScoutError::Collaborator(_) => err,
        other => PaperScoutError::Collaborator(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Commit relevant records: report first (when a writer is given), then upsert.
///
/// Records with `is_relevant = false` are counted and skipped. Stops at the
/// first I/O or storage failure; entries committed before it stay committed.
/// A report whose upsert then fails is left on disk.
pub async fn persist_records(
    store: &CorpusStore,
    writer: Option<&ReportWriter>,
    records: &[EvaluationRecord],
    progress: &dyn ProgressReporter,
) -> Result<PersistStats> {
    let mut stats = PersistStats {
        extracted: records.len(),
        ..PersistStats::default()
    };
    let relevant_total = records.iter().filter(|r| r.is_relevant).count();

    for record in records {
        if !record.is_relevant {
            debug!(id = %record.id, score = record.relevance_score, "skipping non-relevant paper");
            stats.skipped_irrelevant += 1;
            continue;
        }

        let artifact_path = match writer {
            Some(writer) => {
                let meta = writer.write(record)?;
                debug!(
                    id = %record.id,
                    path = %meta.path.display(),
                    sha256 = %meta.sha256,
                    size = meta.size_bytes,
                    "report written"
                );
                meta.path.display().to_string()
            }
            None => String::new(),
        };

        if let Err(e) = store
            .upsert(&CorpusEntry::new(record.clone(), artifact_path.clone()))
            .await
        {
            if !artifact_path.is_empty() {
                warn!(id = %record.id, path = %artifact_path, "report written but corpus write failed");
            }
            return Err(e);
        }

        stats.stored += 1;
        progress.record_stored(&record.id, stats.stored, relevant_total);
    }

    info!(
        extracted = stats.extracted,
        stored = stats.stored,
        skipped = stats.skipped_irrelevant,
        "records persisted"
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
