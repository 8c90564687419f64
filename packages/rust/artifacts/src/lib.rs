//! On-disk artifacts produced by a research run.
//!
//! - One Markdown report per relevant paper under `<output_dir>/papers/`
//! - `run.json`, a summary of the last successful run
//!
//! Reports are written before the corpus row that points at them. A report
//! whose corpus write later fails is left on disk; the next run rewrites it.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use paperscout_shared::{EvaluationRecord, PaperScoutError, Result, RunSummary};

/// Subdirectory of the output dir holding per-paper reports.
pub const REPORTS_DIR: &str = "papers";

/// File extension for rendered reports.
pub const REPORT_EXTENSION: &str = "md";

/// File name of the run summary.
pub const RUN_SUMMARY_FILE: &str = "run.json";

/// Metadata for a written report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportMeta {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Map a paper id to a file stem that is safe on every platform we target.
///
/// `/` and `:` become `_`; everything else is kept.
pub fn sanitize_id(id: &str) -> String {
    id.replace(['/', ':'], "_")
}

/// Render the report body for a record.
pub fn render_report(record: &EvaluationRecord) -> String {
    format!(
        "# {}\n\nRelevance: {}\n\n{}",
        record.id, record.relevance_score, record.summary
    )
}

/// Writes per-paper reports below an output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    reports_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            reports_dir: output_dir.join(REPORTS_DIR),
        }
    }

    /// Directory the reports land in.
    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Where the report for `id` is (or would be) written.
    pub fn report_path(&self, id: &str) -> PathBuf {
        self.reports_dir
            .join(format!("{}.{REPORT_EXTENSION}", sanitize_id(id)))
    }

    /// Render and write the report for `record`, replacing any previous one.
    ///
    /// Creates the reports directory (and parents) first. The file is written
    /// to a temp name and renamed into place.
    #[instrument(skip_all, fields(id = %record.id))]
    pub fn write(&self, record: &EvaluationRecord) -> Result<ReportMeta> {
        std::fs::create_dir_all(&self.reports_dir)
            .map_err(|e| PaperScoutError::io(&self.reports_dir, e))?;

        let target = self.report_path(&record.id);
        let content = render_report(record);
        write_atomic(&target, content.as_bytes())?;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let sha256 = format!("{:x}", hasher.finalize());

        debug!(path = %target.display(), size = content.len(), "wrote report");

        Ok(ReportMeta {
            path: target,
            sha256,
            size_bytes: content.len(),
        })
    }
}

/// Write `run.json` (pretty-printed) into `output_dir`.
pub fn write_run_summary(output_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).map_err(|e| PaperScoutError::io(output_dir, e))?;

    let json = serde_json::to_string_pretty(summary).map_err(|e| {
        PaperScoutError::validation(format!("JSON serialization failed: {e}"))
    })?;
    let path = output_dir.join(RUN_SUMMARY_FILE);
    write_atomic(&path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote run summary");
    Ok(path)
}

/// Write to a sibling temp file, then rename over `target`.
fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| PaperScoutError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| PaperScoutError::io(target, e))?;
    Ok(())
}
