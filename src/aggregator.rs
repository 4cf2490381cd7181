//! Accumulates per-(checkpoint, label, dataset) score results and renders
//! them as a terminal table or a persisted JSON report.

use crate::ppi::ScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tabled::{Table, Tabled};
use thiserror::Error;

/// Errors that can occur while persisting or loading reports.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Identifies one run of the pipeline. Created by the orchestration loop;
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTask {
    /// Classifier checkpoint, absent for judge-backed tasks
    pub checkpoint_id: Option<String>,
    /// RAG dimension under test
    pub label_column: String,
    /// Source test set
    pub dataset_id: String,
}

impl std::fmt::Display for EvaluationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scorer = self.checkpoint_id.as_deref().unwrap_or("llm-judge");
        write!(f, "{scorer}/{}/{}", self.label_column, self.dataset_id)
    }
}

/// One accumulated result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub task: EvaluationTask,
    pub result: ScoreResult,
}

/// Report metadata, stamped at serialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub framework_version: String,
}

/// A persisted scoring report: metadata plus every accumulated entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringReport {
    pub metadata: ReportMetadata,
    pub entries: Vec<AggregateEntry>,
}

/// Append-only accumulation of score results, one entry per task in the
/// order the orchestration loop visited them.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    entries: Vec<AggregateEntry>,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Scorer")]
    scorer: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Dataset")]
    dataset: String,
    #[tabled(rename = "Estimate")]
    estimate: String,
    #[tabled(rename = "95% CI")]
    interval: String,
    #[tabled(rename = "Cal. n")]
    calibration: usize,
    #[tabled(rename = "Eval. N")]
    evaluation: usize,
    #[tabled(rename = "Cal. acc")]
    accuracy: String,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for one task. Pure accumulation.
    pub fn append(&mut self, task: EvaluationTask, result: ScoreResult) {
        self.entries.push(AggregateEntry { task, result });
    }

    #[must_use]
    pub fn entries(&self) -> &[AggregateEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the accumulated results as a terminal table.
    #[must_use]
    pub fn to_table(&self) -> String {
        let rows: Vec<SummaryRow> = self
            .entries
            .iter()
            .map(|entry| SummaryRow {
                scorer: entry
                    .task
                    .checkpoint_id
                    .clone()
                    .unwrap_or_else(|| "llm-judge".to_string()),
                label: entry.task.label_column.clone(),
                dataset: entry.task.dataset_id.clone(),
                estimate: format!("{:.4}", entry.result.point_estimate),
                interval: format!(
                    "[{:.4}, {:.4}]",
                    entry.result.confidence_interval.0, entry.result.confidence_interval.1
                ),
                calibration: entry.result.calibration_size,
                evaluation: entry.result.evaluation_size,
                accuracy: format!("{:.4}", entry.result.calibration_accuracy),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Snapshot the accumulated entries as a timestamped report.
    #[must_use]
    pub fn to_report(&self) -> ScoringReport {
        ScoringReport {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            entries: self.entries.clone(),
        }
    }

    /// Persist the accumulated results as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError` if the file cannot be written.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(&self.to_report())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl ScoringReport {
    /// Load a persisted report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError` if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        let report: Self = serde_json::from_str(&content)?;
        Ok(report)
    }

    /// Render the report entries as a terminal table.
    #[must_use]
    pub fn to_table(&self) -> String {
        let mut aggregator = ResultAggregator::new();
        for entry in &self.entries {
            aggregator.append(entry.task.clone(), entry.result.clone());
        }
        aggregator.to_table()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn task(checkpoint: Option<&str>, label: &str, dataset: &str) -> EvaluationTask {
        EvaluationTask {
            checkpoint_id: checkpoint.map(str::to_string),
            label_column: label.to_string(),
            dataset_id: dataset.to_string(),
        }
    }

    fn result(estimate: f64) -> ScoreResult {
        ScoreResult {
            point_estimate: estimate,
            confidence_interval: (estimate - 0.05, estimate + 0.05),
            trial_count: 100,
            calibration_size: 10,
            evaluation_size: 90,
            calibration_accuracy: 0.9,
        }
    }

    #[test]
    fn test_append_preserves_visit_order() {
        let mut aggregator = ResultAggregator::new();
        assert!(aggregator.is_empty());

        aggregator.append(task(Some("ckpt_a"), "context_relevance", "ds1"), result(0.8));
        aggregator.append(task(Some("ckpt_a"), "context_relevance", "ds2"), result(0.7));

        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.entries()[0].task.dataset_id, "ds1");
        assert_eq!(aggregator.entries()[1].task.dataset_id, "ds2");
        assert!(aggregator
            .entries()
            .iter()
            .all(|e| e.task.checkpoint_id.as_deref() == Some("ckpt_a")));
    }

    #[test]
    fn test_table_contains_key_figures() {
        let mut aggregator = ResultAggregator::new();
        aggregator.append(task(None, "answer_relevance", "ds1"), result(0.75));
        let table = aggregator.to_table();
        assert!(table.contains("llm-judge"));
        assert!(table.contains("answer_relevance"));
        assert!(table.contains("0.7500"));
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        let mut aggregator = ResultAggregator::new();
        aggregator.append(task(Some("ckpt_a"), "context_relevance", "ds1"), result(0.8));
        aggregator.write_json(&path).unwrap();

        let report = ScoringReport::load(&path).unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].task.label_column, "context_relevance");
        assert!((report.entries[0].result.point_estimate - 0.8).abs() < f64::EPSILON);
        assert!(!report.to_table().is_empty());
    }

    #[test]
    fn test_task_display() {
        let t = task(None, "context_relevance", "ds1");
        assert_eq!(t.to_string(), "llm-judge/context_relevance/ds1");
        let t = task(Some("ckpt_a"), "context_relevance", "ds1");
        assert!(t.to_string().starts_with("ckpt_a/"));
    }
}
