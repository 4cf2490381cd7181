//! Partitions evaluated examples into a trusted calibration subset and the
//! unlabeled evaluation subset.
//!
//! Human gold labels win when a gold table is configured. Otherwise a
//! machine-labeling judge synthesizes calibration labels for a seeded sample
//! of examples, under the same retry and truncation rules as ordinary judge
//! evaluation, and the synthesized table is persisted for reuse.

use crate::config::PostProcessSettings;
use crate::dataset::{read_gold_labels, write_gold_labels, DataError, TestSet, Verdict};
use crate::evaluator::PredictionRecord;
use crate::judge::JudgeScorer;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use thiserror::Error;

/// Default system prompt for the machine-labeling judge. Injected at
/// construction so callers can override it for testing.
pub const MACHINE_LABEL_SYSTEM_PROMPT: &str = "Given the following question and document, you must analyze the provided document and determine whether it is sufficient for answering the question. In your evaluation, you should consider the content of the document and whether it contains the answer to the provided question. Output your final verdict by strictly following this format: '[[Yes]]' if the document is sufficient and '[[No]]' if the document provided is not sufficient.";

/// Errors that abort gold reconciliation for one task.
#[derive(Error, Debug)]
pub enum GoldError {
    #[error("Neither gold source produced a calibration label; PPI correction requires at least one")]
    EmptyCalibration,

    #[error("Machine gold labels requested but no machine-labeling judge is configured")]
    MissingMachineJudge,

    #[error(transparent)]
    Data(#[from] DataError),
}

/// One prediction paired with its trusted gold label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledPrediction {
    pub example_id: String,
    pub predicted: Verdict,
    pub reference: Verdict,
}

/// The trusted subset used to estimate the scorer's error profile.
#[derive(Debug, Clone, Default)]
pub struct CalibrationSet {
    pub records: Vec<LabeledPrediction>,
}

impl CalibrationSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Agreement rate between predictions and gold labels.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let agree = self
            .records
            .iter()
            .filter(|r| r.predicted == r.reference)
            .count();
        agree as f64 / self.records.len() as f64
    }
}

/// The untrusted subset whose population accuracy is being estimated.
#[derive(Debug, Clone, Default)]
pub struct EvaluationSet {
    /// (example id, prediction) pairs without a trusted label
    pub predictions: Vec<(String, Verdict)>,
}

impl EvaluationSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Splits predictions into calibration and evaluation subsets.
#[derive(Debug, Clone)]
pub struct GoldReconciler {
    settings: PostProcessSettings,
}

impl GoldReconciler {
    #[must_use]
    pub const fn new(settings: PostProcessSettings) -> Self {
        Self { settings }
    }

    /// Partition `predictions` for one task.
    ///
    /// Records whose id appears in the human gold table form the calibration
    /// set; everything else lands in the evaluation set. Without a human
    /// table, machine gold labels are read from the configured path or
    /// synthesized by `machine_judge` and persisted there. Failed predictions
    /// are excluded from both subsets.
    ///
    /// # Errors
    ///
    /// Returns `GoldError::EmptyCalibration` when no gold source yields a
    /// single calibrated label, and `GoldError::MissingMachineJudge` when
    /// synthesis is required but no judge was supplied.
    pub fn reconcile(
        &self,
        test_set: &TestSet,
        predictions: &[PredictionRecord],
        machine_judge: Option<&JudgeScorer>,
    ) -> Result<(CalibrationSet, EvaluationSet), GoldError> {
        let usable: Vec<&PredictionRecord> =
            predictions.iter().filter(|r| r.succeeded()).collect();
        let dropped = predictions.len() - usable.len();
        if dropped > 0 {
            tracing::warn!(dropped, "excluding failed predictions from scoring");
        }

        let gold = self.resolve_gold_labels(test_set, &usable, machine_judge)?;

        let mut calibration = CalibrationSet::default();
        let mut evaluation = EvaluationSet::default();
        for record in usable {
            // `succeeded()` filtered out missing predictions above.
            let Some(predicted) = record.predicted else {
                continue;
            };
            if let Some(&reference) = gold.get(&record.example_id) {
                calibration.records.push(LabeledPrediction {
                    example_id: record.example_id.clone(),
                    predicted,
                    reference,
                });
            } else {
                evaluation
                    .predictions
                    .push((record.example_id.clone(), predicted));
            }
        }

        if calibration.is_empty() {
            return Err(GoldError::EmptyCalibration);
        }
        tracing::info!(
            calibration = calibration.len(),
            evaluation = evaluation.len(),
            "gold reconciliation complete"
        );
        Ok((calibration, evaluation))
    }

    /// Resolve the trusted label table: human gold, reused machine gold, or
    /// freshly synthesized machine gold, in that order.
    fn resolve_gold_labels(
        &self,
        test_set: &TestSet,
        usable: &[&PredictionRecord],
        machine_judge: Option<&JudgeScorer>,
    ) -> Result<HashMap<String, Verdict>, GoldError> {
        if let Some(path) = &self.settings.gold_label_path {
            let labels = read_gold_labels(path, &test_set.label_column)?;
            tracing::info!(labels = labels.len(), path = %path.display(), "loaded human gold labels");
            return Ok(labels);
        }

        let Some(machine_path) = &self.settings.gold_machine_label_path else {
            return Err(GoldError::EmptyCalibration);
        };

        if machine_path.exists()
            && std::fs::metadata(machine_path).map(|m| m.len() > 0).unwrap_or(false)
        {
            let labels = read_gold_labels(machine_path, &test_set.label_column)?;
            if !labels.is_empty() {
                tracing::info!(
                    labels = labels.len(),
                    path = %machine_path.display(),
                    "reusing machine gold labels"
                );
                return Ok(labels);
            }
        }

        let judge = machine_judge.ok_or(GoldError::MissingMachineJudge)?;
        let labels = self.synthesize_machine_labels(test_set, usable, judge);
        write_gold_labels(machine_path, &test_set.label_column, &labels)?;
        tracing::info!(
            labels = labels.len(),
            path = %machine_path.display(),
            "synthesized and persisted machine gold labels"
        );
        Ok(labels.into_iter().collect())
    }

    /// Machine-label a seeded sample of the scored examples. Per-example
    /// judge failures are skipped; retry and truncation follow the ordinary
    /// judge evaluation rules.
    fn synthesize_machine_labels(
        &self,
        test_set: &TestSet,
        usable: &[&PredictionRecord],
        judge: &JudgeScorer,
    ) -> Vec<(String, Verdict)> {
        let texts: HashMap<&str, &str> = test_set
            .examples
            .iter()
            .map(|e| (e.id.as_str(), e.text.as_str()))
            .collect();

        let mut ids: Vec<&str> = usable.iter().map(|r| r.example_id.as_str()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        ids.shuffle(&mut rng);
        ids.truncate(self.settings.machine_label_sample_size);

        let mut labels = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let Some(text) = texts.get(id) else {
                continue;
            };
            if index > 0 {
                judge.honor_request_delay();
            }
            match judge.judge(&self.settings.machine_label_system_prompt, None, text) {
                Ok(verdict) => labels.push(((*id).to_string(), verdict)),
                Err(err) => {
                    tracing::error!(example_id = %id, error = %err, "machine labeling failed for example");
                }
            }
        }
        labels
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataset::{Example, RagDimension, CONCAT_TEXT_COLUMN};
    use crate::judge::{CompletionClient, CompletionRequest, JudgeError};
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_set(n: usize) -> TestSet {
        TestSet {
            dataset_id: "ds1.tsv".to_string(),
            label_column: "context_relevance".to_string(),
            dimension: RagDimension::ContextRelevance,
            text_column: CONCAT_TEXT_COLUMN,
            examples: (0..n)
                .map(|i| Example {
                    id: format!("q{i}"),
                    query: format!("query {i}"),
                    document: format!("document {i}"),
                    answer: String::new(),
                    text: format!("Question: query {i}\nDocument: document {i}"),
                    label: None,
                })
                .collect(),
        }
    }

    fn predictions(n: usize, verdict: Verdict) -> Vec<PredictionRecord> {
        (0..n)
            .map(|i| PredictionRecord {
                example_id: format!("q{i}"),
                predicted: Some(verdict),
                reference: None,
            })
            .collect()
    }

    fn settings(
        gold: Option<PathBuf>,
        machine: Option<PathBuf>,
        sample: usize,
    ) -> PostProcessSettings {
        PostProcessSettings {
            gold_label_path: gold,
            gold_machine_label_path: machine,
            machine_label_system_prompt: MACHINE_LABEL_SYSTEM_PROMPT.to_string(),
            machine_label_sample_size: sample,
            seed: 42,
        }
    }

    struct YesClient;

    impl CompletionClient for YesClient {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, JudgeError> {
            Ok("[[Yes]]".to_string())
        }
    }

    fn yes_judge() -> JudgeScorer {
        JudgeScorer::new(Box::new(YesClient), "machine".to_string(), Duration::ZERO)
    }

    #[test]
    fn test_human_gold_partitions_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let gold_path = dir.path().join("gold.tsv");
        write_gold_labels(
            &gold_path,
            "context_relevance",
            &[
                ("q0".to_string(), Verdict::Yes),
                ("q2".to_string(), Verdict::No),
            ],
        )
        .unwrap();

        let reconciler = GoldReconciler::new(settings(Some(gold_path), None, 200));
        let (calibration, evaluation) = reconciler
            .reconcile(&test_set(5), &predictions(5, Verdict::Yes), None)
            .unwrap();

        assert_eq!(calibration.len(), 2);
        assert_eq!(evaluation.len(), 3);
        let by_id: HashMap<_, _> = calibration
            .records
            .iter()
            .map(|r| (r.example_id.as_str(), r.reference))
            .collect();
        assert_eq!(by_id["q0"], Verdict::Yes);
        assert_eq!(by_id["q2"], Verdict::No);
    }

    #[test]
    fn test_calibration_accuracy_against_gold() {
        let dir = tempfile::tempdir().unwrap();
        let gold_path = dir.path().join("gold.tsv");
        // 10 gold labels, 3 of them "No"; an always-Yes judge disagrees on those.
        let gold: Vec<(String, Verdict)> = (0..10)
            .map(|i| {
                let verdict = if i < 3 { Verdict::No } else { Verdict::Yes };
                (format!("q{i}"), verdict)
            })
            .collect();
        write_gold_labels(&gold_path, "context_relevance", &gold).unwrap();

        let reconciler = GoldReconciler::new(settings(Some(gold_path), None, 200));
        let (calibration, _) = reconciler
            .reconcile(&test_set(100), &predictions(100, Verdict::Yes), None)
            .unwrap();

        assert_eq!(calibration.len(), 10);
        assert!((calibration.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_failed_predictions_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let gold_path = dir.path().join("gold.tsv");
        write_gold_labels(
            &gold_path,
            "context_relevance",
            &[("q0".to_string(), Verdict::Yes)],
        )
        .unwrap();

        let mut preds = predictions(4, Verdict::Yes);
        preds[1].predicted = None;
        preds[3].predicted = None;

        let reconciler = GoldReconciler::new(settings(Some(gold_path), None, 200));
        let (calibration, evaluation) = reconciler
            .reconcile(&test_set(4), &preds, None)
            .unwrap();
        assert_eq!(calibration.len(), 1);
        assert_eq!(evaluation.len(), 1);
    }

    #[test]
    fn test_empty_calibration_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gold_path = dir.path().join("gold.tsv");
        write_gold_labels(
            &gold_path,
            "context_relevance",
            &[("not_in_set".to_string(), Verdict::Yes)],
        )
        .unwrap();

        let reconciler = GoldReconciler::new(settings(Some(gold_path), None, 200));
        let err = reconciler
            .reconcile(&test_set(3), &predictions(3, Verdict::Yes), None)
            .unwrap_err();
        assert!(matches!(err, GoldError::EmptyCalibration));
    }

    #[test]
    fn test_machine_labels_synthesized_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let machine_path = dir.path().join("machine_gold.tsv");

        let reconciler =
            GoldReconciler::new(settings(None, Some(machine_path.clone()), 3));
        let judge = yes_judge();
        let (calibration, evaluation) = reconciler
            .reconcile(&test_set(10), &predictions(10, Verdict::Yes), Some(&judge))
            .unwrap();

        assert_eq!(calibration.len(), 3);
        assert_eq!(evaluation.len(), 7);
        assert!(calibration.records.iter().all(|r| r.reference == Verdict::Yes));

        // The synthesized table is persisted for reuse.
        let persisted = read_gold_labels(&machine_path, "context_relevance").unwrap();
        assert_eq!(persisted.len(), 3);
    }

    #[test]
    fn test_machine_labels_reused_on_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        let machine_path = dir.path().join("machine_gold.tsv");
        write_gold_labels(
            &machine_path,
            "context_relevance",
            &[("q1".to_string(), Verdict::No)],
        )
        .unwrap();

        // No judge supplied: reuse must succeed without synthesis.
        let reconciler = GoldReconciler::new(settings(None, Some(machine_path), 5));
        let (calibration, _) = reconciler
            .reconcile(&test_set(4), &predictions(4, Verdict::Yes), None)
            .unwrap();
        assert_eq!(calibration.len(), 1);
        assert_eq!(calibration.records[0].reference, Verdict::No);
        // The always-Yes predictions disagree with the reused "No" label.
        assert!(calibration.accuracy().abs() < f64::EPSILON);
    }

    #[test]
    fn test_machine_synthesis_without_judge_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let machine_path = dir.path().join("machine_gold.tsv");
        let reconciler = GoldReconciler::new(settings(None, Some(machine_path), 5));
        let err = reconciler
            .reconcile(&test_set(4), &predictions(4, Verdict::Yes), None)
            .unwrap_err();
        assert!(matches!(err, GoldError::MissingMachineJudge));
    }

    #[test]
    fn test_machine_sample_is_seeded_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.tsv");
        let path_b = dir.path().join("b.tsv");

        let judge = yes_judge();
        let set = test_set(50);
        let preds = predictions(50, Verdict::Yes);

        let (cal_a, _) = GoldReconciler::new(settings(None, Some(path_a), 7))
            .reconcile(&set, &preds, Some(&judge))
            .unwrap();
        let (cal_b, _) = GoldReconciler::new(settings(None, Some(path_b), 7))
            .reconcile(&set, &preds, Some(&judge))
            .unwrap();

        assert_eq!(cal_a.len(), 7);
        let ids_a: Vec<_> = cal_a.records.iter().map(|r| &r.example_id).collect();
        let ids_b: Vec<_> = cal_b.records.iter().map(|r| &r.example_id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
