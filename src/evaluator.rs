//! Runs a scorer over every example of a prepared test set.
//!
//! Classifier scorers run synchronously in fixed-size batches with no retry
//! (deterministic local inference). Judge scorers go one request at a time
//! with the bounded retry policy and the configured inter-request delay; an
//! example whose request budget is exhausted is marked failed rather than
//! aborting the evaluation.

use crate::config::EvalSettings;
use crate::dataset::{TestSet, Verdict};
use crate::scorer::{Scorer, ScorerError};
use thiserror::Error;

/// Errors that abort evaluation of one task.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    Scorer(#[from] ScorerError),

    #[error("Test set is empty: {0}")]
    EmptyTestSet(String),
}

/// One scored example. `predicted` is `None` when the judge failed all
/// attempts (the "no prediction" sentinel); `reference` is `None` when the
/// test set carries no ground truth for the example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRecord {
    pub example_id: String,
    pub predicted: Option<Verdict>,
    pub reference: Option<Verdict>,
}

impl PredictionRecord {
    /// Whether the scorer produced a prediction for this example.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.predicted.is_some()
    }
}

/// Drives one scorer over one prepared test set.
#[derive(Debug, Clone)]
pub struct JudgeEvaluator {
    settings: EvalSettings,
}

impl JudgeEvaluator {
    #[must_use]
    pub const fn new(settings: EvalSettings) -> Self {
        Self { settings }
    }

    /// Evaluate every example, producing one record per example in order.
    ///
    /// # Errors
    ///
    /// Returns `EvalError` if the test set is empty or classifier inference
    /// fails; per-example judge failures are absorbed into failure sentinels.
    pub fn evaluate(
        &self,
        test_set: &TestSet,
        scorer: &Scorer,
    ) -> Result<Vec<PredictionRecord>, EvalError> {
        if test_set.is_empty() {
            return Err(EvalError::EmptyTestSet(test_set.dataset_id.clone()));
        }

        let records = match scorer {
            Scorer::Classifier(classifier) => {
                let mut records = Vec::with_capacity(test_set.len());
                for batch in test_set.examples.chunks(self.settings.assigned_batch_size) {
                    let texts: Vec<String> = batch.iter().map(|e| e.text.clone()).collect();
                    let predictions = classifier.predict_batch(&texts)?;
                    for (example, predicted) in batch.iter().zip(predictions) {
                        records.push(PredictionRecord {
                            example_id: example.id.clone(),
                            predicted: Some(predicted),
                            reference: example.label,
                        });
                    }
                }
                records
            }
            Scorer::Judge(judge) => {
                let mut records = Vec::with_capacity(test_set.len());
                let mut failed = 0usize;
                for (index, example) in test_set.examples.iter().enumerate() {
                    if index > 0 {
                        judge.honor_request_delay();
                    }
                    let predicted = match judge.judge(
                        &self.settings.system_prompt,
                        self.settings.few_shot.as_deref(),
                        &example.text,
                    ) {
                        Ok(verdict) => Some(verdict),
                        Err(err) => {
                            failed += 1;
                            tracing::error!(
                                example_id = %example.id,
                                error = %err,
                                "example failed after 5 attempts, recording no prediction"
                            );
                            None
                        }
                    };
                    if self.settings.debug_mode {
                        tracing::debug!(
                            example_id = %example.id,
                            predicted = ?predicted,
                            "judged example"
                        );
                    }
                    records.push(PredictionRecord {
                        example_id: example.id.clone(),
                        predicted,
                        reference: example.label,
                    });
                }
                if failed > 0 {
                    tracing::warn!(
                        failed,
                        total = test_set.len(),
                        "some examples received no prediction"
                    );
                }
                records
            }
        };

        tracing::info!(
            dataset = %test_set.dataset_id,
            scorer = %scorer.id(),
            examples = records.len(),
            "evaluation complete"
        );
        Ok(records)
    }
}
