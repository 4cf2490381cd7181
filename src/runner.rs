//! Orchestration of one scoring run.
//!
//! Drives the outer (checkpoint, label) pairings over every evaluation
//! dataset: prepare the test set, provide a scorer, evaluate, reconcile gold
//! labels, compute the PPI estimate, and accumulate the result. Scorers are
//! task-local and dropped at the end of each iteration; only the aggregator
//! outlives the loop.

use crate::aggregator::{EvaluationTask, ResultAggregator};
use crate::config::{EvalSettings, PostProcessSettings, PpiSettings, ScoringConfig};
use crate::dataset::{DataError, DatasetPreparer, ScoringPrompts};
use crate::evaluator::JudgeEvaluator;
use crate::gold::{GoldReconciler, MACHINE_LABEL_SYSTEM_PROMPT};
use crate::judge::JudgeScorer;
use crate::ppi;
use crate::scorer::{Scorer, ScorerError, ScorerProvider};
use thiserror::Error;

/// Errors that abort an entire scoring run.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Scorer configuration invalid: {0}")]
    ScorerConfiguration(String),

    #[error("Label column rejected: {0}")]
    Label(#[from] DataError),

    #[error("Failed to read few-shot examples: {0}")]
    FewShot(std::io::Error),
}

/// Drives the full scoring pipeline for one configuration.
pub struct ScoringRunner {
    config: ScoringConfig,
    provider: ScorerProvider,
    machine_label_system_prompt: String,
}

impl ScoringRunner {
    #[must_use]
    pub fn new(config: ScoringConfig, provider: ScorerProvider) -> Self {
        Self {
            config,
            provider,
            machine_label_system_prompt: MACHINE_LABEL_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Override the machine-label system prompt (primarily for tests).
    #[must_use]
    pub fn with_machine_label_prompt(mut self, prompt: &str) -> Self {
        self.machine_label_system_prompt = prompt.to_string();
        self
    }

    /// The (checkpoint, label) pairings the outer loop visits.
    fn pairings(&self) -> Vec<(Option<String>, String)> {
        if self.config.checkpoints.is_empty() {
            self.config
                .labels
                .iter()
                .map(|label| (None, label.clone()))
                .collect()
        } else {
            self.config
                .checkpoints
                .iter()
                .zip(&self.config.labels)
                .map(|(checkpoint, label)| (Some(checkpoint.clone()), label.clone()))
                .collect()
        }
    }

    /// Execute the run.
    ///
    /// Configuration errors abort immediately, before any scorer is loaded.
    /// Load and data errors are fatal only for the affected task: the error
    /// is logged and the loop moves on to the next (checkpoint, label,
    /// dataset) combination.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError` for run-level failures (invalid configuration,
    /// unknown label column, unreadable few-shot file).
    pub fn run(&self) -> Result<ResultAggregator, RunnerError> {
        self.config.validate()?;

        let prompts = ScoringPrompts::for_rag_type(self.config.rag_type);
        let few_shot = match &self.config.few_shot_examples_path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(RunnerError::FewShot)?),
            None => None,
        };

        let mut aggregator = ResultAggregator::new();
        for (checkpoint, label_column) in self.pairings() {
            for dataset_id in &self.config.evaluation_datasets {
                let task = EvaluationTask {
                    checkpoint_id: checkpoint.clone(),
                    label_column: label_column.clone(),
                    dataset_id: dataset_id.clone(),
                };
                tracing::info!(task = %task, "starting evaluation task");
                if let Err(fatal) = self.run_task(&task, prompts, few_shot.as_deref(), &mut aggregator)? {
                    tracing::error!(task = %task, error = %fatal, "task failed, continuing with remaining tasks");
                }
            }
        }
        Ok(aggregator)
    }

    /// Run one task. The outer `Result` carries run-fatal errors; the inner
    /// one carries task-fatal errors the caller logs and absorbs.
    fn run_task(
        &self,
        task: &EvaluationTask,
        prompts: ScoringPrompts,
        few_shot: Option<&str>,
        aggregator: &mut ResultAggregator,
    ) -> Result<Result<(), String>, RunnerError> {
        let test_set = match DatasetPreparer::prepare(
            &task.dataset_id,
            &task.label_column,
            &self.config.labels,
        ) {
            Ok(set) => set,
            Err(err @ (DataError::UnknownLabel(_) | DataError::UnknownDimension(_))) => {
                return Err(RunnerError::Label(err));
            }
            Err(err) => return Ok(Err(err.to_string())),
        };

        let scorer = match self.provider.provide(
            task.checkpoint_id.as_deref(),
            self.config.llm_judge.as_deref(),
            self.config.request_delay(),
        ) {
            Ok(scorer) => scorer,
            Err(ScorerError::Configuration(msg)) => {
                return Err(RunnerError::ScorerConfiguration(msg));
            }
            Err(err) => return Ok(Err(err.to_string())),
        };

        let eval_settings = EvalSettings {
            assigned_batch_size: self.config.assigned_batch_size,
            request_delay: self.config.request_delay(),
            system_prompt: prompts.for_dimension(test_set.dimension).to_string(),
            few_shot: few_shot.map(str::to_string),
            debug_mode: self.config.debug_mode,
        };
        let predictions = match JudgeEvaluator::new(eval_settings).evaluate(&test_set, &scorer) {
            Ok(predictions) => predictions,
            Err(err) => return Ok(Err(err.to_string())),
        };

        let machine_judge = self.machine_judge()?;
        let reconciler = GoldReconciler::new(PostProcessSettings {
            gold_label_path: self.config.gold_label_path.clone(),
            gold_machine_label_path: self.config.gold_machine_label_path.clone(),
            machine_label_system_prompt: self.machine_label_system_prompt.clone(),
            machine_label_sample_size: self.config.machine_label_sample_size,
            seed: self.config.seed,
        });
        let (calibration, evaluation) =
            match reconciler.reconcile(&test_set, &predictions, machine_judge.as_ref()) {
                Ok(split) => split,
                Err(err) => return Ok(Err(err.to_string())),
            };

        let ppi_settings = PpiSettings {
            alpha: self.config.alpha,
            num_trials: self.config.num_trials,
            seed: self.config.seed,
        };
        let result = match ppi::score(&calibration, &evaluation, &ppi_settings) {
            Ok(result) => result,
            Err(err) => return Ok(Err(err.to_string())),
        };

        tracing::info!(
            task = %task,
            estimate = result.point_estimate,
            lower = result.confidence_interval.0,
            upper = result.confidence_interval.1,
            "task scored"
        );
        aggregator.append(task.clone(), result);
        Ok(Ok(()))
    }

    /// Build the machine-labeling judge when machine gold synthesis may be
    /// needed (no human gold table configured).
    fn machine_judge(&self) -> Result<Option<JudgeScorer>, RunnerError> {
        if self.config.gold_label_path.is_some() {
            return Ok(None);
        }
        let Some(model) = &self.config.machine_label_llm_model else {
            return Ok(None);
        };
        match self
            .provider
            .provide(None, Some(model), self.config.request_delay())
        {
            Ok(Scorer::Judge(judge)) => Ok(Some(judge)),
            Ok(Scorer::Classifier(_)) => Ok(None),
            Err(ScorerError::Configuration(msg)) => Err(RunnerError::ScorerConfiguration(msg)),
            Err(err) => {
                tracing::error!(error = %err, "failed to load machine-labeling judge");
                Ok(None)
            }
        }
    }
}
