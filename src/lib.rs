//! # RAG Judge Eval
//!
//! Prediction-powered evaluation of retrieval-augmented generation (RAG)
//! pipelines. Scores context relevance, answer faithfulness, and answer
//! relevance with LLM judges or fine-tuned classifiers, then calibrates the
//! raw accuracy against a small trusted gold set to produce a bias-corrected
//! estimate with a confidence interval.
//!
//! ## Why calibrate
//!
//! Raw judge accuracy conflates the pipeline's quality with the judge's
//! bias. Prediction-powered inference (PPI) separates the two: a handful of
//! human (or machine-synthesized) gold labels measures the judge's error
//! profile, and that rectifier corrects the estimate over the large
//! unlabeled remainder. Hundreds of gold labels give intervals that would
//! otherwise require thousands.
//!
//! ## Pipeline
//!
//! ```text
//! TSV test sets (query, document, answer)
//!        ↓
//! Scorer selection (classifier checkpoint | LLM judge)
//!        ↓
//! Judge evaluation (batched | retried, truncated prompts)
//!        ↓
//! Gold reconciliation (human gold | seeded machine gold)
//!        ↓
//! PPI scoring (rectifier + resampled confidence interval)
//!        ↓
//! Report (per checkpoint x label x dataset)
//! ```

pub mod aggregator;
pub mod config;
pub mod dataset;
pub mod evaluator;
pub mod gold;
pub mod judge;
pub mod ppi;
pub mod runner;
pub mod scorer;

pub use aggregator::{
    AggregateEntry, EvaluationTask, ReportError, ResultAggregator, ScoringReport,
};
pub use config::{ConfigError, EvalSettings, PostProcessSettings, PpiSettings, ScoringConfig};
pub use dataset::{
    read_gold_labels, write_gold_labels, DataError, DatasetPreparer, Example, RagDimension,
    RagType, ScoringPrompts, TestSet, Verdict,
};
pub use evaluator::{EvalError, JudgeEvaluator, PredictionRecord};
pub use gold::{CalibrationSet, EvaluationSet, GoldError, GoldReconciler, LabeledPrediction};
pub use judge::{
    assemble_prompt, parse_verdict, CliJudgeClient, CompletionClient, CompletionRequest,
    JudgeError, JudgeScorer,
};
pub use ppi::{score, PpiError, ScoreResult};
pub use runner::{RunnerError, ScoringRunner};
pub use scorer::{
    CheckpointLoader, ClassifierModel, ClassifierScorer, Scorer, ScorerError, ScorerProvider,
};
