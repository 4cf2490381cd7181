//! Configuration surface for a scoring run.
//!
//! Handles YAML configuration loading with validation of the gold-source and
//! scorer-selection invariants, plus the per-component settings structs handed
//! to the evaluator, the gold reconciler, and the PPI estimator.

use crate::dataset::RagType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
///
/// All variants are fatal: a bad configuration aborts the run before any
/// scorer is loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Either 'gold_label_path' or 'gold_machine_label_path' must be provided")]
    MissingGoldSource,

    #[error("No valid scorer configured: provide a non-empty 'checkpoints' list or an 'llm_judge' identifier")]
    MissingScorer,

    #[error("Checkpoint count ({checkpoints}) does not match label count ({labels})")]
    CheckpointLabelMismatch { checkpoints: usize, labels: usize },

    #[error("alpha must lie in the open interval (0, 1), got {0}")]
    InvalidAlpha(f64),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Top-level configuration for one scoring run.
///
/// Mirrors the `evaluate` CLI surface; every field has a YAML default so a
/// minimal file only needs `evaluation_datasets`, `labels`, a scorer, and a
/// gold source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    /// Significance level for the PPI confidence interval
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Number of resampling trials for the interval
    #[serde(default = "default_num_trials")]
    pub num_trials: usize,
    /// Random seed for reproducible trial resampling
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Batch size for classifier inference
    #[serde(default = "default_batch_size")]
    pub assigned_batch_size: usize,
    /// Inter-request delay for judge-backed scorers, in milliseconds
    #[serde(default)]
    pub request_delay_ms: u64,
    /// Enable verbose diagnostics
    #[serde(default)]
    pub debug_mode: bool,
    /// RAG pipeline variant under test (selects the scoring system prompts)
    #[serde(default)]
    pub rag_type: RagType,
    /// TSV test sets to evaluate, one scoring pass per file
    pub evaluation_datasets: Vec<String>,
    /// RAG dimensions to score (e.g. `context_relevance`)
    pub labels: Vec<String>,
    /// Fine-tuned classifier checkpoints, parallel to `labels`
    #[serde(default)]
    pub checkpoints: Vec<String>,
    /// LLM judge identifier, used when no checkpoints are given
    #[serde(default)]
    pub llm_judge: Option<String>,
    /// Route judge requests to a locally served model instead of a hosted API
    #[serde(default)]
    pub local_server: bool,
    /// Host URL for a locally served judge
    #[serde(default)]
    pub host_url: Option<String>,
    /// Human gold label table (TSV keyed by example id)
    #[serde(default)]
    pub gold_label_path: Option<PathBuf>,
    /// Machine gold label table; synthesized on first use when absent
    #[serde(default)]
    pub gold_machine_label_path: Option<PathBuf>,
    /// Judge used to synthesize machine gold labels
    #[serde(default)]
    pub machine_label_llm_model: Option<String>,
    /// How many examples to machine-label when synthesizing gold labels
    #[serde(default = "default_machine_label_sample_size")]
    pub machine_label_sample_size: usize,
    /// Few-shot material prepended to every judge prompt
    #[serde(default)]
    pub few_shot_examples_path: Option<PathBuf>,
}

const fn default_alpha() -> f64 {
    0.05
}
const fn default_num_trials() -> usize {
    1000
}
const fn default_seed() -> u64 {
    42
}
const fn default_batch_size() -> usize {
    32
}
const fn default_machine_label_sample_size() -> usize {
    200
}

impl ScoringConfig {
    /// Load a scoring configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a scoring configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Validate the run-level invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no gold source is configured, no scorer is
    /// resolvable, the checkpoint and label counts disagree, or any numeric
    /// field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gold_label_path.is_none() && self.gold_machine_label_path.is_none() {
            return Err(ConfigError::MissingGoldSource);
        }
        if self.checkpoints.is_empty() && self.llm_judge.is_none() {
            return Err(ConfigError::MissingScorer);
        }
        if !self.checkpoints.is_empty() && self.checkpoints.len() != self.labels.len() {
            return Err(ConfigError::CheckpointLabelMismatch {
                checkpoints: self.checkpoints.len(),
                labels: self.labels.len(),
            });
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        if self.num_trials == 0 {
            return Err(ConfigError::InvalidValue(
                "num_trials must be positive".to_string(),
            ));
        }
        if self.assigned_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "assigned_batch_size must be positive".to_string(),
            ));
        }
        if self.evaluation_datasets.is_empty() {
            return Err(ConfigError::InvalidValue(
                "evaluation_datasets must not be empty".to_string(),
            ));
        }
        if self.labels.is_empty() {
            return Err(ConfigError::InvalidValue(
                "labels must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Inter-request delay as a [`Duration`].
    #[must_use]
    pub const fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Settings consumed by the judge evaluator for one task.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    /// Batch size for classifier inference
    pub assigned_batch_size: usize,
    /// Inter-request delay for judge-backed scorers
    pub request_delay: Duration,
    /// Scoring system prompt for the label dimension under test
    pub system_prompt: String,
    /// Few-shot material prepended to every judge prompt
    pub few_shot: Option<String>,
    /// Enable verbose diagnostics
    pub debug_mode: bool,
}

/// Settings consumed by the gold reconciler for one task.
#[derive(Debug, Clone)]
pub struct PostProcessSettings {
    /// Human gold label table
    pub gold_label_path: Option<PathBuf>,
    /// Machine gold label table (read if present, written after synthesis)
    pub gold_machine_label_path: Option<PathBuf>,
    /// System prompt for the machine-labeling judge
    pub machine_label_system_prompt: String,
    /// How many examples to machine-label
    pub machine_label_sample_size: usize,
    /// Seed for the machine-label sample
    pub seed: u64,
}

/// Settings consumed by the PPI estimator.
#[derive(Debug, Clone, Copy)]
pub struct PpiSettings {
    /// Significance level; the interval has nominal coverage `1 - alpha`
    pub alpha: f64,
    /// Number of resampling trials
    pub num_trials: usize,
    /// Random seed for trial resampling
    pub seed: u64,
}

impl Default for PpiSettings {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            num_trials: default_num_trials(),
            seed: default_seed(),
        }
    }
}
