//! Scorer selection and loading.
//!
//! A scorer is either a fine-tuned classifier checkpoint or an LLM judge,
//! behind a single tagged variant so the pipeline never inspects types at
//! runtime. The provider applies the selection policy once per task:
//! checkpoints take priority over a configured judge, and exactly one of
//! the two must be resolvable.

use crate::dataset::Verdict;
use crate::judge::{CliJudgeClient, CompletionClient, JudgeScorer};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while selecting or loading a scorer.
#[derive(Error, Debug)]
pub enum ScorerError {
    /// Fatal for the run: the task has no resolvable scorer.
    #[error("No valid model or checkpoint provided: {0}")]
    Configuration(String),

    /// Fatal for the affected task: the scorer resource is unavailable.
    #[error("Failed to load scorer: {0}")]
    Load(String),

    /// Classifier inference failed for a batch.
    #[error("Classifier inference failed: {0}")]
    Inference(String),
}

/// A loaded classifier: batched, deterministic, local inference.
///
/// Model and tokenizer loading live behind this trait; the evaluation core
/// only needs batch predictions.
pub trait ClassifierModel: Send {
    /// Predict a verdict for each text in the batch.
    ///
    /// # Errors
    ///
    /// Returns `ScorerError::Inference` if the batch cannot be scored.
    fn predict_batch(&self, texts: &[String]) -> Result<Vec<Verdict>, ScorerError>;
}

/// Loads classifier checkpoints into [`ClassifierModel`] instances.
///
/// Implementations own device placement and weight management; dropping the
/// returned model releases those resources.
pub trait CheckpointLoader: Send {
    /// Load the model for a checkpoint identifier.
    ///
    /// # Errors
    ///
    /// Returns `ScorerError::Load` if the weights cannot be obtained.
    fn load(&self, checkpoint: &str) -> Result<Box<dyn ClassifierModel>, ScorerError>;
}

/// A checkpoint-backed scorer bound to one loaded model.
pub struct ClassifierScorer {
    /// Checkpoint identifier the model was loaded from
    pub checkpoint: String,
    model: Box<dyn ClassifierModel>,
}

impl ClassifierScorer {
    #[must_use]
    pub fn new(checkpoint: String, model: Box<dyn ClassifierModel>) -> Self {
        Self { checkpoint, model }
    }

    /// Score a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns `ScorerError::Inference` if the batch cannot be scored.
    pub fn predict_batch(&self, texts: &[String]) -> Result<Vec<Verdict>, ScorerError> {
        self.model.predict_batch(texts)
    }
}

impl std::fmt::Debug for ClassifierScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierScorer")
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

/// The two scorer variants, selected once per task.
#[derive(Debug)]
pub enum Scorer {
    Classifier(ClassifierScorer),
    Judge(JudgeScorer),
}

impl Scorer {
    /// Short identifier for logs and reports.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Classifier(classifier) => &classifier.checkpoint,
            Self::Judge(judge) => &judge.model,
        }
    }
}

/// Builds judge completion clients for a model identifier.
pub type JudgeClientFactory =
    dyn Fn(&str, bool, Option<&str>) -> Result<Box<dyn CompletionClient>, ScorerError> + Send;

/// Provides scorers for evaluation tasks.
pub struct ScorerProvider {
    checkpoint_loader: Option<Box<dyn CheckpointLoader>>,
    judge_client_factory: Box<JudgeClientFactory>,
    local_server: bool,
    host_url: Option<String>,
}

impl ScorerProvider {
    /// Provider with the built-in CLI judge transport and no classifier
    /// backend registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            checkpoint_loader: None,
            judge_client_factory: Box::new(|model, local_server, host_url| {
                let mut client = CliJudgeClient::new(model);
                if local_server {
                    if let Some(url) = host_url {
                        client = client.with_host_url(url);
                    }
                }
                Ok(Box::new(client))
            }),
            local_server: false,
            host_url: None,
        }
    }

    /// Register a classifier backend for checkpoint-based tasks.
    #[must_use]
    pub fn with_checkpoint_loader(mut self, loader: Box<dyn CheckpointLoader>) -> Self {
        self.checkpoint_loader = Some(loader);
        self
    }

    /// Replace the judge transport (used by tests and embedders).
    #[must_use]
    pub fn with_judge_client_factory(mut self, factory: Box<JudgeClientFactory>) -> Self {
        self.judge_client_factory = factory;
        self
    }

    /// Route judge requests to a locally served model.
    #[must_use]
    pub fn with_local_server(mut self, host_url: Option<String>) -> Self {
        self.local_server = true;
        self.host_url = host_url;
        self
    }

    /// Select and load the scorer for one task.
    ///
    /// Checkpoints take priority: when both a checkpoint and a judge are
    /// supplied, the judge is ignored for this task with a warning.
    ///
    /// # Errors
    ///
    /// Returns `ScorerError::Configuration` when neither a checkpoint nor a
    /// judge is supplied, and `ScorerError::Load` when the selected resource
    /// cannot be obtained.
    pub fn provide(
        &self,
        checkpoint: Option<&str>,
        llm_judge: Option<&str>,
        request_delay: Duration,
    ) -> Result<Scorer, ScorerError> {
        match (checkpoint, llm_judge) {
            (Some(checkpoint), judge) => {
                if judge.is_some() {
                    tracing::warn!(
                        checkpoint,
                        "both checkpoint and llm_judge were provided; using the checkpoint"
                    );
                }
                let loader = self.checkpoint_loader.as_ref().ok_or_else(|| {
                    ScorerError::Load(format!(
                        "no classifier backend registered for checkpoint '{checkpoint}'"
                    ))
                })?;
                let model = loader.load(checkpoint)?;
                Ok(Scorer::Classifier(ClassifierScorer::new(
                    checkpoint.to_string(),
                    model,
                )))
            }
            (None, Some(judge)) => {
                let client =
                    (self.judge_client_factory)(judge, self.local_server, self.host_url.as_deref())?;
                Ok(Scorer::Judge(JudgeScorer::new(
                    client,
                    judge.to_string(),
                    request_delay,
                )))
            }
            (None, None) => Err(ScorerError::Configuration(
                "neither a checkpoint nor an llm_judge identifier was supplied".to_string(),
            )),
        }
    }
}

impl Default for ScorerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScorerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScorerProvider")
            .field("has_checkpoint_loader", &self.checkpoint_loader.is_some())
            .field("local_server", &self.local_server)
            .field("host_url", &self.host_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::judge::{CompletionRequest, JudgeError};

    struct ConstantModel(Verdict);

    impl ClassifierModel for ConstantModel {
        fn predict_batch(&self, texts: &[String]) -> Result<Vec<Verdict>, ScorerError> {
            Ok(vec![self.0; texts.len()])
        }
    }

    struct ConstantLoader(Verdict);

    impl CheckpointLoader for ConstantLoader {
        fn load(&self, checkpoint: &str) -> Result<Box<dyn ClassifierModel>, ScorerError> {
            if checkpoint == "missing" {
                return Err(ScorerError::Load("weights not found".to_string()));
            }
            Ok(Box::new(ConstantModel(self.0)))
        }
    }

    struct EchoClient;

    impl CompletionClient for EchoClient {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, JudgeError> {
            Ok("[[Yes]]".to_string())
        }
    }

    fn stub_judge_provider() -> ScorerProvider {
        ScorerProvider::new()
            .with_judge_client_factory(Box::new(|_, _, _| Ok(Box::new(EchoClient))))
    }

    #[test]
    fn test_provide_fails_without_any_scorer() {
        let provider = ScorerProvider::new();
        let err = provider.provide(None, None, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ScorerError::Configuration(_)));
    }

    #[test]
    fn test_provide_judge() {
        let provider = stub_judge_provider();
        let scorer = provider
            .provide(None, Some("stub-judge"), Duration::from_millis(5))
            .unwrap();
        match scorer {
            Scorer::Judge(judge) => {
                assert_eq!(judge.model, "stub-judge");
                assert_eq!(judge.request_delay, Duration::from_millis(5));
            }
            Scorer::Classifier(_) => panic!("expected a judge scorer"),
        }
    }

    #[test]
    fn test_provide_checkpoint_takes_priority_over_judge() {
        let provider = stub_judge_provider()
            .with_checkpoint_loader(Box::new(ConstantLoader(Verdict::Yes)));
        let scorer = provider
            .provide(Some("ckpt_a"), Some("ignored-judge"), Duration::ZERO)
            .unwrap();
        assert!(matches!(scorer, Scorer::Classifier(_)));
        assert_eq!(scorer.id(), "ckpt_a");
    }

    #[test]
    fn test_provide_checkpoint_without_backend_is_load_error() {
        let provider = ScorerProvider::new();
        let err = provider
            .provide(Some("ckpt_a"), None, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ScorerError::Load(_)));
    }

    #[test]
    fn test_provide_missing_weights_is_load_error() {
        let provider =
            ScorerProvider::new().with_checkpoint_loader(Box::new(ConstantLoader(Verdict::No)));
        let err = provider
            .provide(Some("missing"), None, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ScorerError::Load(_)));
    }

    #[test]
    fn test_classifier_batch_prediction() {
        let scorer = ClassifierScorer::new(
            "ckpt_a".to_string(),
            Box::new(ConstantModel(Verdict::No)),
        );
        let texts = vec!["a".to_string(), "b".to_string()];
        let predictions = scorer.predict_batch(&texts).unwrap();
        assert_eq!(predictions, vec![Verdict::No, Verdict::No]);
    }

    #[test]
    fn test_scorer_error_display() {
        let err = ScorerError::Load("weights gone".to_string());
        assert!(err.to_string().contains("weights gone"));
    }
}
