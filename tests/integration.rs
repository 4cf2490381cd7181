//! End-to-end tests of the scoring pipeline: configuration through dataset
//! preparation, evaluation, gold reconciliation, PPI scoring, and reporting.

#![allow(clippy::unwrap_used)]

use rag_judge_eval::{
    write_gold_labels, ClassifierModel, CompletionClient, CompletionRequest, ConfigError,
    JudgeError, RunnerError, ScorerError, ScorerProvider, ScoringConfig, ScoringReport,
    ScoringRunner, Verdict,
};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct YesClient;

impl CompletionClient for YesClient {
    fn complete(&self, _request: &CompletionRequest) -> Result<String, JudgeError> {
        Ok("The document looks sufficient. [[Yes]]".to_string())
    }
}

fn yes_judge_provider() -> ScorerProvider {
    ScorerProvider::new().with_judge_client_factory(Box::new(|_, _, _| Ok(Box::new(YesClient))))
}

struct CountingLoader {
    loads: Arc<AtomicUsize>,
}

struct YesModel;

impl ClassifierModel for YesModel {
    fn predict_batch(&self, texts: &[String]) -> Result<Vec<Verdict>, ScorerError> {
        Ok(vec![Verdict::Yes; texts.len()])
    }
}

impl rag_judge_eval::CheckpointLoader for CountingLoader {
    fn load(
        &self,
        _checkpoint: &str,
    ) -> Result<Box<dyn ClassifierModel>, ScorerError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(YesModel))
    }
}

fn write_dataset(dir: &Path, name: &str, rows: usize) -> String {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "id\tquery\tdocument\tanswer").unwrap();
    for i in 0..rows {
        writeln!(
            file,
            "q{i}\twho wrote chapter {i}\tchapter {i} was written by author {i}\tauthor {i}"
        )
        .unwrap();
    }
    path.display().to_string()
}

/// Gold table with `no_count` disagreeing labels out of `total`.
fn write_gold(path: &Path, total: usize, no_count: usize) {
    let gold: Vec<(String, Verdict)> = (0..total)
        .map(|i| {
            let verdict = if i < no_count { Verdict::No } else { Verdict::Yes };
            (format!("q{i}"), verdict)
        })
        .collect();
    write_gold_labels(path, "context_relevance", &gold).unwrap();
}

#[test]
fn test_judge_pipeline_with_human_gold() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "nq.tsv", 100);
    let gold_path = dir.path().join("gold.tsv");
    // 10 gold labels, 3 of them "No": the always-Yes judge is 70% accurate
    // on calibration and its raw rate of 1.0 gets pulled toward 0.7.
    write_gold(&gold_path, 10, 3);

    let yaml = format!(
        r#"
num_trials: 500
evaluation_datasets: ["{dataset}"]
labels: ["context_relevance"]
llm_judge: "stub-judge"
gold_label_path: "{}"
"#,
        gold_path.display()
    );
    let config = ScoringConfig::from_yaml(&yaml).unwrap();
    let aggregator = ScoringRunner::new(config, yes_judge_provider())
        .run()
        .unwrap();

    assert_eq!(aggregator.len(), 1);
    let result = &aggregator.entries()[0].result;
    assert_eq!(result.calibration_size, 10);
    assert_eq!(result.evaluation_size, 90);
    assert!((result.calibration_accuracy - 0.7).abs() < 1e-9);
    // Rectifier of roughly -0.3 corrects the always-Yes raw rate of 1.0.
    assert!(result.point_estimate > 0.55 && result.point_estimate < 0.85);
    let (lower, upper) = result.confidence_interval;
    assert!(lower >= 0.0 && lower <= result.point_estimate);
    assert!(result.point_estimate <= upper && upper <= 1.0);
}

#[test]
fn test_run_is_deterministic_under_fixed_seed() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "nq.tsv", 60);
    let gold_path = dir.path().join("gold.tsv");
    write_gold(&gold_path, 8, 2);

    let yaml = format!(
        r#"
num_trials: 200
seed: 7
evaluation_datasets: ["{dataset}"]
labels: ["context_relevance"]
llm_judge: "stub-judge"
gold_label_path: "{}"
"#,
        gold_path.display()
    );
    let config = ScoringConfig::from_yaml(&yaml).unwrap();

    let run = |config: ScoringConfig| {
        let aggregator = ScoringRunner::new(config, yes_judge_provider())
            .run()
            .unwrap();
        aggregator.entries()[0].result.clone()
    };
    let a = run(config.clone());
    let b = run(config);

    assert!((a.point_estimate - b.point_estimate).abs() < f64::EPSILON);
    assert!((a.confidence_interval.0 - b.confidence_interval.0).abs() < f64::EPSILON);
    assert!((a.confidence_interval.1 - b.confidence_interval.1).abs() < f64::EPSILON);
}

#[test]
fn test_checkpoint_pairing_produces_one_entry_per_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let ds1 = write_dataset(dir.path(), "ds1.tsv", 40);
    let ds2 = write_dataset(dir.path(), "ds2.tsv", 40);
    let gold_path = dir.path().join("gold.tsv");
    write_gold(&gold_path, 6, 1);

    let yaml = format!(
        r#"
num_trials: 100
evaluation_datasets: ["{ds1}", "{ds2}"]
labels: ["context_relevance"]
checkpoints: ["ckpt_a"]
gold_label_path: "{}"
"#,
        gold_path.display()
    );
    let config = ScoringConfig::from_yaml(&yaml).unwrap();

    let loads = Arc::new(AtomicUsize::new(0));
    let provider = ScorerProvider::new().with_checkpoint_loader(Box::new(CountingLoader {
        loads: Arc::clone(&loads),
    }));
    let aggregator = ScoringRunner::new(config, provider).run().unwrap();

    // checkpoints x labels zips to one pairing, run over both datasets.
    assert_eq!(aggregator.len(), 2);
    assert!(aggregator
        .entries()
        .iter()
        .all(|e| e.task.checkpoint_id.as_deref() == Some("ckpt_a")));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_missing_gold_sources_fail_before_any_load() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "ds1.tsv", 10);

    let yaml = format!(
        r#"
evaluation_datasets: ["{dataset}"]
labels: ["context_relevance"]
checkpoints: ["ckpt_a"]
"#
    );
    let config = ScoringConfig::from_yaml(&yaml).unwrap();

    let loads = Arc::new(AtomicUsize::new(0));
    let provider = ScorerProvider::new().with_checkpoint_loader(Box::new(CountingLoader {
        loads: Arc::clone(&loads),
    }));
    let err = ScoringRunner::new(config, provider).run().unwrap_err();

    assert!(matches!(
        err,
        RunnerError::Config(ConfigError::MissingGoldSource)
    ));
    // Validation fails before any checkpoint is touched.
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_machine_gold_synthesis_and_reuse_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "ds1.tsv", 50);
    let machine_path = dir.path().join("machine_gold.tsv");

    let yaml = format!(
        r#"
num_trials: 100
machine_label_sample_size: 10
evaluation_datasets: ["{dataset}"]
labels: ["context_relevance"]
llm_judge: "stub-judge"
machine_label_llm_model: "stub-machine"
gold_machine_label_path: "{}"
"#,
        machine_path.display()
    );
    let config = ScoringConfig::from_yaml(&yaml).unwrap();

    let first = ScoringRunner::new(config.clone(), yes_judge_provider())
        .run()
        .unwrap();
    assert_eq!(first.entries()[0].result.calibration_size, 10);
    assert!(machine_path.exists());
    let persisted = std::fs::read_to_string(&machine_path).unwrap();

    // A second run reuses the persisted table instead of re-synthesizing.
    let second = ScoringRunner::new(config, yes_judge_provider())
        .run()
        .unwrap();
    assert_eq!(second.entries()[0].result.calibration_size, 10);
    assert_eq!(std::fs::read_to_string(&machine_path).unwrap(), persisted);
}

#[test]
fn test_results_survive_a_report_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path(), "ds1.tsv", 30);
    let gold_path = dir.path().join("gold.tsv");
    write_gold(&gold_path, 5, 1);
    let report_path = dir.path().join("results.json");

    let yaml = format!(
        r#"
num_trials: 100
evaluation_datasets: ["{dataset}"]
labels: ["context_relevance"]
llm_judge: "stub-judge"
gold_label_path: "{}"
"#,
        gold_path.display()
    );
    let config = ScoringConfig::from_yaml(&yaml).unwrap();
    let aggregator = ScoringRunner::new(config, yes_judge_provider())
        .run()
        .unwrap();
    aggregator.write_json(&report_path).unwrap();

    let report = ScoringReport::load(&report_path).unwrap();
    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.task.label_column, "context_relevance");
    assert!(entry.task.checkpoint_id.is_none());
    assert!(
        (entry.result.point_estimate - aggregator.entries()[0].result.point_estimate).abs()
            < f64::EPSILON
    );
    assert!(report.to_table().contains("llm-judge"));
}
