//! Test-set preparation: TSV loading, text-column resolution, and the
//! scoring system prompts for each RAG pipeline variant.
//!
//! The preparer is read-only over persisted data. Its one piece of logic is
//! resolving which text the scorer should see for a given label dimension:
//! context relevance scores the question against the retrieved document,
//! while the answer dimensions additionally include the generated answer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while preparing or reading labeled data.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Dataset file not found: {0}")]
    NotFound(String),

    #[error("Dataset contains no examples: {0}")]
    Empty(String),

    #[error("Dataset is missing required column '{column}': {path}")]
    MissingColumn { column: String, path: String },

    #[error("Label column '{0}' is not one of the configured labels")]
    UnknownLabel(String),

    #[error("Label column '{0}' does not name a known RAG dimension")]
    UnknownDimension(String),

    #[error("Unparseable label value '{0}' (expected Yes/No or 1/0)")]
    BadLabel(String),

    #[error("Failed to read tabular data: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A categorical judge verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Yes,
    No,
}

impl Verdict {
    /// Numeric encoding used by the PPI estimator (`Yes` = 1.0).
    #[must_use]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Yes => 1.0,
            Self::No => 0.0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "Yes"),
            Self::No => write!(f, "No"),
        }
    }
}

impl FromStr for Verdict {
    type Err = DataError;

    /// Parse a verdict from a label cell. Accepts `Yes`/`No` (any case),
    /// `1`/`0`, and the bracketed judge forms `[[Yes]]`/`[[No]]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches(|c| c == '[' || c == ']');
        match trimmed.to_ascii_lowercase().as_str() {
            "yes" | "1" | "1.0" | "true" => Ok(Self::Yes),
            "no" | "0" | "0.0" | "false" => Ok(Self::No),
            _ => Err(DataError::BadLabel(s.to_string())),
        }
    }
}

/// The three RAG dimensions a label column can score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagDimension {
    ContextRelevance,
    AnswerFaithfulness,
    AnswerRelevance,
}

impl RagDimension {
    /// Resolve the dimension named by a label column.
    ///
    /// # Errors
    ///
    /// Returns `DataError::UnknownDimension` when the column does not name
    /// one of the three scored dimensions.
    pub fn from_label(label_column: &str) -> Result<Self, DataError> {
        let lower = label_column.to_ascii_lowercase();
        if lower.contains("context_relevance") {
            Ok(Self::ContextRelevance)
        } else if lower.contains("answer_faithfulness") {
            Ok(Self::AnswerFaithfulness)
        } else if lower.contains("answer_relevance") {
            Ok(Self::AnswerRelevance)
        } else {
            Err(DataError::UnknownDimension(label_column.to_string()))
        }
    }
}

/// RAG pipeline variants, each with its own scoring prompt phrasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RagType {
    /// Question answering over retrieved documents
    #[default]
    #[serde(rename = "question_answering")]
    QuestionAnswering,
    /// Fact verification (FEVER-style statements)
    #[serde(rename = "fever")]
    FactVerification,
    /// Knowledge-grounded dialogue (WoW-style)
    #[serde(rename = "wow")]
    DialogueAgent,
}

/// The scoring system prompts for one RAG pipeline variant.
#[derive(Debug, Clone, Copy)]
pub struct ScoringPrompts {
    pub context_relevance: &'static str,
    pub answer_faithfulness: &'static str,
    pub answer_relevance: &'static str,
}

impl ScoringPrompts {
    /// Select the prompt triple for a RAG pipeline variant. Pure lookup.
    #[must_use]
    pub const fn for_rag_type(rag_type: RagType) -> Self {
        match rag_type {
            RagType::QuestionAnswering => Self {
                context_relevance: CONTEXT_RELEVANCE_QA,
                answer_faithfulness: ANSWER_FAITHFULNESS_QA,
                answer_relevance: ANSWER_RELEVANCE_QA,
            },
            RagType::FactVerification => Self {
                context_relevance: CONTEXT_RELEVANCE_FEVER,
                answer_faithfulness: ANSWER_FAITHFULNESS_FEVER,
                answer_relevance: ANSWER_RELEVANCE_FEVER,
            },
            RagType::DialogueAgent => Self {
                context_relevance: CONTEXT_RELEVANCE_WOW,
                answer_faithfulness: ANSWER_FAITHFULNESS_WOW,
                answer_relevance: ANSWER_RELEVANCE_WOW,
            },
        }
    }

    /// The prompt for a single dimension.
    #[must_use]
    pub const fn for_dimension(&self, dimension: RagDimension) -> &'static str {
        match dimension {
            RagDimension::ContextRelevance => self.context_relevance,
            RagDimension::AnswerFaithfulness => self.answer_faithfulness,
            RagDimension::AnswerRelevance => self.answer_relevance,
        }
    }
}

const CONTEXT_RELEVANCE_QA: &str = "Given the following question and document, you must analyze the provided document and determine whether it is sufficient for answering the question. In your evaluation, you should consider the content of the document and how it relates to the provided question. Output your final verdict by strictly following this format: '[[Yes]]' if the document is sufficient and '[[No]]' if the document provided is not sufficient.";

const ANSWER_FAITHFULNESS_QA: &str = "Given the following question, document, and answer, you must analyze the provided answer and determine whether it is faithful to the contents of the document. The answer must not offer new information beyond the context provided in the document and must not contradict information provided in the document. Output your final verdict by strictly following this format: '[[Yes]]' if the answer is faithful to the document and '[[No]]' if the answer is not faithful to the document.";

const ANSWER_RELEVANCE_QA: &str = "Given the following question, document, and answer, you must analyze the provided answer and determine whether it is relevant for the provided question. In your evaluation, you should consider whether the answer addresses all aspects of the question and provides only correct information from the document for answering the question. Output your final verdict by strictly following this format: '[[Yes]]' if the answer is relevant for the given question and '[[No]]' if the answer is not relevant for the given question.";

const CONTEXT_RELEVANCE_FEVER: &str = "Given the following statement and document, you must analyze the provided document and determine whether it is relevant for verifying the statement. In your evaluation, you should consider the content of the document and how it relates to the provided statement. Output your final verdict by strictly following this format: '[[Yes]]' if the document is relevant and '[[No]]' if the document provided is not relevant.";

const ANSWER_FAITHFULNESS_FEVER: &str = "Given the following statement, document, and answer, you must analyze the provided answer and determine whether it is faithful to the contents of the document. The answer must not offer new information beyond the context provided in the document and must not contradict information provided in the document. Output your final verdict by strictly following this format: '[[Yes]]' if the answer is faithful to the document and '[[No]]' if the answer is not faithful to the document.";

const ANSWER_RELEVANCE_FEVER: &str = "Given the following statement, document, and answer, you must analyze the provided answer and determine whether it is relevant for the provided statement. Output your final verdict by strictly following this format: '[[Yes]]' if the answer is relevant for the given statement and '[[No]]' if the answer is not relevant for the given statement.";

const CONTEXT_RELEVANCE_WOW: &str = "Given the following dialogue and document, you must analyze the provided document and determine whether it is relevant for responding to the dialogue. In your evaluation, you should consider the content of the document and how it relates to the provided dialogue. Output your final verdict by strictly following this format: '[[Yes]]' if the document is relevant and '[[No]]' if the document provided is not relevant.";

const ANSWER_FAITHFULNESS_WOW: &str = "Given the following dialogue, document, and response, you must analyze the provided response and determine whether it is faithful to the contents of the document. The response must not offer new information beyond the context provided in the document and must not contradict information provided in the document. Output your final verdict by strictly following this format: '[[Yes]]' if the response is faithful to the document and '[[No]]' if the response is not faithful to the document.";

const ANSWER_RELEVANCE_WOW: &str = "Given the following dialogue, document, and response, you must analyze the provided response and determine whether it is relevant for the provided dialogue. Output your final verdict by strictly following this format: '[[Yes]]' if the response is relevant for the given dialogue and '[[No]]' if the response is not relevant for the given dialogue.";

/// The resolved text column name appended to every prepared test set.
pub const CONCAT_TEXT_COLUMN: &str = "concat_text";

/// One row of a prepared test set.
#[derive(Debug, Clone)]
pub struct Example {
    /// Stable example identifier (the `id` column, or the row index)
    pub id: String,
    pub query: String,
    pub document: String,
    pub answer: String,
    /// Resolved scoring text for the label dimension under test
    pub text: String,
    /// Ground-truth label, when the test set carries one
    pub label: Option<Verdict>,
}

/// An ordered, prepared test set for one evaluation task.
#[derive(Debug, Clone)]
pub struct TestSet {
    /// Source path of the dataset
    pub dataset_id: String,
    /// Label column the set was prepared for
    pub label_column: String,
    /// RAG dimension resolved from the label column
    pub dimension: RagDimension,
    /// Name of the resolved text column
    pub text_column: &'static str,
    pub examples: Vec<Example>,
}

impl TestSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// Build the scoring text for one example under a given dimension.
fn scoring_text(dimension: RagDimension, query: &str, document: &str, answer: &str) -> String {
    match dimension {
        RagDimension::ContextRelevance => {
            format!("Question: {query}\nDocument: {document}")
        }
        RagDimension::AnswerFaithfulness | RagDimension::AnswerRelevance => {
            format!("Question: {query}\nDocument: {document}\nAnswer: {answer}")
        }
    }
}

/// Prepares test sets for evaluation. Read-only over persisted data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetPreparer;

impl DatasetPreparer {
    /// Load a TSV test set and resolve its text column for `label_column`.
    ///
    /// Validates that `label_column` is one of `known_labels` and that the
    /// file carries `query` and `document` columns. Rows with an empty or
    /// missing label cell get `label: None`.
    ///
    /// # Errors
    ///
    /// Returns `DataError` if the label is unknown, the file is missing or
    /// empty, required columns are absent, or a label cell is unparseable.
    pub fn prepare(
        dataset_path: &str,
        label_column: &str,
        known_labels: &[String],
    ) -> Result<TestSet, DataError> {
        if !known_labels.iter().any(|l| l == label_column) {
            return Err(DataError::UnknownLabel(label_column.to_string()));
        }
        let dimension = RagDimension::from_label(label_column)?;

        if !Path::new(dataset_path).exists() {
            return Err(DataError::NotFound(dataset_path.to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(dataset_path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        for required in ["query", "document"] {
            if !headers.iter().any(|h| h == required) {
                return Err(DataError::MissingColumn {
                    column: required.to_string(),
                    path: dataset_path.to_string(),
                });
            }
        }

        let mut examples = Vec::new();
        for (index, row) in reader.deserialize::<HashMap<String, String>>().enumerate() {
            let row = row?;
            let get = |key: &str| row.get(key).cloned().unwrap_or_default();
            let query = get("query");
            let document = get("document");
            let answer = get("answer");
            let id = {
                let raw = get("id");
                if raw.is_empty() {
                    index.to_string()
                } else {
                    raw
                }
            };
            let label = match row.get(label_column).map(String::as_str) {
                None | Some("") => None,
                Some(cell) => Some(cell.parse::<Verdict>()?),
            };
            let text = scoring_text(dimension, &query, &document, &answer);
            examples.push(Example {
                id,
                query,
                document,
                answer,
                text,
                label,
            });
        }

        if examples.is_empty() {
            return Err(DataError::Empty(dataset_path.to_string()));
        }

        Ok(TestSet {
            dataset_id: dataset_path.to_string(),
            label_column: label_column.to_string(),
            dimension,
            text_column: CONCAT_TEXT_COLUMN,
            examples,
        })
    }
}

/// Read a gold label table (TSV keyed by `id` with a `label_column` column).
///
/// # Errors
///
/// Returns `DataError` if the file cannot be read, lacks the label column,
/// or contains unparseable label cells.
pub fn read_gold_labels(
    path: &Path,
    label_column: &str,
) -> Result<HashMap<String, Verdict>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if !headers.iter().any(|h| h == label_column) {
        return Err(DataError::MissingColumn {
            column: label_column.to_string(),
            path: path.display().to_string(),
        });
    }

    let mut labels = HashMap::new();
    for row in reader.deserialize::<HashMap<String, String>>() {
        let row = row?;
        let Some(id) = row.get("id").filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Some(cell) = row.get(label_column).filter(|v| !v.is_empty()) {
            labels.insert(id.clone(), cell.parse::<Verdict>()?);
        }
    }
    Ok(labels)
}

/// Write a gold label table in the same TSV shape `read_gold_labels` expects.
///
/// # Errors
///
/// Returns `DataError` if the file cannot be written.
pub fn write_gold_labels(
    path: &Path,
    label_column: &str,
    labels: &[(String, Verdict)],
) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["id", label_column])?;
    for (id, verdict) in labels {
        writer.write_record([id.as_str(), &verdict.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}
