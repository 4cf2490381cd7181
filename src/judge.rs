//! Judge-backed scoring: the LLM API boundary, prompt assembly with the
//! fixed context budget, bounded retry, and verdict parsing.
//!
//! The transport is behind the [`CompletionClient`] trait. The built-in
//! implementation shells out to an installed CLI tool (OFFLINE-FIRST, no
//! HTTP client in this crate); tests and embedders supply their own clients.

use crate::dataset::Verdict;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a judge request.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Judge tool not found: {0}")]
    ToolNotFound(String),

    #[error("Judge request failed: {0}")]
    RequestFailed(String),

    #[error("Judge returned no parseable verdict: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A single completion request at the LLM API boundary.
///
/// Responses are a single text completion; streaming is never requested.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f64,
}

/// Transport abstraction for judge completions.
///
/// One request in, one text completion out. Failures are surfaced as
/// `JudgeError` and handled by the caller's retry policy.
pub trait CompletionClient: Send {
    /// Execute one completion request.
    ///
    /// # Errors
    ///
    /// Returns `JudgeError` on any transport or tool failure.
    fn complete(&self, request: &CompletionRequest) -> Result<String, JudgeError>;
}

/// Maximum assembled prompt size, in token-equivalent units.
pub const MAX_PROMPT_UNITS: usize = 4096;

/// Fixed overhead reserved for instructions scaffolding, in units.
pub const PROMPT_OVERHEAD_UNITS: usize = 100;

/// Characters per token-equivalent unit.
pub const CHARS_PER_UNIT: usize = 4;

/// Maximum attempts per judge request before the example is marked failed.
pub const MAX_ATTEMPTS: usize = 5;

/// Token-equivalent units for a string (character count divided by 4).
#[must_use]
pub fn prompt_units(text: &str) -> usize {
    text.len() / CHARS_PER_UNIT
}

/// Assemble a judge user prompt under the fixed context budget.
///
/// The budget covers the instructions, any few-shot material, the document,
/// and a fixed overhead of [`PROMPT_OVERHEAD_UNITS`]. When the total would
/// reach [`MAX_PROMPT_UNITS`], the document is truncated from the end; the
/// instructions and few-shot material are never cut. Documents already
/// within budget pass through unchanged.
#[must_use]
pub fn assemble_prompt(instructions: &str, few_shot: Option<&str>, document: &str) -> String {
    let head = few_shot.map_or_else(String::new, |fs| format!("{fs}\n\n"));
    let fixed_units = prompt_units(instructions) + prompt_units(&head) + PROMPT_OVERHEAD_UNITS;
    let document_units = prompt_units(document);

    if fixed_units + document_units >= MAX_PROMPT_UNITS {
        let budget_chars = MAX_PROMPT_UNITS.saturating_sub(fixed_units) * CHARS_PER_UNIT;
        let mut cut = budget_chars.min(document.len());
        while cut > 0 && !document.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{head}{}", &document[..cut])
    } else {
        format!("{head}{document}")
    }
}

/// Run an operation up to `max_attempts` times, breaking on first success.
///
/// Each failed attempt is logged; the final error is returned after the
/// attempt budget is exhausted so the caller can record the example as
/// failed without aborting the batch.
///
/// # Errors
///
/// Returns the last error once all attempts have failed.
pub fn retry<T, E: std::fmt::Display>(
    max_attempts: usize,
    mut operation: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                tracing::warn!(attempt, error = %err, "judge request failed, retrying");
            }
            Err(err) => {
                tracing::error!(error = %err, "judge request failed after {max_attempts} attempts");
                return Err(err);
            }
        }
    }
}

/// Parse a judge completion into a verdict.
///
/// Looks for the strict `[[Yes]]` / `[[No]]` markers first (the last marker
/// wins when both appear), then falls back to a bare yes/no response.
///
/// # Errors
///
/// Returns `JudgeError::InvalidResponse` when no verdict can be extracted.
pub fn parse_verdict(response: &str) -> Result<Verdict, JudgeError> {
    let yes = response.rfind("[[Yes]]");
    let no = response.rfind("[[No]]");
    match (yes, no) {
        (Some(y), Some(n)) => Ok(if y > n { Verdict::Yes } else { Verdict::No }),
        (Some(_), None) => Ok(Verdict::Yes),
        (None, Some(_)) => Ok(Verdict::No),
        (None, None) => {
            let bare = response.trim().trim_end_matches('.');
            if bare.eq_ignore_ascii_case("yes") {
                Ok(Verdict::Yes)
            } else if bare.eq_ignore_ascii_case("no") {
                Ok(Verdict::No)
            } else {
                Err(JudgeError::InvalidResponse(truncate_for_log(response)))
            }
        }
    }
}

fn truncate_for_log(response: &str) -> String {
    const LIMIT: usize = 120;
    if response.len() <= LIMIT {
        return response.to_string();
    }
    let mut cut = LIMIT;
    while !response.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &response[..cut])
}

/// A judge-backed scorer: one API client, one model name, one delay policy.
pub struct JudgeScorer {
    client: Box<dyn CompletionClient>,
    /// Judge model identifier
    pub model: String,
    /// Inter-request delay honored between completions
    pub request_delay: Duration,
}

impl JudgeScorer {
    #[must_use]
    pub fn new(client: Box<dyn CompletionClient>, model: String, request_delay: Duration) -> Self {
        Self {
            client,
            model,
            request_delay,
        }
    }

    /// Score one example: assemble the prompt, request a completion with
    /// bounded retry, and parse the verdict. A response without a parseable
    /// verdict counts as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns the last `JudgeError` after [`MAX_ATTEMPTS`] failures.
    pub fn judge(
        &self,
        system_prompt: &str,
        few_shot: Option<&str>,
        document: &str,
    ) -> Result<Verdict, JudgeError> {
        let user_prompt = assemble_prompt(system_prompt, few_shot, document);
        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt,
            model: self.model.clone(),
            temperature: 0.0,
        };
        retry(MAX_ATTEMPTS, || {
            let response = self.client.complete(&request)?;
            parse_verdict(&response)
        })
    }

    /// Pause between requests per the configured delay policy.
    pub fn honor_request_delay(&self) {
        if !self.request_delay.is_zero() {
            std::thread::sleep(self.request_delay);
        }
    }
}

impl std::fmt::Debug for JudgeScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JudgeScorer")
            .field("model", &self.model)
            .field("request_delay", &self.request_delay)
            .finish_non_exhaustive()
    }
}

/// Completion client that shells out to an installed CLI tool.
///
/// The judge identifier is the tool command (e.g. `claude`). For a locally
/// served model a host URL is forwarded as an extra argument.
pub struct CliJudgeClient {
    command: String,
    args_template: String,
    host_url: Option<String>,
    timeout: Duration,
}

impl CliJudgeClient {
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            args_template: "--print \"{prompt}\"".to_string(),
            host_url: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Point the client at a locally served model.
    #[must_use]
    pub fn with_host_url(mut self, host_url: &str) -> Self {
        self.host_url = Some(host_url.to_string());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check whether the CLI tool is installed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

impl CompletionClient for CliJudgeClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, JudgeError> {
        if !self.is_available() {
            return Err(JudgeError::ToolNotFound(self.command.clone()));
        }

        let combined = format!("{}\n\n{}", request.system_prompt, request.user_prompt);
        #[allow(clippy::literal_string_with_formatting_args)]
        let args = self
            .args_template
            .replace("{prompt}", &shell_escape(&combined));

        let mut cmd = Command::new(&self.command);
        for arg in shell_words::split(&args).unwrap_or_default() {
            cmd.arg(arg);
        }
        if let Some(host_url) = &self.host_url {
            cmd.arg("--host-url").arg(host_url);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let start = std::time::Instant::now();
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let response = stdout.map_or_else(String::new, |stdout| {
            let reader = BufReader::new(stdout);
            let lines: Vec<String> = reader.lines().map_while(Result::ok).collect();
            lines.join("\n")
        });

        let status = child.wait()?;
        if start.elapsed() > self.timeout {
            return Err(JudgeError::RequestFailed(format!(
                "timed out after {:?}",
                self.timeout
            )));
        }
        if !status.success() {
            return Err(JudgeError::RequestFailed(format!(
                "{} exited with {status}",
                self.command
            )));
        }
        Ok(response)
    }
}

/// Escape shell special characters in a string.
fn shell_escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
}
