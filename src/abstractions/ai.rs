//! AI backend abstraction layer
//!
//! Provides the trait-based port through which the engine calls an AI
//! backend, so map, filter, input-generation and reduce steps can be tested
//! without a real model behind them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Per-call options passed to an [`AiInvoker`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeOptions {
    /// Model override for this call
    pub model: Option<String>,
    /// Upper bound on the call; the backend gives up once it passes
    pub timeout: Option<Duration>,
}

impl InvokeOptions {
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of a single AI call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiInvocationResult {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl AiInvocationResult {
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: Some(response.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into a `Result`, treating a successful call without text as an error
    pub fn into_result(self) -> Result<String, String> {
        match (self.success, self.response) {
            (true, Some(response)) => Ok(response),
            (true, None) => Err("AI returned an empty response".to_string()),
            (false, _) => Err(self
                .error
                .unwrap_or_else(|| "AI invocation failed".to_string())),
        }
    }
}

/// Port for calling an AI backend
///
/// Implementations must be safe to call concurrently; the executor issues
/// up to `max_concurrency` simultaneous calls. Failures are reported in the
/// returned [`AiInvocationResult`] rather than as a Rust error so that the
/// caller decides whether a failed call is fatal.
///
/// # Examples
///
/// ```rust
/// use promptflow::abstractions::{AiInvoker, InvokeOptions};
///
/// # async fn example(invoker: &dyn AiInvoker) {
/// let result = invoker
///     .invoke("Summarize: hello world", &InvokeOptions::default())
///     .await;
/// if result.success {
///     println!("{}", result.response.unwrap_or_default());
/// }
/// # }
/// ```
#[async_trait]
pub trait AiInvoker: Send + Sync {
    /// Send a prompt and wait for the complete response
    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> AiInvocationResult;
}

/// Production invoker that shells out to an AI CLI
///
/// The prompt is written to the child's stdin so that it never passes
/// through shell quoting. The configured command line is split with
/// `shell_words`, and `--model <name>` is appended when a model is
/// requested.
pub struct CommandAiInvoker {
    program: String,
    args: Vec<String>,
    max_retries: u32,
}

impl CommandAiInvoker {
    /// Build an invoker from a command line such as `claude -p`
    pub fn from_command_line(command_line: &str) -> anyhow::Result<Self> {
        let parts = shell_words::split(command_line)?;
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Empty AI command"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            max_retries: 2,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check if an error message indicates a transient failure
    fn is_transient_error(stderr: &str) -> bool {
        let transient_patterns = [
            "rate limit",
            "timeout",
            "connection refused",
            "temporary failure",
            "network",
            "503",
            "429",
            "overloaded",
        ];

        let stderr_lower = stderr.to_lowercase();
        transient_patterns
            .iter()
            .any(|pattern| stderr_lower.contains(pattern))
    }

    /// Exponential backoff capped at 8 seconds
    fn calculate_retry_delay(attempt: u32) -> Duration {
        Duration::from_secs(2u64.pow(attempt.min(3)))
    }

    fn build_args(&self, options: &InvokeOptions) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    async fn run_once(&self, prompt: &str, options: &InvokeOptions) -> Result<String, String> {
        let mut command = Command::new(&self.program);
        command
            .args(self.build_args(options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| format!("Failed to spawn '{}': {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| format!("Failed to write prompt: {}", e))?;
        }

        let output = match options.timeout {
            Some(duration) => tokio::time::timeout(duration, child.wait_with_output())
                .await
                .map_err(|_| {
                    format!("'{}' timed out after {}ms", self.program, duration.as_millis())
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| format!("Failed to read output of '{}': {}", self.program, e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ))
        }
    }
}

#[async_trait]
impl AiInvoker for CommandAiInvoker {
    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> AiInvocationResult {
        let mut attempt = 0;
        loop {
            debug!(program = %self.program, attempt, "Invoking AI command");
            match self.run_once(prompt, options).await {
                Ok(response) if response.is_empty() => {
                    return AiInvocationResult::failed("AI returned an empty response")
                }
                Ok(response) => return AiInvocationResult::ok(response),
                Err(error) if Self::is_transient_error(&error) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Self::calculate_retry_delay(attempt);
                    warn!(
                        "Transient AI failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.max_retries, delay, error
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return AiInvocationResult::failed(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line_splits_args() {
        let invoker = CommandAiInvoker::from_command_line("claude -p --output-format text").unwrap();
        assert_eq!(invoker.program, "claude");
        assert_eq!(invoker.args, vec!["-p", "--output-format", "text"]);
    }

    #[test]
    fn test_empty_command_line_is_rejected() {
        assert!(CommandAiInvoker::from_command_line("   ").is_err());
    }

    #[test]
    fn test_model_flag_appended() {
        let invoker = CommandAiInvoker::from_command_line("claude -p").unwrap();
        let options = InvokeOptions::default().with_model(Some("haiku".to_string()));
        assert_eq!(invoker.build_args(&options), vec!["-p", "--model", "haiku"]);
    }

    #[test]
    fn test_transient_error_detection() {
        assert!(CommandAiInvoker::is_transient_error("HTTP 429 Too Many Requests"));
        assert!(CommandAiInvoker::is_transient_error("Rate limit exceeded"));
        assert!(!CommandAiInvoker::is_transient_error("invalid argument --foo"));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(CommandAiInvoker::calculate_retry_delay(1), Duration::from_secs(2));
        assert_eq!(CommandAiInvoker::calculate_retry_delay(10), Duration::from_secs(8));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(AiInvocationResult::ok("hi").into_result(), Ok("hi".to_string()));
        assert_eq!(
            AiInvocationResult::failed("boom").into_result(),
            Err("boom".to_string())
        );
        let empty = AiInvocationResult {
            success: true,
            response: None,
            error: None,
        };
        assert!(empty.into_result().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_invoker_pipes_prompt_through_stdin() {
        let invoker = CommandAiInvoker::from_command_line("cat").unwrap();
        let prompt = "quotes \" ' $HOME `x` and\nnewlines ✓";
        let result = invoker.invoke(prompt, &InvokeOptions::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.response.as_deref(), Some(prompt));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_invoker_reports_failure() {
        let invoker = CommandAiInvoker::from_command_line("false")
            .unwrap()
            .with_max_retries(0);
        let result = invoker.invoke("x", &InvokeOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_invoker_honours_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let command = format!("sh -c 'sleep 1; touch {}'", marker.display());
        let invoker = CommandAiInvoker::from_command_line(&command).unwrap();
        let options = InvokeOptions::default().with_timeout(Some(Duration::from_millis(100)));

        let start = std::time::Instant::now();
        let result = invoker.invoke("x", &options).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out after 100ms"));
        assert!(start.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_invocation_kills_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let command = format!("sh -c 'sleep 1; touch {}'", marker.display());
        let invoker = CommandAiInvoker::from_command_line(&command).unwrap();

        let raced = tokio::time::timeout(
            Duration::from_millis(100),
            invoker.invoke("x", &InvokeOptions::default()),
        )
        .await;
        assert!(raced.is_err());

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(!marker.exists());
    }
}
