//! `claude.*` tools: prompts executed by the sandboxed local runner.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{lenient, parse_args, require_text, Tool, ToolContext};
use crate::bridge::{BridgeJob, RunOutcome, MAX_FILE_CHARS_RANGE, TIMEOUT_RANGE_SECS};
use crate::error::Result;
use crate::protocol::{ContentItem, ToolCallResult, ToolDefinition};

fn cwd_property() -> Value {
    json!({
        "type": "string",
        "description": "Working directory; must be inside an allowed root (default: server cwd)"
    })
}

fn timeout_property() -> Value {
    json!({
        "type": "integer",
        "minimum": TIMEOUT_RANGE_SECS.0,
        "maximum": TIMEOUT_RANGE_SECS.1
    })
}

fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

/// Render a finished run as runner output plus a JSON status segment.
fn outcome_result(outcome: RunOutcome) -> Result<ToolCallResult> {
    let is_error = outcome.is_error();
    let output = if !outcome.stdout.trim().is_empty() {
        outcome.stdout.clone()
    } else if !outcome.stderr.trim().is_empty() {
        outcome.stderr.clone()
    } else {
        "(no output)".to_string()
    };
    let status = json!({
        "exit_code": outcome.exit_code,
        "timed_out": outcome.timed_out,
        "cwd": outcome.cwd.to_string_lossy(),
        "duration_ms": outcome.duration_ms,
        "stderr": outcome.stderr,
    });

    Ok(ToolCallResult {
        content: vec![
            ContentItem::text(output),
            ContentItem::text(serde_json::to_string_pretty(&status)?),
        ],
        is_error,
    })
}

/// Tool for a free-form runner prompt.
pub struct ClaudeOneShotTool;

#[derive(Debug, Deserialize)]
struct OneShotArgs {
    prompt: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    timeout_sec: Option<u64>,
    #[serde(default)]
    context_files: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    max_file_chars: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for ClaudeOneShotTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "claude.one_shot".into(),
            description: "Run a prompt through the local Claude CLI inside an allowed directory."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Prompt text" },
                    "cwd": cwd_property(),
                    "timeout_sec": timeout_property(),
                    "context_files": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Files to inline ahead of the prompt, relative to cwd"
                    },
                    "max_file_chars": {
                        "type": "integer",
                        "minimum": MAX_FILE_CHARS_RANGE.0,
                        "maximum": MAX_FILE_CHARS_RANGE.1
                    }
                },
                "required": ["prompt"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: OneShotArgs = parse_args(arguments)?;
        require_text("prompt", &args.prompt)?;

        let outcome = context
            .bridge
            .one_shot(BridgeJob {
                prompt: args.prompt,
                cwd: args.cwd,
                timeout: timeout(args.timeout_sec),
                context_files: args.context_files,
                max_file_chars: args.max_file_chars.map(|n| n as usize),
            })
            .await?;
        outcome_result(outcome)
    }
}

/// Tool for reviewing a unified diff.
pub struct ClaudeReviewDiffTool;

#[derive(Debug, Deserialize)]
struct ReviewDiffArgs {
    diff: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    timeout_sec: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for ClaudeReviewDiffTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "claude.review_diff".into(),
            description: "Review a unified diff for bugs, regressions and missing tests.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "diff": { "type": "string", "description": "Unified diff to review" },
                    "cwd": cwd_property(),
                    "timeout_sec": timeout_property()
                },
                "required": ["diff"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: ReviewDiffArgs = parse_args(arguments)?;
        require_text("diff", &args.diff)?;

        let outcome = context
            .bridge
            .review_diff(&args.diff, args.cwd, timeout(args.timeout_sec))
            .await?;
        outcome_result(outcome)
    }
}

/// Tool for producing a patch.
pub struct ClaudeGeneratePatchTool;

#[derive(Debug, Deserialize)]
struct GeneratePatchArgs {
    task: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    timeout_sec: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for ClaudeGeneratePatchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "claude.generate_patch".into(),
            description: "Generate a unified-diff patch for a task.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string", "description": "What the patch should do" },
                    "context": { "type": "string", "description": "Extra context for the runner" },
                    "cwd": cwd_property(),
                    "timeout_sec": timeout_property()
                },
                "required": ["task"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: GeneratePatchArgs = parse_args(arguments)?;
        require_text("task", &args.task)?;

        let outcome = context
            .bridge
            .generate_patch(&args.task, &args.context, args.cwd, timeout(args.timeout_sec))
            .await?;
        outcome_result(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::super::ToolRegistry;
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn outcome(exit_code: i32, stdout: &str, stderr: &str) -> RunOutcome {
        RunOutcome {
            exit_code,
            timed_out: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            cwd: PathBuf::from("/srv/project"),
            duration_ms: 12,
        }
    }

    #[test]
    fn test_outcome_segments() {
        let result = outcome_result(outcome(0, "patch text", "")).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 2);
        let ContentItem::Text { text } = &result.content[0];
        assert_eq!(text, "patch text");
        let ContentItem::Text { text } = &result.content[1];
        let status: Value = serde_json::from_str(text).unwrap();
        assert_eq!(status["exit_code"], json!(0));
        assert_eq!(status["cwd"], json!("/srv/project"));
        assert_eq!(status["duration_ms"], json!(12));
    }

    #[test]
    fn test_outcome_falls_back_to_stderr() {
        let result = outcome_result(outcome(2, "  ", "boom")).unwrap();
        assert!(result.is_error);
        let ContentItem::Text { text } = &result.content[0];
        assert_eq!(text, "boom");

        let result = outcome_result(outcome(0, "", "")).unwrap();
        let ContentItem::Text { text } = &result.content[0];
        assert_eq!(text, "(no output)");
    }

    #[tokio::test]
    async fn test_cwd_outside_roots_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(context(Arc::default(), root.path()));

        let result = registry
            .execute(
                "claude.review_diff",
                json!({"diff": "--- a\n+++ b", "cwd": other.path().to_string_lossy()}),
            )
            .await;
        assert!(result.is_error);
        assert!(result.joined_text().contains("sandbox violation"));
    }

    #[tokio::test]
    async fn test_missing_runner_is_error_result() {
        let root = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(context(Arc::default(), root.path()));

        let result = registry
            .execute(
                "claude.one_shot",
                json!({"prompt": "hi", "cwd": root.path().to_string_lossy()}),
            )
            .await;
        assert!(result.is_error);
        assert!(result.joined_text().contains("IO error"));
    }

    #[tokio::test]
    async fn test_blank_task_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(context(Arc::default(), root.path()));

        let result = registry
            .execute("claude.generate_patch", json!({"task": " "}))
            .await;
        assert!(result.is_error);
        assert!(result.joined_text().contains("task must not be empty"));
    }
}
