//! Sandboxed execution bridge for an external code-generation CLI.
//!
//! Every call resolves its working directory to an absolute path and checks
//! it against [`AllowedRoots`] before anything is spawned. The child runs
//! with a hard wall-clock timeout and is killed when it expires.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Exit code reported when the child was killed on timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when the child ended without one (killed by a signal).
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Bounds for per-call timeouts, in seconds.
pub const TIMEOUT_RANGE_SECS: (u64, u64) = (1, 3600);
/// Bounds for the per-file character cap.
pub const MAX_FILE_CHARS_RANGE: (usize, usize) = (100, 50_000);
/// Per-file character cap when the caller does not pass one.
pub const DEFAULT_MAX_FILE_CHARS: usize = 12_000;

/// Filesystem roots the bridge may run in. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Build from absolute paths. Existing roots are canonicalized.
    pub fn new<I, P>(roots: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut resolved = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.is_absolute() {
                return Err(Error::Config(format!(
                    "allowed root must be absolute: {}",
                    root.display()
                )));
            }
            let normalized = normalize_lexically(root);
            let canonical = std::fs::canonicalize(&normalized).unwrap_or(normalized);
            if !resolved.contains(&canonical) {
                resolved.push(canonical);
            }
        }
        if resolved.is_empty() {
            return Err(Error::Config("at least one allowed root is required".into()));
        }
        Ok(Self { roots: resolved })
    }

    /// Parse a comma-separated list; absent or blank falls back to `default_root`.
    pub fn parse(value: Option<&str>, default_root: &Path) -> Result<Self> {
        let entries: Vec<&str> = value
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if entries.is_empty() {
            Self::new([default_root])
        } else {
            Self::new(entries)
        }
    }

    /// The configured roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Whether `path` (already absolute and normalized) equals or descends from a root.
    ///
    /// Uses component-wise `Path::starts_with`, so `/root-evil` does not
    /// match the root `/root`.
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Resolve `candidate` against `base`, collapse `.`/`..`, follow symlinks
    /// when the path exists, and check containment.
    pub fn resolve(&self, candidate: &Path, base: &Path) -> Result<PathBuf> {
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base.join(candidate)
        };
        let normalized = normalize_lexically(&absolute);
        let resolved = std::fs::canonicalize(&normalized).unwrap_or(normalized);

        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(Error::Sandbox(format!(
                "{} is outside the allowed roots",
                resolved.display()
            )))
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Bridge configuration. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Working-directory allow-list.
    pub allowed_roots: AllowedRoots,
    /// Program to run.
    pub command: String,
    /// Arguments placed before the prompt.
    pub args: Vec<String>,
    /// Timeout when a call does not pass one.
    pub default_timeout: Duration,
    /// Per-file cap when a call does not pass one.
    pub default_max_file_chars: usize,
}

impl BridgeConfig {
    /// Config running `claude -p <prompt>` inside `allowed_roots`.
    pub fn new(allowed_roots: AllowedRoots) -> Self {
        Self {
            allowed_roots,
            command: "claude".into(),
            args: vec!["-p".into()],
            default_timeout: Duration::from_secs(120),
            default_max_file_chars: DEFAULT_MAX_FILE_CHARS,
        }
    }
}

/// One bridge invocation.
#[derive(Debug, Clone, Default)]
pub struct BridgeJob {
    pub prompt: String,
    pub cwd: Option<String>,
    pub timeout: Option<Duration>,
    pub context_files: Vec<String>,
    pub max_file_chars: Option<usize>,
}

/// What the child process did.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub cwd: PathBuf,
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Timed out or exited non-zero.
    pub fn is_error(&self) -> bool {
        self.timed_out || self.exit_code != 0
    }
}

/// Runs the external CLI inside the sandbox.
pub struct ExecutionBridge {
    config: BridgeConfig,
}

impl ExecutionBridge {
    /// Create a bridge.
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run a free-form prompt, optionally with inlined context files.
    pub async fn one_shot(&self, job: BridgeJob) -> Result<RunOutcome> {
        self.run(job).await
    }

    /// Ask for a review of a unified diff.
    pub async fn review_diff(
        &self,
        diff: &str,
        cwd: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome> {
        self.run(BridgeJob {
            prompt: review_diff_prompt(diff),
            cwd,
            timeout,
            ..Default::default()
        })
        .await
    }

    /// Ask for a unified-diff patch implementing `task`.
    pub async fn generate_patch(
        &self,
        task: &str,
        context: &str,
        cwd: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome> {
        self.run(BridgeJob {
            prompt: generate_patch_prompt(task, context),
            cwd,
            timeout,
            ..Default::default()
        })
        .await
    }

    async fn run(&self, job: BridgeJob) -> Result<RunOutcome> {
        let base = std::env::current_dir()?;
        let requested = job
            .cwd
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| base.clone());

        let cwd = match self.config.allowed_roots.resolve(&requested, &base) {
            Ok(p) => p,
            Err(e) => {
                warn!(cwd = %requested.display(), "Rejected working directory");
                return Err(e);
            }
        };
        if !cwd.is_dir() {
            return Err(Error::InvalidParams(format!(
                "cwd is not a directory: {}",
                cwd.display()
            )));
        }

        let max_chars = job
            .max_file_chars
            .unwrap_or(self.config.default_max_file_chars)
            .clamp(MAX_FILE_CHARS_RANGE.0, MAX_FILE_CHARS_RANGE.1);
        let prompt = if job.context_files.is_empty() {
            job.prompt
        } else {
            let context = self.inline_files(&cwd, &job.context_files, max_chars).await;
            format!("{}\n## Task\n{}", context, job.prompt)
        };

        let timeout = clamp_timeout(job.timeout.unwrap_or(self.config.default_timeout));
        self.spawn(&cwd, &prompt, timeout).await
    }

    async fn spawn(&self, cwd: &Path, prompt: &str, timeout: Duration) -> Result<RunOutcome> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(prompt)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down the runner's children too.
        #[cfg(unix)]
        command.process_group(0);

        info!(
            command = %self.config.command,
            cwd = %cwd.display(),
            timeout_secs = timeout.as_secs(),
            "Spawning runner"
        );

        let start = Instant::now();
        let child = command.spawn().map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to spawn '{}': {}", self.config.command, e),
            )
        })?;
        let pid = child.id();

        // Dropping the wait future on timeout drops the child, and
        // kill_on_drop sends SIGKILL to it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let outcome = RunOutcome {
                    exit_code: output.status.code().unwrap_or(SIGNAL_EXIT_CODE),
                    timed_out: false,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    cwd: cwd.to_path_buf(),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                debug!(
                    exit_code = outcome.exit_code,
                    duration_ms = outcome.duration_ms,
                    "Runner exited"
                );
                Ok(outcome)
            }
            Err(_) => {
                kill_process_group(pid);
                warn!(timeout_secs = timeout.as_secs(), "Runner timed out; killed");
                Ok(RunOutcome {
                    exit_code: TIMEOUT_EXIT_CODE,
                    timed_out: true,
                    stdout: String::new(),
                    stderr: format!("timed out after {}s", timeout.as_secs()),
                    cwd: cwd.to_path_buf(),
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Render context files as markdown sections. Files outside the allow-list
    /// or that cannot be read become placeholders.
    async fn inline_files(&self, cwd: &Path, files: &[String], max_chars: usize) -> String {
        let mut out = String::from("## Context files\n");
        for name in files {
            let body = match self.config.allowed_roots.resolve(Path::new(name), cwd) {
                Ok(path) => match tokio::fs::read_to_string(&path).await {
                    Ok(text) => truncate_file(&text, max_chars),
                    Err(e) => format!("[unreadable: {}]", e),
                },
                Err(e) => format!("[unreadable: {}]", e),
            };
            out.push_str(&format!("\n### {}\n```\n{}\n```\n", name, body));
        }
        out
    }
}

/// SIGKILL every process left in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg takes plain integers and touches no memory.
    if unsafe { libc::killpg(pid, libc::SIGKILL) } != 0 {
        debug!(pid, error = %io::Error::last_os_error(), "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn clamp_timeout(timeout: Duration) -> Duration {
    Duration::from_secs(
        timeout
            .as_secs()
            .clamp(TIMEOUT_RANGE_SECS.0, TIMEOUT_RANGE_SECS.1),
    )
}

fn truncate_file(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let dropped = text[idx..].chars().count();
            format!("{}\n[... truncated {} chars]", &text[..idx], dropped)
        }
        None => text.to_string(),
    }
}

/// Prompt for `claude.review_diff`.
pub fn review_diff_prompt(diff: &str) -> String {
    format!(
        "Review the following unified diff. Report bugs, risky changes, missing tests and \
style problems, ordered by severity, with file and line references. \
Do not modify any files.\n\n```diff\n{}\n```",
        diff
    )
}

/// Prompt for `claude.generate_patch`.
pub fn generate_patch_prompt(task: &str, context: &str) -> String {
    format!(
        "Produce a patch in unified diff format that implements the task below. \
Output only the diff, with correct `---`/`+++` headers and hunks. \
Do not apply it.\n\n## Task\n{}\n\n## Context\n{}",
        task, context
    )
}
