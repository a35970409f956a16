//! Process configuration.
//!
//! Raw settings come from the command line (with environment fallbacks) and
//! are turned into immutable config values once, at startup.

use std::path::Path;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::bridge::{AllowedRoots, BridgeConfig, DEFAULT_MAX_FILE_CHARS};
use crate::error::Result;
use crate::gateway::CallLimits;
use crate::orchestrator::OrchestratorConfig;

/// Environment variable holding the comma-separated allow-list.
pub const ALLOWED_ROOTS_ENV: &str = "COUNCIL_ALLOWED_ROOTS";
/// Environment variable naming the runner program.
pub const RUNNER_COMMAND_ENV: &str = "COUNCIL_RUNNER_COMMAND";

/// Which tool families the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Surface {
    /// Model tools and runner tools.
    #[default]
    All,
    /// `model.*` tools only.
    ModelRouter,
    /// `claude.*` tools only.
    Runner,
}

impl Surface {
    /// Whether `model.*` tools are registered.
    pub fn has_model_tools(self) -> bool {
        matches!(self, Surface::All | Surface::ModelRouter)
    }

    /// Whether `claude.*` tools are registered.
    pub fn has_runner_tools(self) -> bool {
        matches!(self, Surface::All | Surface::Runner)
    }
}

/// Server settings as given on the command line.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Tool surface to expose.
    #[arg(long, value_enum, default_value_t = Surface::All)]
    pub surface: Surface,

    /// Comma-separated absolute roots the runner may use as working directory.
    /// Defaults to the current directory.
    #[arg(long, env = ALLOWED_ROOTS_ENV)]
    pub allowed_roots: Option<String>,

    /// Runner program.
    #[arg(long, env = RUNNER_COMMAND_ENV, default_value = "claude")]
    pub runner_command: String,

    /// Argument passed to the runner before the prompt (repeatable).
    #[arg(long = "runner-arg", default_value = "-p", allow_hyphen_values = true)]
    pub runner_args: Vec<String>,

    /// Participant calls in flight per brainstorm stage.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..=32))]
    pub max_concurrent: u64,

    /// Per-call timeout in seconds when a tool call does not set one.
    #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub default_timeout_sec: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            surface: Surface::All,
            allowed_roots: None,
            runner_command: "claude".into(),
            runner_args: vec!["-p".into()],
            max_concurrent: 1,
            default_timeout_sec: 120,
        }
    }
}

impl Settings {
    /// Build the immutable server config. `cwd` is the allow-list fallback.
    pub fn into_config(self, cwd: &Path) -> Result<ServerConfig> {
        let timeout = Duration::from_secs(self.default_timeout_sec);
        let allowed_roots = AllowedRoots::parse(self.allowed_roots.as_deref(), cwd)?;

        let bridge = BridgeConfig {
            allowed_roots,
            command: self.runner_command,
            args: self.runner_args,
            default_timeout: timeout,
            default_max_file_chars: DEFAULT_MAX_FILE_CHARS,
        };
        let orchestrator = OrchestratorConfig {
            max_concurrent: self.max_concurrent as usize,
            default_limits: CallLimits {
                timeout,
                ..CallLimits::default()
            },
        };

        Ok(ServerConfig {
            surface: self.surface,
            bridge,
            orchestrator,
        })
    }
}

/// Everything the server needs, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub surface: Surface,
    pub bridge: BridgeConfig,
    pub orchestrator: OrchestratorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["council-mcp"]).unwrap();
        assert_eq!(cli.settings.surface, Surface::All);
        assert_eq!(cli.settings.runner_args, vec!["-p".to_string()]);
        assert_eq!(cli.settings.max_concurrent, 1);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "council-mcp",
            "--surface",
            "model-router",
            "--allowed-roots",
            "/srv/a,/srv/b",
            "--runner-arg",
            "--print",
            "--runner-arg",
            "--verbose",
            "--max-concurrent",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.settings.surface, Surface::ModelRouter);
        assert_eq!(cli.settings.runner_args, vec!["--print", "--verbose"]);

        let config = cli.settings.into_config(Path::new("/unused")).unwrap();
        assert_eq!(
            config.bridge.allowed_roots.roots(),
            &[PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]
        );
        assert_eq!(config.orchestrator.max_concurrent, 3);
        assert!(!config.surface.has_runner_tools());
    }

    #[test]
    fn test_out_of_range_timeout_rejected() {
        assert!(Cli::try_parse_from(["council-mcp", "--default-timeout-sec", "0"]).is_err());
    }

    #[test]
    fn test_roots_fall_back_to_cwd() {
        let config = Settings::default()
            .into_config(Path::new("/srv/project"))
            .unwrap();
        assert_eq!(
            config.bridge.allowed_roots.roots(),
            &[PathBuf::from("/srv/project")]
        );
        assert_eq!(config.bridge.command, "claude");
        assert_eq!(config.orchestrator.default_limits.timeout, Duration::from_secs(120));
    }
}
