//! Tool definitions for council-mcp.

mod claude;
mod model;

use std::sync::Arc;

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::bridge::ExecutionBridge;
use crate::config::Surface;
use crate::error::{Error, Result};
use crate::gateway::CallLimits;
use crate::orchestrator::AgentOrchestrator;
use crate::protocol::{ToolCallResult, ToolDefinition};

pub use claude::{ClaudeGeneratePatchTool, ClaudeOneShotTool, ClaudeReviewDiffTool};
pub use model::{ModelBrainstormTool, ModelOneShotTool};

/// Tool trait for implementing MCP tools.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given arguments.
    ///
    /// An `Err` is reported to the caller as an error result, never as an
    /// RPC error.
    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult>;
}

/// Context passed to tools during execution.
pub struct ToolContext {
    /// Model calls and brainstorms.
    pub orchestrator: Arc<AgentOrchestrator>,
    /// Sandboxed runner.
    pub bridge: Arc<ExecutionBridge>,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(orchestrator: AgentOrchestrator, bridge: ExecutionBridge) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            bridge: Arc::new(bridge),
        }
    }
}

/// Registry of available tools, in registration order.
///
/// Names are cached at registration; `definition()` is only called for listings.
pub struct ToolRegistry {
    tools: Vec<(String, Arc<dyn Tool>)>,
    context: Arc<ToolContext>,
}

impl ToolRegistry {
    /// Create a registry exposing every tool.
    pub fn new(context: ToolContext) -> Self {
        Self::for_surface(context, Surface::All)
    }

    /// Create a registry exposing the tools of one surface.
    pub fn for_surface(context: ToolContext, surface: Surface) -> Self {
        let mut registry = Self {
            tools: Vec::new(),
            context: Arc::new(context),
        };
        if surface.has_model_tools() {
            registry.register(Arc::new(ModelOneShotTool));
            registry.register(Arc::new(ModelBrainstormTool));
        }
        if surface.has_runner_tools() {
            registry.register(Arc::new(ClaudeOneShotTool));
            registry.register(Arc::new(ClaudeReviewDiffTool));
            registry.register(Arc::new(ClaudeGeneratePatchTool));
        }
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.retain(|(existing, _)| *existing != name);
        self.tools.push((name, tool));
    }

    /// Get all tool definitions.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|(_, t)| t.definition()).collect()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|(registered, _)| registered == name)
            .map(|(_, tool)| tool)
    }

    /// Execute a tool by name. Unknown tools and tool failures come back
    /// as error results.
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolCallResult {
        let tool = match self.lookup(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "Unknown tool");
                return ToolCallResult::error(Error::UnknownTool(name.to_string()).to_string());
            }
        };

        info!(tool = name, "Calling tool");
        match tool.execute(arguments, &self.context).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "Tool failed");
                ToolCallResult::error(e.to_string())
            }
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Decode tool arguments; `null` counts as an empty object.
pub(crate) fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| Error::InvalidParams(e.to_string()))
}

/// Reject blank required strings.
pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidParams(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Apply optional overrides to default limits, clamping into range.
pub(crate) fn call_limits(
    defaults: &CallLimits,
    timeout_sec: Option<u64>,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
) -> CallLimits {
    CallLimits {
        timeout: timeout_sec
            .map(|s| std::time::Duration::from_secs(s.clamp(1, 3600)))
            .unwrap_or(defaults.timeout),
        temperature: temperature
            .map(|t| t.clamp(0.0, 2.0))
            .unwrap_or(defaults.temperature),
        max_tokens: max_tokens
            .map(|t| t.clamp(1, 8192) as u32)
            .unwrap_or(defaults.max_tokens),
    }
}

/// Deserializers that accept a JSON number or a numeric string.
pub(crate) mod lenient {
    use super::*;
    use serde::de::Error as _;

    type Parsed<T, E> = std::result::Result<Option<T>, E>;

    fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Parsed<f64, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected a number, got \"{}\"", s))),
            Some(other) => Err(D::Error::custom(format!("expected a number, got {}", other))),
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Parsed<f64, D::Error> {
        Ok(number(deserializer)?.filter(|f| f.is_finite()))
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Parsed<u64, D::Error> {
        Ok(opt_f64(deserializer)?.map(|f| f.max(0.0).round() as u64))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Parsed<i64, D::Error> {
        Ok(opt_f64(deserializer)?.map(|f| f.round() as i64))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::bridge::{AllowedRoots, BridgeConfig};
    use crate::gateway::{GatewayReply, ModelGateway, ModelSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway that echoes the participant id and counts calls.
    #[derive(Default)]
    pub struct CountingGateway {
        pub calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ModelGateway for CountingGateway {
        async fn call(
            &self,
            spec: &ModelSpec,
            _prompt: &str,
            _limits: &CallLimits,
        ) -> GatewayReply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if spec.id == "down" {
                GatewayReply::failure(500, "internal")
            } else {
                GatewayReply::ok(format!("reply from {}", spec.id))
            }
        }
    }

    impl CountingGateway {
        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    /// Context around a counting gateway and a bridge rooted at `root`
    /// whose runner does not exist.
    pub fn context(gateway: Arc<CountingGateway>, root: &std::path::Path) -> ToolContext {
        let mut bridge = BridgeConfig::new(AllowedRoots::new([root]).unwrap());
        bridge.command = "/nonexistent/runner".into();
        ToolContext::new(AgentOrchestrator::new(gateway), ExecutionBridge::new(bridge))
    }
}
