//! `model.*` tools: single-model calls and multi-model brainstorms.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{call_limits, lenient, parse_args, require_text, Tool, ToolContext};
use crate::error::{Error, Result};
use crate::gateway::ModelSpec;
use crate::orchestrator::{BrainstormRequest, MAX_DEBATE_ROUNDS};
use crate::protocol::{ContentItem, ToolCallResult, ToolDefinition};

/// Debate rounds when the caller does not ask for a number.
const DEFAULT_DEBATE_ROUNDS: i64 = 1;

fn model_spec_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": "Participant id, unique within the call" },
            "provider": {
                "type": "string",
                "enum": ["openai", "anthropic", "gemini", "custom"]
            },
            "model": { "type": "string", "description": "Provider model name" },
            "api_url": { "type": "string", "description": "Optional endpoint override (required for custom)" },
            "api_key": { "type": "string", "description": "Credential forwarded to the provider" },
            "system_prompt": { "type": "string" }
        },
        "required": ["id", "provider", "model"]
    })
}

fn limit_properties() -> Value {
    json!({
        "timeout_sec": { "type": "integer", "minimum": 1, "maximum": 3600 },
        "temperature": { "type": "number" },
        "max_tokens": { "type": "integer", "minimum": 1, "maximum": 8192 }
    })
}

fn with_limits(mut properties: Value) -> Value {
    if let (Some(target), Value::Object(limits)) =
        (properties.as_object_mut(), limit_properties())
    {
        target.extend(limits);
    }
    properties
}

/// Tool for sending one prompt to one model.
pub struct ModelOneShotTool;

#[derive(Debug, Deserialize)]
struct OneShotArgs {
    model: ModelSpec,
    prompt: String,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    timeout_sec: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    max_tokens: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for ModelOneShotTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "model.one_shot".into(),
            description: "Send a single prompt to one model backend and return its text.".into(),
            input_schema: json!({
                "type": "object",
                "properties": with_limits(json!({
                    "model": model_spec_schema(),
                    "prompt": { "type": "string", "description": "Prompt text" }
                })),
                "required": ["model", "prompt"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: OneShotArgs = parse_args(arguments)?;
        args.model.validate()?;
        require_text("prompt", &args.prompt)?;

        let defaults = context.orchestrator.config().default_limits;
        let limits = call_limits(&defaults, args.timeout_sec, args.temperature, args.max_tokens);

        let reply = context
            .orchestrator
            .one_shot(&args.model, &args.prompt, &limits)
            .await;

        if reply.is_success() {
            Ok(ToolCallResult::text(reply.text))
        } else {
            Ok(ToolCallResult::error(format!(
                "model '{}' failed (code {}): {}",
                args.model.id, reply.code, reply.text
            )))
        }
    }
}

/// Tool for running a proposal/debate/synthesis brainstorm.
pub struct ModelBrainstormTool;

#[derive(Debug, Deserialize)]
struct BrainstormArgs {
    requirement: String,
    participants: Vec<ModelSpec>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    debate_rounds: Option<i64>,
    #[serde(default)]
    synthesis_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    timeout_sec: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    max_tokens: Option<u64>,
}

#[async_trait::async_trait]
impl Tool for ModelBrainstormTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "model.brainstorm".into(),
            description: "Have several models propose solutions, debate each other's proposals, \
and synthesize a decision, roadmap and acceptance policy."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": with_limits(json!({
                    "requirement": { "type": "string", "description": "What to design or decide" },
                    "participants": {
                        "type": "array",
                        "items": model_spec_schema(),
                        "minItems": 1
                    },
                    "debate_rounds": {
                        "type": "integer",
                        "minimum": 0,
                        "maximum": MAX_DEBATE_ROUNDS,
                        "default": DEFAULT_DEBATE_ROUNDS
                    },
                    "synthesis_by": {
                        "type": "string",
                        "description": "Participant id that writes the synthesis (default: first)"
                    }
                })),
                "required": ["requirement", "participants"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: BrainstormArgs = parse_args(arguments)?;
        require_text("requirement", &args.requirement)?;
        if args.participants.is_empty() {
            return Err(Error::InvalidParams("participants must not be empty".into()));
        }

        let defaults = context.orchestrator.config().default_limits;
        let request = BrainstormRequest {
            requirement: args.requirement,
            participants: args.participants,
            debate_rounds: args.debate_rounds.unwrap_or(DEFAULT_DEBATE_ROUNDS),
            synthesis_by: args.synthesis_by,
            limits: call_limits(&defaults, args.timeout_sec, args.temperature, args.max_tokens),
        };

        let report = context.orchestrator.brainstorm(request).await?;

        Ok(ToolCallResult {
            content: vec![ContentItem::text(serde_json::to_string_pretty(&report)?)],
            is_error: report.is_error(),
        })
    }
}
