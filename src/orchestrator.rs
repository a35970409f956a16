//! Agent orchestrator: single-model calls and the brainstorm pipeline.
//!
//! A brainstorm runs three serialized stages over N participants:
//!
//! 1. **proposal**: every participant answers the requirement.
//! 2. **debate** (0..=5 rounds): every participant critiques the previous
//!    stage's outputs from the *other* participants.
//! 3. **synthesis**: one participant merges everything into a plan.
//!
//! A failed call never aborts the pipeline. The participant still gets an
//! entry (tagged as failed) and the failure is appended to the error log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gateway::{CallLimits, GatewayReply, ModelGateway, ModelSpec};

/// Upper bound for debate rounds.
pub const MAX_DEBATE_ROUNDS: u32 = 5;

/// Diagnostic text kept per error-log entry.
const MAX_ERROR_DETAIL_CHARS: usize = 1000;

const PROPOSAL_INSTRUCTION: &str = "Produce a solution proposal for the requirement below. \
Cover the architecture, key components, main risks and the first implementation steps.";

const DEBATE_INSTRUCTION: &str = "Critique the other proposals below against the requirement. \
Point out flaws, gaps and risks, say what you would adopt from each, and state your revised position.";

const SYNTHESIS_INSTRUCTION: &str = "You are the synthesizer. Using the requirement, all proposals \
and the full debate history below, produce:\n\
1. Decision summary\n\
2. Tradeoffs considered\n\
3. Staged roadmap\n\
4. Task decomposition strategy\n\
5. Acceptance policy";

/// Orchestrator for single and multi-model prompt execution.
pub struct AgentOrchestrator {
    /// Gateway used for every model call.
    gateway: Arc<dyn ModelGateway>,
    /// Configuration.
    config: OrchestratorConfig,
}

impl AgentOrchestrator {
    /// Create a new orchestrator.
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self::with_config(gateway, OrchestratorConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(gateway: Arc<dyn ModelGateway>, config: OrchestratorConfig) -> Self {
        Self { gateway, config }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Send one prompt to one model.
    pub async fn one_shot(
        &self,
        spec: &ModelSpec,
        prompt: &str,
        limits: &CallLimits,
    ) -> GatewayReply {
        info!(
            participant = %spec.id,
            provider = %spec.provider,
            model = %spec.model,
            "One-shot call"
        );
        self.gateway.call(spec, prompt, limits).await
    }

    /// Run the proposal → debate → synthesis pipeline.
    ///
    /// Only structurally invalid requests fail; provider failures are
    /// reported inside the returned report.
    pub async fn brainstorm(&self, request: BrainstormRequest) -> Result<BrainstormReport> {
        request.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let rounds = clamp_debate_rounds(request.debate_rounds);
        let synthesizer =
            resolve_synthesizer(&request.participants, request.synthesis_by.as_deref());
        let limits = request.limits;
        let mut state = BrainstormState::default();

        info!(
            run_id = %run_id,
            participants = request.participants.len(),
            rounds,
            synthesizer = %synthesizer.id,
            "Brainstorm started"
        );

        // Proposal stage
        let proposal_prompt = format!(
            "{}\n\n## Requirement\n{}",
            PROPOSAL_INSTRUCTION, request.requirement
        );
        let replies = self
            .fan_out(&request.participants, &limits, |_| proposal_prompt.clone())
            .await;
        for (spec, reply) in request.participants.iter().zip(replies) {
            let entry = state.record("proposal", &spec.id, reply);
            state.proposals.insert(spec.id.clone(), entry);
        }
        info!(run_id = %run_id, failures = state.errors.len(), "Proposal stage complete");

        // Debate stage
        for round in 1..=rounds {
            let pool = state
                .debates
                .last()
                .map(|d| d.responses.clone())
                .unwrap_or_else(|| state.proposals.clone());

            let replies = self
                .fan_out(&request.participants, &limits, |spec| {
                    debate_prompt(&request.requirement, &pool, &spec.id)
                })
                .await;

            let stage = format!("debate_round_{}", round);
            let mut responses = BTreeMap::new();
            for (spec, reply) in request.participants.iter().zip(replies) {
                let entry = state.record(&stage, &spec.id, reply);
                responses.insert(spec.id.clone(), entry);
            }
            state.debates.push(DebateRound { round, responses });
            info!(run_id = %run_id, round, failures = state.errors.len(), "Debate round complete");
        }

        // Synthesis stage
        let prompt = synthesis_prompt(&request.requirement, &state.proposals, &state.debates);
        let reply = self.gateway.call(synthesizer, &prompt, &limits).await;
        let synthesis = state.record("synthesis", &synthesizer.id, reply);

        let finished_at = Utc::now();
        let report = BrainstormReport {
            run_id,
            requirement: request.requirement.clone(),
            participants: request.participants.iter().map(|p| p.id.clone()).collect(),
            debate_rounds: rounds,
            synthesis_by: synthesizer.id.clone(),
            proposals: state.proposals,
            debates: state.debates,
            synthesis,
            errors: state.errors,
            started_at,
            finished_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            run_id = %report.run_id,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Brainstorm finished"
        );
        Ok(report)
    }

    /// Call every participant with its own prompt, at most
    /// `max_concurrent` at a time. Replies come back in participant order.
    async fn fan_out<F>(
        &self,
        participants: &[ModelSpec],
        limits: &CallLimits,
        prompt_for: F,
    ) -> Vec<GatewayReply>
    where
        F: Fn(&ModelSpec) -> String,
    {
        let width = self.config.max_concurrent.max(1);
        let gateway = &self.gateway;
        // Built up front so the stream holds plain boxed futures, not the closure.
        let calls: Vec<_> = participants
            .iter()
            .map(|spec| {
                let prompt = prompt_for(spec);
                async move { gateway.call(spec, &prompt, limits).await }.boxed()
            })
            .collect();
        stream::iter(calls).buffered(width).collect().await
    }
}

/// Clamp a requested debate-round count into `0..=MAX_DEBATE_ROUNDS`.
pub fn clamp_debate_rounds(requested: i64) -> u32 {
    requested.clamp(0, i64::from(MAX_DEBATE_ROUNDS)) as u32
}

/// The participant whose id matches `synthesis_by`, else the first one.
fn resolve_synthesizer<'a>(
    participants: &'a [ModelSpec],
    synthesis_by: Option<&str>,
) -> &'a ModelSpec {
    synthesis_by
        .map(str::trim)
        .and_then(|id| participants.iter().find(|p| p.id == id))
        .unwrap_or(&participants[0])
}

fn debate_prompt(requirement: &str, pool: &BTreeMap<String, String>, own_id: &str) -> String {
    let others: Vec<String> = pool
        .iter()
        .filter(|(id, _)| id.as_str() != own_id)
        .map(|(id, text)| format!("### {}\n{}", id, text))
        .collect();
    let others = if others.is_empty() {
        "(no other proposals)".to_string()
    } else {
        others.join("\n\n")
    };
    format!(
        "{}\n\n## Requirement\n{}\n\n## Other proposals\n{}",
        DEBATE_INSTRUCTION, requirement, others
    )
}

fn synthesis_prompt(
    requirement: &str,
    proposals: &BTreeMap<String, String>,
    debates: &[DebateRound],
) -> String {
    let mut prompt = format!(
        "{}\n\n## Requirement\n{}\n\n## Proposals",
        SYNTHESIS_INSTRUCTION, requirement
    );
    for (id, text) in proposals {
        prompt.push_str(&format!("\n\n### {}\n{}", id, text));
    }
    if debates.is_empty() {
        prompt.push_str("\n\n## Debate\n(no debate rounds)");
    }
    for debate in debates {
        prompt.push_str(&format!("\n\n## Debate round {}", debate.round));
        for (id, text) in &debate.responses {
            prompt.push_str(&format!("\n\n### {}\n{}", id, text));
        }
    }
    prompt
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Inputs of one brainstorm call.
#[derive(Debug, Clone)]
pub struct BrainstormRequest {
    /// Free-text requirement.
    pub requirement: String,
    /// Ordered participants; must be non-empty.
    pub participants: Vec<ModelSpec>,
    /// Requested rounds; clamped to `0..=5`.
    pub debate_rounds: i64,
    /// Synthesizer id; falls back to the first participant.
    pub synthesis_by: Option<String>,
    /// Limits applied to every call.
    pub limits: CallLimits,
}

impl BrainstormRequest {
    fn validate(&self) -> Result<()> {
        if self.requirement.trim().is_empty() {
            return Err(Error::InvalidParams("requirement must not be empty".into()));
        }
        if self.participants.is_empty() {
            return Err(Error::InvalidParams("participants must not be empty".into()));
        }
        for spec in &self.participants {
            spec.validate()?;
        }
        Ok(())
    }
}

/// Working data of one brainstorm; dropped when the call returns.
#[derive(Debug, Default)]
pub struct BrainstormState {
    /// Participant id → proposal text (or tagged failure).
    pub proposals: BTreeMap<String, String>,
    /// Debate history, oldest first.
    pub debates: Vec<DebateRound>,
    /// Labeled failures in the order they happened.
    pub errors: Vec<String>,
}

impl BrainstormState {
    /// Turn a reply into its map entry, logging failures.
    fn record(&mut self, stage: &str, participant: &str, reply: GatewayReply) -> String {
        if reply.is_success() {
            return reply.text.trim().to_string();
        }
        warn!(stage, participant, code = reply.code, "Participant call failed");
        self.errors.push(format!(
            "{}:{}: code={}: {}",
            stage,
            participant,
            reply.code,
            truncate_chars(&reply.text, MAX_ERROR_DETAIL_CHARS)
        ));
        format!("[FAILED code={}] {}", reply.code, reply.text)
    }
}

/// Responses of one debate round.
#[derive(Debug, Clone, Serialize)]
pub struct DebateRound {
    /// 1-based round number.
    pub round: u32,
    /// Participant id → critique text (or tagged failure).
    pub responses: BTreeMap<String, String>,
}

/// Everything a brainstorm produced.
#[derive(Debug, Clone, Serialize)]
pub struct BrainstormReport {
    pub run_id: String,
    pub requirement: String,
    pub participants: Vec<String>,
    pub debate_rounds: u32,
    pub synthesis_by: String,
    pub proposals: BTreeMap<String, String>,
    pub debates: Vec<DebateRound>,
    pub synthesis: String,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BrainstormReport {
    /// True iff any call in any stage failed.
    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum participant calls in flight within one stage.
    pub max_concurrent: usize,
    /// Limits used when a tool call omits them.
    pub default_limits: CallLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            default_limits: CallLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Provider;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Gateway that answers by stage and fails for chosen ids.
    #[derive(Default)]
    struct ScriptedGateway {
        calls: Mutex<Vec<(String, String)>>,
        fail_ids: Vec<String>,
    }

    impl ScriptedGateway {
        fn failing(ids: &[&str]) -> Self {
            Self {
                fail_ids: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn call(&self, spec: &ModelSpec, prompt: &str, _limits: &CallLimits) -> GatewayReply {
            self.calls
                .lock()
                .unwrap()
                .push((spec.id.clone(), prompt.to_string()));
            if self.fail_ids.contains(&spec.id) {
                return GatewayReply::failure(503, format!("{} is down", spec.id));
            }
            let kind = if prompt.starts_with(PROPOSAL_INSTRUCTION) {
                "proposal"
            } else if prompt.starts_with(DEBATE_INSTRUCTION) {
                "critique"
            } else {
                "synthesis"
            };
            GatewayReply::ok(format!("  {} from {}  ", kind, spec.id))
        }
    }

    fn participant(id: &str) -> ModelSpec {
        ModelSpec {
            id: id.into(),
            provider: Provider::Custom,
            model: "m".into(),
            api_url: Some("http://localhost".into()),
            api_key: None,
            system_prompt: None,
        }
    }

    fn request(ids: &[&str], rounds: i64) -> BrainstormRequest {
        BrainstormRequest {
            requirement: "Design a cache".into(),
            participants: ids.iter().map(|id| participant(id)).collect(),
            debate_rounds: rounds,
            synthesis_by: None,
            limits: CallLimits::default(),
        }
    }

    #[test]
    fn test_clamp_debate_rounds() {
        let clamped: Vec<u32> = [-1, 0, 5, 7].into_iter().map(clamp_debate_rounds).collect();
        assert_eq!(clamped, vec![0, 0, 5, 5]);
    }

    #[tokio::test]
    async fn test_three_participants_one_round() {
        let gateway = Arc::new(ScriptedGateway::default());
        let orch = AgentOrchestrator::new(gateway.clone());

        let report = orch.brainstorm(request(&["A", "B", "C"], 1)).await.unwrap();

        assert_eq!(report.proposals.len(), 3);
        assert_eq!(report.proposals["B"], "proposal from B");
        assert_eq!(report.debates.len(), 1);
        assert_eq!(report.debates[0].round, 1);
        assert_eq!(report.debates[0].responses.len(), 3);
        assert_eq!(report.synthesis, "synthesis from A");
        assert!(!report.is_error());

        let calls = gateway.calls();
        assert_eq!(calls.len(), 3 + 3 + 1);

        // Debate prompts never include the acting participant's own proposal.
        for (id, prompt) in &calls[3..6] {
            assert!(prompt.starts_with(DEBATE_INSTRUCTION));
            assert!(!prompt.contains(&format!("proposal from {}", id)));
            for other in ["A", "B", "C"].iter().filter(|o| *o != id) {
                assert!(prompt.contains(&format!("proposal from {}", other)));
            }
        }
    }

    #[tokio::test]
    async fn test_proposal_failure_is_isolated() {
        let gateway = Arc::new(ScriptedGateway::failing(&["B"]));
        let orch = AgentOrchestrator::new(gateway);

        let report = orch.brainstorm(request(&["A", "B", "C"], 0)).await.unwrap();

        assert!(report.proposals["B"].starts_with("[FAILED code=503]"));
        assert_eq!(report.proposals["A"], "proposal from A");
        assert_eq!(report.proposals["C"], "proposal from C");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("proposal:B:"));
        assert!(report.is_error());
        assert_eq!(report.synthesis, "synthesis from A");
    }

    #[tokio::test]
    async fn test_zero_rounds_skips_debate() {
        let gateway = Arc::new(ScriptedGateway::default());
        let orch = AgentOrchestrator::new(gateway.clone());

        let report = orch.brainstorm(request(&["A", "B"], -3)).await.unwrap();

        assert_eq!(report.debate_rounds, 0);
        assert!(report.debates.is_empty());
        assert_eq!(gateway.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_second_round_reads_first_round_output() {
        let gateway = Arc::new(ScriptedGateway::default());
        let orch = AgentOrchestrator::new(gateway.clone());

        let report = orch.brainstorm(request(&["A", "B"], 2)).await.unwrap();
        assert_eq!(report.debates.len(), 2);

        let calls = gateway.calls();
        let (id, round_two_prompt) = &calls[4];
        assert_eq!(id, "A");
        assert!(round_two_prompt.contains("critique from B"));
        assert!(!round_two_prompt.contains("proposal from B"));
        assert!(!round_two_prompt.contains("critique from A"));
    }

    #[tokio::test]
    async fn test_synthesis_participant_resolution() {
        let gateway = Arc::new(ScriptedGateway::default());
        let orch = AgentOrchestrator::new(gateway.clone());

        let mut req = request(&["A", "B"], 0);
        req.synthesis_by = Some("B".into());
        let report = orch.brainstorm(req).await.unwrap();
        assert_eq!(report.synthesis_by, "B");
        assert_eq!(report.synthesis, "synthesis from B");

        let mut req = request(&["A", "B"], 0);
        req.synthesis_by = Some("nobody".into());
        let report = orch.brainstorm(req).await.unwrap();
        assert_eq!(report.synthesis_by, "A");
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_logged() {
        let gateway = Arc::new(ScriptedGateway::failing(&["A"]));
        let orch = AgentOrchestrator::new(gateway);

        let report = orch.brainstorm(request(&["A", "B"], 1)).await.unwrap();
        assert!(report.synthesis.starts_with("[FAILED"));
        assert!(report.errors.iter().any(|e| e.starts_with("debate_round_1:A:")));
        assert!(report.errors.last().unwrap().starts_with("synthesis:A:"));
    }

    #[tokio::test]
    async fn test_concurrent_fan_out_keeps_order() {
        let gateway = Arc::new(ScriptedGateway::failing(&["C"]));
        let config = OrchestratorConfig {
            max_concurrent: 4,
            ..Default::default()
        };
        let orch = AgentOrchestrator::with_config(gateway, config);

        let report = orch.brainstorm(request(&["A", "B", "C", "D"], 1)).await.unwrap();
        assert_eq!(report.participants, vec!["A", "B", "C", "D"]);
        assert_eq!(report.proposals.len(), 4);
        assert_eq!(report.debates[0].responses.len(), 4);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let orch = AgentOrchestrator::new(Arc::new(ScriptedGateway::default()));

        let err = orch.brainstorm(request(&[], 1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));

        let mut req = request(&["A"], 1);
        req.requirement = "   ".into();
        assert!(orch.brainstorm(req).await.is_err());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("ééé", 2), "éé...");
    }
}
