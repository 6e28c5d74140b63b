use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{Capability, CapabilityRegistry, ToolCallingMode};
use crate::config::AgentSection;
use crate::core_types::{
    ConversationMessage, ToolFailureKind, ToolInvocation, ToolOutcome, ToolSpec,
};
use crate::encoding::{encode, tool_instructions};
use crate::errors::{AbortReason, AbortedError, AgentError};
use crate::extraction::extract;
use crate::llm::Transport;
use crate::loop_detection::CallFingerprint;
use crate::memory::ConversationMemory;
use crate::tools::{ArgumentValidator, ToolExecutor};
use crate::trace::{AgentEvent, EventSink};

/// Fingerprints reported on an aborted turn.
const ABORT_FINGERPRINTS: usize = 5;

const LOOP_DETECTED_MESSAGE: &str = "loop detected, forcing final answer";

const LOOP_NUDGE: &str = "You have repeated the same tool call several times without making \
progress. Do not call that tool again. Give your final answer now using the results you \
already have.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard ceiling on model round-trips per `run_turn`.
    pub max_turns: usize,
    /// Consecutive identical calls tolerated before interception.
    pub loop_ceiling: usize,
    pub system_prompt: Option<String>,
    /// The caller asserts its tools are independent of each other.
    pub parallel_tool_execution: bool,
    pub validate_arguments: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            loop_ceiling: 3,
            system_prompt: None,
            parallel_tool_execution: false,
            validate_arguments: true,
        }
    }
}

impl From<&AgentSection> for AgentConfig {
    fn from(section: &AgentSection) -> Self {
        Self {
            max_turns: section.max_turns,
            loop_ceiling: section.loop_ceiling,
            system_prompt: section.system_prompt.clone(),
            parallel_tool_execution: section.parallel_tool_execution,
            validate_arguments: section.validate_arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    AwaitingModel,
    HaveInvocations,
    ExecutingTools,
    AwaitingModelAgain,
    Done,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    /// Model round-trips it took to get here.
    pub turns: usize,
}

/// Drives one conversation through the model/tool loop.
///
/// Memory and the loop ledger belong to this instance alone; independent
/// agents can run concurrently without sharing anything.
pub struct Agent {
    transport: Arc<dyn Transport>,
    executor: Arc<dyn ToolExecutor>,
    capability: Capability,
    tools: Vec<ToolSpec>,
    validator: ArgumentValidator,
    system_prompt: Option<String>,
    memory: ConversationMemory,
    config: AgentConfig,
    state: AgentState,
    event_sink: Option<Arc<dyn EventSink>>,
    cancellation: CancellationToken,
}

impl Agent {
    /// Resolves the tool-calling mode for `model` up front, so a registry
    /// without a default fails here rather than mid-conversation.
    pub fn new(
        transport: Arc<dyn Transport>,
        executor: Arc<dyn ToolExecutor>,
        registry: &CapabilityRegistry,
        model: &str,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        let capability = registry.resolve(model)?;
        Self::with_capability(transport, executor, capability, config)
    }

    pub fn with_capability(
        transport: Arc<dyn Transport>,
        executor: Arc<dyn ToolExecutor>,
        capability: Capability,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        if config.max_turns == 0 {
            return Err(AgentError::ValidationError(
                "max_turns must be at least 1".to_string(),
            ));
        }
        if config.loop_ceiling == 0 {
            return Err(AgentError::ValidationError(
                "loop_ceiling must be at least 1".to_string(),
            ));
        }

        let tools = executor.tool_specs();
        let validator = if config.validate_arguments {
            ArgumentValidator::new(&tools)
        } else {
            ArgumentValidator::default()
        };

        let system_prompt = match (
            config.system_prompt.clone(),
            tool_instructions(capability.mode, &tools),
        ) {
            (Some(base), Some(instructions)) => Some(format!("{}\n\n{}", base, instructions)),
            (base, instructions) => base.or(instructions),
        };

        let validated = tools
            .iter()
            .filter(|tool| validator.covers(&tool.name))
            .count();
        log::info!(
            "Agent created: mode={}, {} tool(s) ({} schema-validated), max_turns={}, loop_ceiling={}",
            capability.mode,
            tools.len(),
            validated,
            config.max_turns,
            config.loop_ceiling
        );

        Ok(Self {
            transport,
            executor,
            capability,
            tools,
            validator,
            system_prompt,
            memory: ConversationMemory::new(),
            config,
            state: AgentState::AwaitingModel,
            event_sink: None,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn mode(&self) -> ToolCallingMode {
        self.capability.mode
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
        self.state = AgentState::AwaitingModel;
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs the loop for one user message until the model answers in plain
    /// text or the turn is aborted. History is kept across calls.
    pub async fn run_turn(&mut self, user_message: &str) -> Result<FinalAnswer, AbortedError> {
        log::info!("Agent turn started ({} mode)", self.capability.mode);

        self.memory.clear_ledger();
        if self.memory.is_empty() {
            if let Some(prompt) = &self.system_prompt {
                self.memory.append(ConversationMessage::system(prompt.clone()));
            }
        }
        self.memory.append(ConversationMessage::user(user_message));
        self.state = AgentState::AwaitingModel;

        let mut turns = 0;
        loop {
            if self.cancellation.is_cancelled() {
                return Err(self.abort(AbortReason::Cancelled, turns));
            }

            turns += 1;
            log::info!("Agent round-trip #{}", turns);
            self.emit(AgentEvent::ModelRequestSent {
                turn: turns,
                message_count: self.memory.len(),
                tool_count: self.tools.len(),
            });

            let response = tokio::select! {
                _ = self.cancellation.cancelled() => None,
                response = self.transport.send(self.memory.history(), &self.tools) => Some(response),
            };
            let raw = match response {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Err(self.abort(AbortReason::from(e), turns)),
                None => return Err(self.abort(AbortReason::Cancelled, turns)),
            };

            let extraction = extract(self.capability.mode, &raw, &self.tools, &self.capability.limits);
            self.emit(AgentEvent::InvocationsExtracted {
                turn: turns,
                count: extraction.invocations.len(),
                diagnostics: extraction.diagnostics.clone(),
            });

            if !extraction.has_invocations() {
                let text = extraction.final_text.unwrap_or_default();
                log::info!("Final answer after {} round-trip(s)", turns);
                self.memory.append(ConversationMessage::assistant(text.clone()));
                self.emit(AgentEvent::FinalAnswer {
                    turn: turns,
                    length: text.len(),
                });
                self.state = AgentState::Done;
                return Ok(FinalAnswer { text, turns });
            }

            // Past this point every recorded call gets a result in history,
            // so cancellation is only honoured before the calls are recorded.
            if self.cancellation.is_cancelled() {
                return Err(self.abort(AbortReason::Cancelled, turns));
            }

            self.state = AgentState::HaveInvocations;
            let invocations = extraction.invocations;
            self.memory.append(ConversationMessage::assistant_tool_calls(
                extraction.final_text,
                invocations.clone(),
            ));

            let (mut outcomes, looped) = self.screen_invocations(&invocations, turns);

            self.state = AgentState::ExecutingTools;
            self.execute_pending(&invocations, &mut outcomes, turns).await;

            for (invocation, outcome) in invocations.iter().zip(outcomes) {
                let outcome = outcome.unwrap_or_else(|| {
                    ToolOutcome::failure(
                        &invocation.call_id,
                        ToolFailureKind::Execution,
                        "tool produced no outcome",
                    )
                });
                self.memory
                    .append(encode(self.capability.mode, invocation, &outcome));
            }

            if looped {
                self.memory.append(ConversationMessage::system(LOOP_NUDGE));
            }

            if turns >= self.config.max_turns {
                log::error!(
                    "Turn ceiling of {} reached with tool work still pending",
                    self.config.max_turns
                );
                self.emit(AgentEvent::TurnCeilingHit { turns });
                return Err(self.abort(
                    AbortReason::TurnCeilingExceeded {
                        max_turns: self.config.max_turns,
                    },
                    turns,
                ));
            }

            self.state = AgentState::AwaitingModelAgain;
        }
    }

    /// Records every invocation in the loop ledger and validates its arguments.
    /// Slots left `None` are the ones that still need to run.
    fn screen_invocations(
        &mut self,
        invocations: &[ToolInvocation],
        turn: usize,
    ) -> (Vec<Option<ToolOutcome>>, bool) {
        let mut outcomes = Vec::with_capacity(invocations.len());
        let mut looped = false;

        for invocation in invocations {
            let fingerprint = CallFingerprint::of(invocation);
            let count = self.memory.record_call(&fingerprint);

            if count > self.config.loop_ceiling {
                log::warn!(
                    "Loop detected: {} called {} times in a row with identical arguments",
                    invocation.tool_name,
                    count
                );
                self.emit(AgentEvent::LoopCeilingHit {
                    turn,
                    tool_name: invocation.tool_name.clone(),
                    count,
                    fingerprint: fingerprint.digest(),
                });
                looped = true;
                outcomes.push(Some(ToolOutcome::failure(
                    &invocation.call_id,
                    ToolFailureKind::LoopDetected,
                    LOOP_DETECTED_MESSAGE,
                )));
                continue;
            }

            if let Err(message) = self
                .validator
                .validate(&invocation.tool_name, &invocation.arguments_value())
            {
                log::warn!("{}", message);
                outcomes.push(Some(ToolOutcome::failure(
                    &invocation.call_id,
                    ToolFailureKind::InvalidArguments,
                    message,
                )));
                continue;
            }

            outcomes.push(None);
        }

        (outcomes, looped)
    }

    async fn execute_pending(
        &mut self,
        invocations: &[ToolInvocation],
        outcomes: &mut [Option<ToolOutcome>],
        turn: usize,
    ) {
        let pending: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_none())
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            return;
        }

        let executor = Arc::clone(&self.executor);
        let parallel = self.capability.limits.parallel_calls
            && self.config.parallel_tool_execution
            && pending.len() > 1;

        let results: Vec<ToolOutcome> = if parallel {
            log::debug!("Executing {} tool call(s) concurrently", pending.len());
            join_all(
                pending
                    .iter()
                    .map(|&index| run_invocation(executor.as_ref(), &invocations[index])),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(pending.len());
            for &index in &pending {
                results.push(run_invocation(executor.as_ref(), &invocations[index]).await);
            }
            results
        };

        for (index, outcome) in pending.into_iter().zip(results) {
            let invocation = &invocations[index];
            self.emit(AgentEvent::ToolExecuted {
                turn,
                call_id: invocation.call_id.clone(),
                tool_name: invocation.tool_name.clone(),
                success: !outcome.is_error(),
            });
            outcomes[index] = Some(outcome);
        }
    }

    fn abort(&mut self, reason: AbortReason, turns: usize) -> AbortedError {
        log::error!("Agent turn aborted after {} round-trip(s): {}", turns, reason);
        self.emit(AgentEvent::Aborted {
            reason: reason.to_string(),
        });
        self.state = AgentState::Aborted;
        AbortedError::new(
            reason,
            turns,
            self.memory.recent_fingerprints(ABORT_FINGERPRINTS),
        )
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(sink) = &self.event_sink {
            sink.emit(event);
        }
    }
}

/// Runs one invocation, folding executor faults into an error outcome.
async fn run_invocation(executor: &dyn ToolExecutor, invocation: &ToolInvocation) -> ToolOutcome {
    log::info!("Executing tool: {} ({})", invocation.tool_name, invocation.call_id);
    match executor.run(invocation).await {
        Ok(outcome) => {
            if let Some(failure) = &outcome.error {
                log::warn!("Tool {} failed: {}", invocation.tool_name, failure.message);
            }
            outcome
        }
        Err(AgentError::ToolNotFound(name)) => {
            log::warn!("Model called unknown tool '{}'", name);
            ToolOutcome::failure(
                &invocation.call_id,
                ToolFailureKind::NotFound,
                format!("Tool '{}' does not exist", name),
            )
        }
        Err(e) => {
            log::error!("Tool {} raised an unexpected error: {}", invocation.tool_name, e);
            ToolOutcome::failure(&invocation.call_id, ToolFailureKind::Execution, e.to_string())
        }
    }
}
