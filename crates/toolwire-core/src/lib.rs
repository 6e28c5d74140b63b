//! Tool-call protocol normalization and turn orchestration for LLM agents.
//!
//! Model providers disagree on how a model asks for a tool: some return a
//! structured tool-call array, some return content blocks, and text-only models
//! emit JSON or a labeled call somewhere in their prose. This crate folds all of
//! them into one normalized vocabulary and drives the model/tool loop on top of
//! it.
//!
//! # Architecture Overview
//!
//! - **Capabilities**: model identifier to tool-calling mode and limits
//! - **Extraction**: one pure extractor per mode, raw response to invocations
//! - **Encoding**: tool outcomes back into provider-shaped history
//! - **Memory**: append-only history plus the consecutive-call loop ledger
//! - **Agent**: the turn state machine with loop detection, a turn ceiling,
//!   cancellation and an event hook
//! - **Transport and tools**: the collaborator seams, with HTTP and registry
//!   implementations

pub mod agent;
pub mod capabilities;
pub mod config;
pub mod core_types;
pub mod encoding;
pub mod errors;
pub mod extraction;
pub mod llm;
pub mod loop_detection;
pub mod memory;
pub mod tools;
pub mod trace;

pub use agent::{Agent, AgentConfig, AgentState, FinalAnswer};
pub use capabilities::{Capability, CapabilityLimits, CapabilityRegistry, ToolCallingMode};
pub use config::*;
pub use core_types::{
    ConversationMessage, MessageContent, RawOrigin, RawResponse, Role, ToolInvocation,
    ToolOutcome, ToolSpec,
};
pub use errors::{AbortReason, AbortedError, AgentError};
pub use extraction::{detect_mode, extract, Extraction, ExtractionDiagnostic};
pub use llm::{HttpTransport, Transport};
pub use memory::ConversationMemory;
pub use tools::{Tool, ToolExecutor, ToolFactory, ToolRegistry};
pub use trace::{AgentEvent, ChannelEventSink, EventSink, LogEventSink};
