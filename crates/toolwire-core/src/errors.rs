//! Error types for the tool-call normalization layer and the turn loop
//!
//! Two layers of failure exist. `AgentError` covers faults raised by the
//! collaborators and the configuration surface (transport, registry, tool
//! lookup, config parsing). `AbortedError` is the single terminal value a caller
//! of `Agent::run_turn` ever sees when a turn does not end with a final answer.
//! Recoverable problems (malformed tool-call payloads, tool failures, repeated
//! calls) never become errors at all; they are folded back into the
//! conversation so the model can correct itself.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Transport request failed: {0}")]
    TransportError(String),
    #[error("No tool-calling mode configured for model '{0}' and no default mode set")]
    UnknownProviderMode(String),
    #[error("Tool execution failed for '{tool_name}': {message}")]
    ToolError { tool_name: String, message: String },
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::TransportError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::ConfigError(format!("Failed to parse YAML config: {}", err))
    }
}

/// Why a turn ended without a final answer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbortReason {
    #[error("turn ceiling of {max_turns} model round-trips exceeded")]
    TurnCeilingExceeded { max_turns: usize },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("cancelled by caller")]
    Cancelled,
    #[error("internal failure: {0}")]
    Internal(String),
}

/// Terminal failure of `Agent::run_turn`.
#[derive(Error, Debug, Clone)]
#[error("agent turn aborted after {turns} model round-trips: {reason}")]
pub struct AbortedError {
    pub reason: AbortReason,
    pub turns: usize,
    /// Digests of the most recent call fingerprints, oldest first.
    pub recent_fingerprints: Vec<String>,
}

impl AbortedError {
    pub fn new(reason: AbortReason, turns: usize, recent_fingerprints: Vec<String>) -> Self {
        Self {
            reason,
            turns,
            recent_fingerprints,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.reason, AbortReason::Cancelled)
    }

    pub fn last_fingerprint(&self) -> Option<&str> {
        self.recent_fingerprints.last().map(|s| s.as_str())
    }
}

impl From<AgentError> for AbortReason {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::TransportError(msg) => AbortReason::Transport(msg),
            other => AbortReason::Internal(other.to_string()),
        }
    }
}
