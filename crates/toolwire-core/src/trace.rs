// src/trace.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::extraction::ExtractionDiagnostic;

/// One state transition of the turn loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    ModelRequestSent {
        turn: usize,
        message_count: usize,
        tool_count: usize,
    },
    InvocationsExtracted {
        turn: usize,
        count: usize,
        diagnostics: Vec<ExtractionDiagnostic>,
    },
    ToolExecuted {
        turn: usize,
        call_id: String,
        tool_name: String,
        success: bool,
    },
    LoopCeilingHit {
        turn: usize,
        tool_name: String,
        count: usize,
        fingerprint: String,
    },
    TurnCeilingHit {
        turns: usize,
    },
    FinalAnswer {
        turn: usize,
        length: usize,
    },
    Aborted {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl TimedEvent {
    pub fn now(event: AgentEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Receives loop events. Implementations must return promptly and must not
/// fail; the loop never waits on or inspects a sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Writes every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: AgentEvent) {
        match &event {
            AgentEvent::LoopCeilingHit { .. } | AgentEvent::TurnCeilingHit { .. } => {
                log::warn!("[event] {:?}", event)
            }
            AgentEvent::Aborted { .. } => log::error!("[event] {:?}", event),
            _ => log::info!("[event] {:?}", event),
        }
    }
}

/// Forwards timestamped events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<TimedEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::UnboundedSender<TimedEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: AgentEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(TimedEvent::now(event));
    }
}
