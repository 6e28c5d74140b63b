use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolwire_core::agent::{Agent, AgentConfig, AgentState};
use toolwire_core::capabilities::{Capability, CapabilityRegistry, ToolCallingMode};
use toolwire_core::core_types::{ConversationMessage, MessageContent, RawResponse, Role, ToolSpec};
use toolwire_core::encoding::render_for_provider;
use toolwire_core::errors::{AbortReason, AgentError};
use toolwire_core::llm::Transport;
use toolwire_core::tools::{Tool, ToolRegistry};
use toolwire_core::trace::{AgentEvent, ChannelEventSink, EventSink};

/// Replays canned completions in the given mode, then keeps asking for a new
/// distinct tool call once the script runs out.
struct MockTransport {
    mode: ToolCallingMode,
    script: Mutex<VecDeque<RawResponse>>,
    requests: AtomicUsize,
    seen_history_lengths: Mutex<Vec<usize>>,
}

impl MockTransport {
    fn new(mode: ToolCallingMode, script: Vec<RawResponse>) -> Arc<Self> {
        Arc::new(Self {
            mode,
            script: Mutex::new(script.into()),
            requests: AtomicUsize::new(0),
            seen_history_lengths: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        history: &[ConversationMessage],
        _tools: &[ToolSpec],
    ) -> Result<RawResponse, AgentError> {
        // Behave like a real network call and give other tasks a chance to run.
        tokio::task::yield_now().await;
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen_history_lengths.lock().unwrap().push(history.len());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(RawResponse::from_text(
            self.mode,
            format!("[FUNCTION_CALL] add(a={}, b=1) [/FUNCTION_CALL]", n),
        ))
    }
}

struct AddTool {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for AddTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value, AgentError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let a = arguments["a"].as_i64().unwrap_or_default();
        let b = arguments["b"].as_i64().unwrap_or_default();
        Ok(json!(a + b))
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registry() -> CapabilityRegistry {
    CapabilityRegistry::builder()
        .exact("scripted-native", Capability::new(ToolCallingMode::NativeOpenAi))
        .exact("scripted-text", Capability::new(ToolCallingMode::TextPattern))
        .default_capability(Capability::new(ToolCallingMode::TextPattern))
        .build()
}

fn build_agent(
    model: &str,
    transport: Arc<MockTransport>,
    config: AgentConfig,
) -> (Agent, Arc<AtomicUsize>) {
    let executions = Arc::new(AtomicUsize::new(0));
    let tools = ToolRegistry::new().with_tool(Arc::new(AddTool {
        executions: Arc::clone(&executions),
    }));
    let agent = Agent::new(transport, Arc::new(tools), &registry(), model, config).unwrap();
    (agent, executions)
}

fn openai_call(id: &str, name: &str, args: Value) -> RawResponse {
    RawResponse::new(
        ToolCallingMode::NativeOpenAi,
        json!({"choices": [{"message": {"role": "assistant", "tool_calls": [
            {"id": id, "type": "function", "function": {"name": name, "arguments": args.to_string()}}
        ]}}]}),
    )
}

fn openai_answer(text: &str) -> RawResponse {
    RawResponse::new(
        ToolCallingMode::NativeOpenAi,
        json!({"choices": [{"message": {"role": "assistant", "content": text}}]}),
    )
}

#[tokio::test]
async fn text_pattern_conversation_reaches_final_answer() {
    init_logging();
    let transport = MockTransport::new(
        ToolCallingMode::TextPattern,
        vec![
            RawResponse::from_text(
                ToolCallingMode::TextPattern,
                r#"I think I should check... {"name":"add","parameters":{"a":2,"b":3}}"#,
            ),
            RawResponse::from_text(ToolCallingMode::TextPattern, "The answer is 5."),
        ],
    );
    let (mut agent, executions) = build_agent("scripted-text", transport.clone(), AgentConfig::default());
    assert_eq!(agent.mode(), ToolCallingMode::TextPattern);

    let answer = agent.run_turn("What is 2 + 3?").await.unwrap();

    assert_eq!(answer.text, "The answer is 5.");
    assert_eq!(answer.turns, 2);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let history = agent.memory().history();
    assert_eq!(history[0].role, Role::System);
    assert!(history[0].text_content().contains("[FUNCTION_CALL]"));
    let result = history
        .iter()
        .find(|m| m.originating_call_id.is_some())
        .unwrap();
    assert_eq!(result.role, Role::User);
    assert_eq!(result.text_content(), "The result of calling add is: 5");
}

#[tokio::test]
async fn plain_text_answer_is_done_without_tools() {
    let transport = MockTransport::new(
        ToolCallingMode::NativeOpenAi,
        vec![openai_answer("The answer is 4.")],
    );
    let (mut agent, executions) = build_agent("scripted-native", transport.clone(), AgentConfig::default());

    let answer = agent.run_turn("2+2").await.unwrap();

    assert_eq!(answer.text, "The answer is 4.");
    assert_eq!(agent.state(), AgentState::Done);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(transport.requests(), 1);
}

#[tokio::test]
async fn fourth_identical_call_is_not_executed() {
    let same = || openai_call("call_1", "add", json!({"a": 1, "b": 1}));
    let transport = MockTransport::new(
        ToolCallingMode::NativeOpenAi,
        vec![same(), same(), same(), same(), openai_answer("It is 2.")],
    );
    let (sink, mut events) = ChannelEventSink::channel();
    let (agent, executions) = build_agent("scripted-native", transport, AgentConfig::default());
    let mut agent = agent.with_event_sink(Arc::new(sink));

    let answer = agent.run_turn("1+1").await.unwrap();

    assert_eq!(answer.text, "It is 2.");
    assert_eq!(executions.load(Ordering::SeqCst), 3);

    let mut loop_hits = Vec::new();
    while let Ok(timed) = events.try_recv() {
        if let AgentEvent::LoopCeilingHit { turn, count, tool_name, .. } = timed.event {
            loop_hits.push((turn, count, tool_name));
        }
    }
    assert_eq!(loop_hits, vec![(4, 4, "add".to_string())]);

    let nudges = agent
        .memory()
        .history()
        .iter()
        .filter(|m| m.role == Role::System)
        .count();
    assert_eq!(nudges, 1);
}

#[tokio::test]
async fn equivalent_arguments_count_as_the_same_call() {
    let transport = MockTransport::new(
        ToolCallingMode::NativeOpenAi,
        vec![
            openai_call("c1", "add", json!({"a": 1, "b": 1})),
            openai_call("c2", "add", json!({"b": 1, "a": 1})),
            openai_call("c3", "add", json!({"a": 1.0, "b": 1})),
            openai_call("c4", "add", json!({"A": 1, "b": 1})),
            openai_answer("2"),
        ],
    );
    let config = AgentConfig {
        validate_arguments: false,
        ..AgentConfig::default()
    };
    let (mut agent, executions) = build_agent("scripted-native", transport, config);

    agent.run_turn("1+1").await.unwrap();
    assert_eq!(executions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn distinct_calls_stop_at_turn_ceiling() {
    init_logging();
    let transport = MockTransport::new(ToolCallingMode::TextPattern, Vec::new());
    let config = AgentConfig {
        max_turns: 4,
        ..AgentConfig::default()
    };
    let (mut agent, executions) = build_agent("scripted-text", transport.clone(), config);

    let err = agent.run_turn("keep going").await.unwrap_err();

    assert_eq!(err.reason, AbortReason::TurnCeilingExceeded { max_turns: 4 });
    assert_eq!(err.turns, 4);
    assert_eq!(err.recent_fingerprints.len(), 4);
    assert_eq!(executions.load(Ordering::SeqCst), 4);
    assert_eq!(transport.requests(), 4);
    assert_eq!(agent.state(), AgentState::Aborted);
}

#[tokio::test]
async fn cancellation_between_turns_is_reported_distinctly() {
    let transport = MockTransport::new(ToolCallingMode::TextPattern, Vec::new());
    let (sink, mut events) = ChannelEventSink::channel();
    let (agent, _) = build_agent("scripted-text", transport, AgentConfig::default());
    let mut agent = agent.with_event_sink(Arc::new(sink));
    let token = agent.cancellation_token();

    // Cancel as soon as the first tool has run.
    let watcher = tokio::spawn(async move {
        while let Some(timed) = events.recv().await {
            if matches!(timed.event, AgentEvent::ToolExecuted { .. }) {
                token.cancel();
            }
        }
    });

    let err = agent.run_turn("keep going").await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.turns >= 1);
    assert!(err.turns < 10);

    drop(agent);
    watcher.await.unwrap();
}

/// Cancels the run synchronously the moment a response with tool calls has
/// been extracted, before any of them is recorded or run.
struct CancelOnInvocations {
    token: CancellationToken,
}

impl EventSink for CancelOnInvocations {
    fn emit(&self, event: AgentEvent) {
        if let AgentEvent::InvocationsExtracted { count, .. } = event {
            if count > 0 {
                self.token.cancel();
            }
        }
    }
}

#[tokio::test]
async fn cancellation_after_extraction_leaves_no_unanswered_calls() {
    let transport = MockTransport::new(
        ToolCallingMode::NativeOpenAi,
        vec![openai_call("call_1", "add", json!({"a": 1, "b": 2}))],
    );
    let (agent, executions) = build_agent("scripted-native", transport, AgentConfig::default());
    let token = agent.cancellation_token();
    let mut agent = agent.with_event_sink(Arc::new(CancelOnInvocations { token }));

    let err = agent.run_turn("1+2").await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.turns, 1);
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    let history = agent.memory().history();
    assert!(history
        .iter()
        .all(|m| !matches!(m.content, MessageContent::ToolCalls { .. })));
    assert_eq!(history.last().unwrap().role, Role::User);

    let rendered = render_for_provider(ToolCallingMode::NativeOpenAi, history);
    let messages = rendered["messages"].as_array().unwrap();
    assert!(messages.iter().all(|m| m.get("tool_calls").is_none()));
}

/// Records when each call starts and finishes, sleeping for `delay` in between.
struct TimedTool {
    name: &'static str,
    delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for TimedTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name, "Waits, then echoes its name", json!({"type": "object"}))
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, AgentError> {
        self.log.lock().unwrap().push(format!("start {}", self.name));
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push(format!("end {}", self.name));
        Ok(json!(self.name))
    }
}

fn two_call_response() -> RawResponse {
    RawResponse::new(
        ToolCallingMode::NativeOpenAi,
        json!({"choices": [{"message": {"role": "assistant", "tool_calls": [
            {"id": "call_slow", "type": "function", "function": {"name": "slow", "arguments": "{}"}},
            {"id": "call_fast", "type": "function", "function": {"name": "fast", "arguments": "{}"}}
        ]}}]}),
    )
}

async fn run_timed_pair(parallel: bool) -> (Vec<String>, Vec<String>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let tools = ToolRegistry::new()
        .with_tool(Arc::new(TimedTool {
            name: "slow",
            delay: Duration::from_millis(50),
            log: Arc::clone(&log),
        }))
        .with_tool(Arc::new(TimedTool {
            name: "fast",
            delay: Duration::from_millis(1),
            log: Arc::clone(&log),
        }));
    let transport = MockTransport::new(
        ToolCallingMode::NativeOpenAi,
        vec![two_call_response(), openai_answer("both done")],
    );
    let config = AgentConfig {
        parallel_tool_execution: parallel,
        ..AgentConfig::default()
    };
    let mut agent = Agent::with_capability(
        transport,
        Arc::new(tools),
        Capability::new(ToolCallingMode::NativeOpenAi).with_parallel_calls(true),
        config,
    )
    .unwrap();

    let answer = agent.run_turn("run both").await.unwrap();
    assert_eq!(answer.text, "both done");

    let result_order = agent
        .memory()
        .history()
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::ToolResult { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();
    let timeline = log.lock().unwrap().clone();
    (timeline, result_order)
}

#[tokio::test]
async fn independent_calls_overlap_but_results_keep_model_order() {
    let (timeline, result_order) = run_timed_pair(true).await;

    assert_eq!(timeline, vec!["start slow", "start fast", "end fast", "end slow"]);
    assert_eq!(result_order, vec!["call_slow", "call_fast"]);
}

#[tokio::test]
async fn calls_run_one_at_a_time_without_parallel_opt_in() {
    let (timeline, result_order) = run_timed_pair(false).await;

    assert_eq!(timeline, vec!["start slow", "end slow", "start fast", "end fast"]);
    assert_eq!(result_order, vec!["call_slow", "call_fast"]);
}

#[tokio::test]
async fn unknown_tool_is_fed_back_as_error() {
    let transport = MockTransport::new(
        ToolCallingMode::NativeOpenAi,
        vec![
            openai_call("call_9", "subtract", json!({"a": 5, "b": 2})),
            openai_answer("I cannot subtract."),
        ],
    );
    let (mut agent, _) = build_agent("scripted-native", transport.clone(), AgentConfig::default());

    let answer = agent.run_turn("5-2").await.unwrap();
    assert_eq!(answer.text, "I cannot subtract.");

    let result = agent
        .memory()
        .history()
        .iter()
        .find_map(|m| match &m.content {
            MessageContent::ToolResult { call_id, payload, is_error, .. } => {
                Some((call_id.clone(), payload.clone(), *is_error))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(result.0, "call_9");
    assert!(result.2);
    assert!(result.1.contains("subtract"));

    // The model saw the failed result before answering.
    let lengths = transport.seen_history_lengths.lock().unwrap().clone();
    assert_eq!(lengths, vec![1, 3]);
}

#[tokio::test]
async fn unresolvable_model_fails_at_construction() {
    let registry = CapabilityRegistry::builder().without_default().build();
    let transport = MockTransport::new(ToolCallingMode::None, Vec::new());
    let result = Agent::new(
        transport,
        Arc::new(ToolRegistry::new()),
        &registry,
        "mystery-model",
        AgentConfig::default(),
    );
    assert!(matches!(result, Err(AgentError::UnknownProviderMode(_))));
}
