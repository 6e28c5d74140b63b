use super::*;
use crate::capabilities::ToolCallingMode;
use std::io::Write;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"
agent:
  max_turns: 6
  loop_ceiling: 2
  system_prompt: "You are a careful assistant."
  parallel_tool_execution: true
transport:
  base_url: "http://localhost:11434/v1"
  model: "llama3.1"
  api_key: "sk-inline"
  timeout_secs: 30
capabilities:
  default: json_emit
  exact:
    my-model: { mode: native_openai, max_tools_per_request: 4 }
  prefixes:
    "acme-": { mode: native_anthropic, parallel_calls: true }
"#;

#[tokio::test]
async fn test_load_full_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = load_config(file.path()).await.unwrap();

    assert_eq!(config.agent.max_turns, 6);
    assert_eq!(config.agent.loop_ceiling, 2);
    assert!(config.agent.parallel_tool_execution);
    assert!(config.agent.validate_arguments);
    assert_eq!(config.transport.model, "llama3.1");
    assert_eq!(config.transport.api_key.as_deref(), Some("sk-inline"));
    assert_eq!(config.transport.timeout_secs, 30);
    assert_eq!(config.transport.max_tokens, 1024);
}

#[tokio::test]
async fn test_capability_overrides_layer_on_builtin_table() {
    let config = ConfigLoader::from_str(FULL_CONFIG).await.unwrap();
    let registry = config.capabilities.to_registry();

    let exact = registry.resolve("my-model").unwrap();
    assert_eq!(exact.mode, ToolCallingMode::NativeOpenAi);
    assert_eq!(exact.limits.max_tools_per_request, 4);

    let prefixed = registry.resolve("acme-large").unwrap();
    assert_eq!(prefixed.mode, ToolCallingMode::NativeAnthropic);
    assert!(prefixed.limits.parallel_calls);

    // Built-in prefixes survive, the default is replaced.
    assert_eq!(registry.resolve("claude-3-opus").unwrap().mode, ToolCallingMode::NativeAnthropic);
    assert_eq!(registry.resolve("unheard-of").unwrap().mode, ToolCallingMode::JsonEmit);
}

#[tokio::test]
async fn test_builtin_table_can_be_disabled() {
    let yaml = r#"
transport:
  base_url: "https://api.example.com/v1"
  model: "gpt-4o"
capabilities:
  use_builtin: false
"#;
    let config = ConfigLoader::from_str(yaml).await.unwrap();
    let registry = config.capabilities.to_registry();
    assert!(registry.resolve("gpt-4o").is_err());
}

#[tokio::test]
async fn test_defaults_for_missing_sections() {
    let yaml = r#"
transport:
  base_url: "https://api.example.com/v1"
  model: "gpt-4o-mini"
"#;
    let config = ConfigLoader::from_str(yaml).await.unwrap();
    assert_eq!(config.agent.max_turns, 10);
    assert_eq!(config.agent.loop_ceiling, 3);
    assert!(config.agent.system_prompt.is_none());
    assert!(config.capabilities.use_builtin);
    assert_eq!(config.transport.timeout_secs, 60);
}

#[tokio::test]
async fn test_api_key_from_named_env_var() {
    std::env::set_var("TOOLWIRE_TEST_KEY_FROM_ENV", "sk-from-env");
    let yaml = r#"
transport:
  base_url: "https://api.example.com/v1"
  model: "gpt-4o"
  api_key: "ignored"
  api_key_env: "TOOLWIRE_TEST_KEY_FROM_ENV"
"#;
    let config = ConfigLoader::from_str(yaml).await.unwrap();
    assert_eq!(config.transport.api_key.as_deref(), Some("sk-from-env"));
}

#[tokio::test]
async fn test_validation_rejects_bad_values() {
    let cases = [
        ("agent: { max_turns: 0 }", "max_turns"),
        ("agent: { loop_ceiling: 0 }", "loop_ceiling"),
    ];
    for (agent, needle) in cases {
        let yaml = format!(
            "{}\ntransport: {{ base_url: \"http://x\", model: \"m\" }}\n",
            agent
        );
        match ConfigLoader::from_str(&yaml).await {
            Err(AgentError::ValidationError(msg)) => assert!(msg.contains(needle), "{}", msg),
            other => panic!("Expected ValidationError for {}, got {:?}", needle, other),
        }
    }

    let empty_model = "transport: { base_url: \"http://x\", model: \"  \" }";
    assert!(matches!(
        ConfigLoader::from_str(empty_model).await,
        Err(AgentError::ValidationError(_))
    ));

    let bad_url = "transport: { base_url: \"localhost:8080\", model: \"m\" }";
    assert!(matches!(
        ConfigLoader::from_str(bad_url).await,
        Err(AgentError::ValidationError(_))
    ));

    let zero_tools = r#"
transport: { base_url: "http://x", model: "m" }
capabilities:
  exact: { m: { mode: json_emit, max_tools_per_request: 0 } }
"#;
    assert!(matches!(
        ConfigLoader::from_str(zero_tools).await,
        Err(AgentError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_malformed_yaml_is_a_config_error() {
    let result = ConfigLoader::from_str("transport: [unclosed").await;
    assert!(matches!(result, Err(AgentError::ConfigError(_))));
}

#[tokio::test]
async fn test_missing_file_is_a_config_error() {
    let result = load_config("/definitely/not/here/toolwire.yaml").await;
    assert!(matches!(result, Err(AgentError::ConfigError(_))));
}
