//! Model transport abstraction and the HTTP implementation.
//!
//! A `Transport` performs exactly one request/response exchange with a model and
//! hands back the provider-shaped JSON untouched, tagged with the mode it was
//! requested under. All interpretation of that JSON happens in `extraction`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::capabilities::ToolCallingMode;
use crate::config::TransportConfig;
use crate::core_types::{ConversationMessage, RawResponse, ToolSpec};
use crate::encoding::{render_for_provider, render_tools};
use crate::errors::AgentError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Routing prefix used in model identifiers, not part of the served model name.
const OLLAMA_PREFIX: &str = "ollama/";

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        history: &[ConversationMessage],
        tools: &[ToolSpec],
    ) -> Result<RawResponse, AgentError>;
}

pub struct HttpTransport {
    config: TransportConfig,
    mode: ToolCallingMode,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig, mode: ToolCallingMode) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::TransportError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            mode,
            client,
        })
    }

    pub fn mode(&self) -> ToolCallingMode {
        self.mode
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn endpoint(&self) -> String {
        match self.mode {
            ToolCallingMode::NativeAnthropic => format!("{}/messages", self.base_url()),
            ToolCallingMode::NativeGemini => {
                format!("{}/models/{}:generateContent", self.base_url(), self.config.model)
            }
            ToolCallingMode::NativeOllama => format!("{}/api/chat", self.base_url()),
            _ => format!("{}/chat/completions", self.base_url()),
        }
    }

    /// Request body for the provider family behind `mode`.
    pub fn build_payload(&self, history: &[ConversationMessage], tools: &[ToolSpec]) -> Value {
        let mut body = match render_for_provider(self.mode, history) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        match self.mode {
            ToolCallingMode::NativeGemini => {}
            ToolCallingMode::NativeAnthropic => {
                body.insert("model".to_string(), json!(self.config.model));
                body.insert("max_tokens".to_string(), json!(self.config.max_tokens));
            }
            ToolCallingMode::NativeOllama => {
                let model = self
                    .config
                    .model
                    .strip_prefix(OLLAMA_PREFIX)
                    .unwrap_or(&self.config.model);
                body.insert("model".to_string(), json!(model));
                body.insert("stream".to_string(), json!(false));
            }
            _ => {
                body.insert("model".to_string(), json!(self.config.model));
            }
        }

        // Text modes describe tools in the system prompt instead.
        if let Some(tools) = render_tools(self.mode, tools) {
            body.insert("tools".to_string(), tools);
        }

        Value::Object(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        history: &[ConversationMessage],
        tools: &[ToolSpec],
    ) -> Result<RawResponse, AgentError> {
        let url = self.endpoint();
        let payload = self.build_payload(history, tools);
        log::debug!("HttpTransport sending request to {}: {}", url, payload);

        let mut request = self.client.post(&url).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = match self.mode {
                ToolCallingMode::NativeAnthropic => request
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
                ToolCallingMode::NativeGemini => request.header("x-goog-api-key", api_key),
                _ => request.bearer_auth(api_key),
            };
        }

        let response = request.send().await.map_err(|e| {
            let err_msg = format!("HTTP request to {} failed: {}", url, e);
            log::error!("{}", err_msg);
            AgentError::TransportError(err_msg)
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| {
                "Unknown error while reading error response body".to_string()
            });
            let err_msg = format!("Model API request failed with status {}: {}", status, error_text);
            log::error!("{}", err_msg);
            return Err(AgentError::TransportError(err_msg));
        }

        let body = response.json::<Value>().await.map_err(|e| {
            let err_msg = format!("Failed to parse model response JSON: {}", e);
            log::error!("{}", err_msg);
            AgentError::ParsingError(err_msg)
        })?;
        log::debug!("HttpTransport received: {}", body);

        Ok(RawResponse::new(self.mode, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(mode: ToolCallingMode) -> HttpTransport {
        HttpTransport::new(
            TransportConfig {
                base_url: "http://localhost:9999/v1/".to_string(),
                model: "test-model".to_string(),
                api_key: None,
                api_key_env: None,
                timeout_secs: 5,
                max_tokens: 256,
            },
            mode,
        )
        .unwrap()
    }

    fn tools() -> Vec<ToolSpec> {
        vec![ToolSpec::new("add", "Add", json!({"type": "object"}))]
    }

    #[test]
    fn test_endpoints_per_family() {
        assert_eq!(
            transport(ToolCallingMode::NativeOpenAi).endpoint(),
            "http://localhost:9999/v1/chat/completions"
        );
        assert_eq!(
            transport(ToolCallingMode::NativeAnthropic).endpoint(),
            "http://localhost:9999/v1/messages"
        );
        assert_eq!(
            transport(ToolCallingMode::NativeGemini).endpoint(),
            "http://localhost:9999/v1/models/test-model:generateContent"
        );
        assert_eq!(
            transport(ToolCallingMode::NativeOllama).endpoint(),
            "http://localhost:9999/v1/api/chat"
        );
        assert_eq!(
            transport(ToolCallingMode::TextPattern).endpoint(),
            "http://localhost:9999/v1/chat/completions"
        );
    }

    #[test]
    fn test_tools_only_sent_in_native_modes() {
        let history = vec![ConversationMessage::user("hi")];

        let native = transport(ToolCallingMode::NativeOpenAi).build_payload(&history, &tools());
        assert_eq!(native["model"], json!("test-model"));
        assert_eq!(native["tools"][0]["function"]["name"], json!("add"));

        let text = transport(ToolCallingMode::TextPattern).build_payload(&history, &tools());
        assert!(text.get("tools").is_none());
        assert_eq!(text["messages"][0]["content"], json!("hi"));
    }

    #[test]
    fn test_anthropic_payload_carries_max_tokens() {
        let history = vec![
            ConversationMessage::system("sys"),
            ConversationMessage::user("hi"),
        ];
        let payload = transport(ToolCallingMode::NativeAnthropic).build_payload(&history, &tools());
        assert_eq!(payload["max_tokens"], json!(256));
        assert_eq!(payload["system"], json!("sys"));
        assert_eq!(payload["tools"][0]["name"], json!("add"));
    }

    #[test]
    fn test_ollama_payload_strips_routing_prefix() {
        let transport = HttpTransport::new(
            TransportConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "ollama/llama3.1".to_string(),
                api_key: None,
                api_key_env: None,
                timeout_secs: 5,
                max_tokens: 256,
            },
            ToolCallingMode::NativeOllama,
        )
        .unwrap();

        let payload = transport.build_payload(&[ConversationMessage::user("hi")], &tools());
        assert_eq!(transport.endpoint(), "http://localhost:11434/api/chat");
        assert_eq!(payload["model"], json!("llama3.1"));
        assert_eq!(payload["stream"], json!(false));
        assert_eq!(payload["tools"][0]["function"]["name"], json!("add"));
        assert_eq!(payload["messages"][0]["role"], json!("user"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let transport = HttpTransport::new(
            TransportConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                model: "m".to_string(),
                api_key: Some("k".to_string()),
                api_key_env: None,
                timeout_secs: 2,
                max_tokens: 16,
            },
            ToolCallingMode::NativeOpenAi,
        )
        .unwrap();

        let result = transport.send(&[ConversationMessage::user("hi")], &[]).await;
        assert!(matches!(result, Err(AgentError::TransportError(_))));
    }
}
