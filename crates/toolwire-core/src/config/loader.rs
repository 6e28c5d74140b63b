//! Configuration loader for YAML files and environment resolution

use std::env;
use std::path::Path;
use tokio::fs;

use crate::config::types::{ToolwireConfig, TransportConfig};
use crate::errors::AgentError;

/// Fallback variables tried, in order, when the config names no key at all.
const FALLBACK_KEY_VARS: [&str; 3] = ["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "GEMINI_API_KEY"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<ToolwireConfig, AgentError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            AgentError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        log::info!("Loaded configuration from {}", path.display());
        Self::from_str(&content).await
    }

    /// Load configuration from a YAML string
    pub async fn from_str(content: &str) -> Result<ToolwireConfig, AgentError> {
        let mut config: ToolwireConfig = serde_yaml::from_str(content)?;

        Self::resolve_transport_auth(&mut config.transport);
        config.validate()?;

        Ok(config)
    }

    fn resolve_transport_auth(transport: &mut TransportConfig) {
        if let Some(env_var) = &transport.api_key_env {
            match env::var(env_var) {
                Ok(api_key) => transport.api_key = Some(api_key),
                Err(_) => log::warn!(
                    "api_key_env '{}' is set but the variable is not defined",
                    env_var
                ),
            }
            return;
        }

        if transport.api_key.is_none() {
            transport.api_key = FALLBACK_KEY_VARS
                .iter()
                .find_map(|var| env::var(var).ok());
        }
    }
}
