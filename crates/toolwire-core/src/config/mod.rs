//! Configuration for the toolwire agent
//!
//! A single YAML document configures the turn loop (`agent`), the model
//! endpoint (`transport`) and any overrides of the built-in capability table
//! (`capabilities`).

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::AgentError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ToolwireConfig, AgentError> {
    ConfigLoader::from_file(path).await
}
