use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment};
use parley::providers::configs::DialProviderConfig;
use parley::tools::code_interpreter::DEFAULT_TOOL_NAME;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// The gateway serving chat completions, embeddings and files
#[derive(Debug, Deserialize)]
pub struct DialSettings {
    pub endpoint: String,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
}

impl DialSettings {
    pub fn provider_config(&self) -> DialProviderConfig {
        let config = DialProviderConfig::new(self.endpoint.clone());
        match &self.api_version {
            Some(version) => config.with_api_version(version.clone()),
            None => config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RagSettings {
    /// Deployment answering from retrieved chunks; the agent's one when unset
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_embeddings_deployment")]
    pub embeddings_deployment: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            deployment: None,
            embeddings_deployment: default_embeddings_deployment(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CodeInterpreterSettings {
    pub mcp_url: String,
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Replaces the built-in system prompt template
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub dial: DialSettings,
    #[serde(default)]
    pub rag: RagSettings,
    /// Code execution is only offered when an interpreter is configured
    #[serde(default)]
    pub code_interpreter: Option<CodeInterpreterSettings>,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let config::ConfigError::NotFound(field) = &err {
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    });
                }
                // "missing field `endpoint`", possibly decorated with the key it belongs to
                let message = err.to_string();
                match message
                    .split("missing field `")
                    .nth(1)
                    .and_then(|rest| rest.split('`').next())
                {
                    Some(field) => Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    }),
                    None => Err(ConfigError::Other(err)),
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_embeddings_deployment() -> String {
    "text-embedding-3-small-1".to_string()
}

fn default_chunk_size() -> usize {
    parley::rag::splitter::DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    parley::rag::splitter::DEFAULT_CHUNK_OVERLAP
}

fn default_top_k() -> usize {
    3
}

fn default_tool_name() -> String {
    DEFAULT_TOOL_NAME.to_string()
}

fn default_max_iterations() -> usize {
    parley::agent::DEFAULT_MAX_ITERATIONS
}
