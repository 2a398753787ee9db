//! Gateway configuration.
//!
//! Settings come from an optional JSON file named by `POLYGATE_CONFIG`, with a few scalar
//! overrides read from the environment (a `.env` file is honoured). Provider credentials are
//! not part of the file; each provider reads them from its own environment prefix when it is
//! registered.

use crate::error::Result;
use crate::llm::cache::ModelCache;
use crate::llm::orchestrator::{OrchestratorConfig, DEFAULT_MAX_TOOL_ROUNDS};
use crate::llm::provider::{builtin_providers, Provider};
use crate::mcp::McpServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_ENV: &str = "POLYGATE_CONFIG";
pub const CACHE_DIR_ENV: &str = "POLYGATE_CACHE_DIR";
pub const MAX_TOOL_ROUNDS_ENV: &str = "POLYGATE_MAX_TOOL_ROUNDS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Providers in registration order; earlier providers win model id collisions
    pub providers: Vec<Provider>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Model cache directory, defaults to the user cache dir
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub max_tool_rounds: usize,
    pub parallel_tool_calls: bool,
    /// Providers whose model lists are fetched at once during startup
    pub registration_concurrency: usize,
    /// Append the built-in provider catalog after the configured providers
    pub include_builtin_providers: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            mcp_servers: BTreeMap::new(),
            cache_dir: None,
            cache_ttl_secs: 3600,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            parallel_tool_calls: true,
            registration_concurrency: 4,
            include_builtin_providers: true,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading gateway configuration");
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load `.env`, then build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`, which maps variable names to values.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match get(CONFIG_ENV) {
            Some(path) => Self::from_file(path.trim())?,
            None => Self::default(),
        };

        if let Some(dir) = get(CACHE_DIR_ENV) {
            config.cache_dir = Some(PathBuf::from(dir.trim()));
        }

        if let Some(raw) = get(MAX_TOOL_ROUNDS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(rounds) => config.max_tool_rounds = rounds,
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", MAX_TOOL_ROUNDS_ENV),
            }
        }

        Ok(config)
    }

    /// Configured providers followed by the built-in ones they do not shadow.
    pub fn all_providers(&self) -> Vec<Provider> {
        let mut providers = self.providers.clone();
        if self.include_builtin_providers {
            let named: HashSet<String> = providers.iter().map(|p| p.name.clone()).collect();
            providers.extend(builtin_providers().into_iter().filter(|p| !named.contains(&p.name)));
        }
        providers
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(ModelCache::default_dir)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_tool_rounds: self.max_tool_rounds,
            parallel_tool_calls: self.parallel_tool_calls,
        }
    }
}
