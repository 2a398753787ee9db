//! Provider configuration.
//!
//! A [`Provider`] describes one backend endpoint: where it lives, how to authenticate,
//! and how public model identifiers map to the names the backend expects.

use crate::error::{PolygateError, Result};
use crate::llm::models::Model;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default HTTP timeout for provider requests, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Configuration of one chat-completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Prefix of the environment variables that override this provider (`DEEPSEEK_`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_prefix: Option<String>,
    /// Prefix prepended to the provider's model ids (`deepseek/`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_prefix: String,
    /// Explicit model list; when non-empty no live listing is done
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<Model>,
    /// Public model name -> backend-native model name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_alias: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

impl Provider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: String::new(),
            env_prefix: None,
            model_prefix: String::new(),
            models: Vec::new(),
            model_alias: BTreeMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_env_prefix(mut self, env_prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(env_prefix.into());
        self
    }

    pub fn with_model_prefix(mut self, model_prefix: impl Into<String>) -> Self {
        self.model_prefix = model_prefix.into();
        self
    }

    pub fn with_models(mut self, models: Vec<Model>) -> Self {
        self.models = models;
        self
    }

    pub fn with_alias(mut self, public: impl Into<String>, native: impl Into<String>) -> Self {
        self.model_alias.insert(public.into(), native.into());
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Name of the environment variable that supplies the API key, if any
    pub fn api_key_env(&self) -> Option<String> {
        self.env_prefix.as_ref().map(|prefix| format!("{}API_KEY", prefix))
    }

    /// Apply environment overrides from the process environment.
    pub fn load_env(&mut self) {
        self.load_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// With prefix `P`, reads `P`BASE_URL, API_KEY, MODELS (`a,b`), MODEL_ALIAS
    /// (`alias:model,alias2:model2`) and TIMEOUT (seconds). Unset or empty variables
    /// leave the configured value alone.
    pub fn load_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(prefix) = self.env_prefix.clone() else {
            return;
        };
        let get = |key: &str| lookup(&format!("{}{}", prefix, key)).filter(|v| !v.trim().is_empty());

        if let Some(base_url) = get("BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(api_key) = get("API_KEY") {
            self.api_key = api_key;
        }
        if let Some(models) = get("MODELS") {
            self.models = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(Model::new)
                .collect();
        }
        if let Some(aliases) = get("MODEL_ALIAS") {
            self.model_alias = parse_alias_list(&aliases);
        }
        if let Some(timeout) = get("TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.timeout_secs = secs,
                _ => warn!(provider = %self.name, value = %timeout, "Ignoring invalid provider timeout"),
            }
        }

        debug!(
            provider = %self.name,
            has_api_key = self.has_credentials(),
            models = self.models.len(),
            aliases = self.model_alias.len(),
            "Provider environment loaded"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PolygateError::InvalidConfiguration("provider name is empty".to_string()));
        }
        if self.base_url.trim().is_empty() {
            return Err(PolygateError::InvalidConfiguration(format!(
                "provider {} has no base URL",
                self.name
            )));
        }
        Ok(())
    }

    /// Convert a public model id into the name the backend expects.
    ///
    /// The provider's model prefix is stripped first, then the remainder is looked up in the
    /// alias table.
    pub fn real_model(&self, model: &str) -> String {
        let bare = if self.model_prefix.is_empty() {
            model
        } else {
            model.strip_prefix(self.model_prefix.as_str()).unwrap_or(model)
        };
        match self.model_alias.get(bare) {
            Some(native) => native.clone(),
            None => bare.to_string(),
        }
    }

    /// Models known from configuration alone: explicit models plus one per alias, listed
    /// under the provider's model prefix.
    pub fn static_models(&self) -> Vec<Model> {
        let mut models = self.models.clone();
        for (public, native) in &self.model_alias {
            let id = format!("{}{}", self.model_prefix, public);
            if models.iter().any(|m| m.id == id) {
                continue;
            }
            let mut model = Model::new(id);
            model.owned_by = self.name.clone();
            model.description = Some(format!("alias of {}", native));
            models.push(model);
        }
        models
    }
}

fn parse_alias_list(raw: &str) -> BTreeMap<String, String> {
    let mut aliases = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once(':') {
            Some((public, native)) if !public.trim().is_empty() && !native.trim().is_empty() => {
                aliases.insert(public.trim().to_string(), native.trim().to_string());
            }
            _ => warn!(entry = %entry, "Ignoring malformed model alias, expected alias:model"),
        }
    }
    aliases
}

/// Providers known out of the box. Each registers only once an API key is supplied,
/// normally through its `<PREFIX>API_KEY` environment variable.
pub fn builtin_providers() -> Vec<Provider> {
    [
        ("openai", "https://api.openai.com/v1", "OPENAI_", ""),
        ("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_", "deepseek/"),
        ("qwen", "https://dashscope.aliyuncs.com/compatible-mode/v1", "QWEN_", "qwen/"),
        (
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "GEMINI_",
            "gemini/",
        ),
        ("openrouter", "https://openrouter.ai/api/v1", "OPENROUTER_", "openrouter/"),
        ("volcengine", "https://ark.cn-beijing.volces.com/api/v3", "VOLCENGINE_", "volcengine/"),
        ("groq", "https://api.groq.com/openai/v1", "GROQ_", "groq/"),
        ("xai", "https://api.x.ai/v1", "XAI_", "xai/"),
        ("siliconflow", "https://api.siliconflow.cn/v1", "SILICONFLOW_", "siliconflow/"),
    ]
    .into_iter()
    .map(|(name, base_url, env_prefix, model_prefix)| {
        Provider::new(name, base_url).with_env_prefix(env_prefix).with_model_prefix(model_prefix)
    })
    .collect()
}
