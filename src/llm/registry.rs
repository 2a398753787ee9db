//! Provider registry and model resolution.
//!
//! The registry owns every registered provider with its backend and maps each public model id
//! to exactly one provider. A model id claimed by two providers stays with the provider that
//! registered first; the later claim is rejected and reported.

use crate::error::{PolygateError, Result};
use crate::llm::backend::ChatBackend;
use crate::llm::backends::OpenAICompatibleBackend;
use crate::llm::cache::ModelCache;
use crate::llm::directive::split_model;
use crate::llm::models::Model;
use crate::llm::provider::Provider;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Builds the backend for a provider that has credentials
pub type BackendFactory = Arc<dyn Fn(&Provider) -> Result<Arc<dyn ChatBackend>> + Send + Sync>;

/// Default factory: every provider speaks the OpenAI-compatible protocol
pub fn openai_compatible_factory() -> BackendFactory {
    Arc::new(|provider: &Provider| {
        let backend = OpenAICompatibleBackend::from_provider(provider)?;
        Ok(Arc::new(backend) as Arc<dyn ChatBackend>)
    })
}

/// Routing decision for one model string.
#[derive(Clone)]
pub struct Resolution {
    pub backend: Arc<dyn ChatBackend>,
    pub provider: String,
    /// Logical id the caller asked for, without directive
    pub public_model: String,
    /// Name the backend expects
    pub backend_model: String,
    /// Raw text after `?`, if any
    pub directive: Option<String>,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("provider", &self.provider)
            .field("public_model", &self.public_model)
            .field("backend_model", &self.backend_model)
            .field("directive", &self.directive)
            .finish()
    }
}

/// A model id two providers tried to claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCollision {
    pub model: String,
    pub kept: String,
    pub rejected: String,
}

/// Outcome of registering a batch of providers.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    /// Provider name and number of models it now owns
    pub registered: Vec<(String, usize)>,
    pub failed: Vec<(String, PolygateError)>,
    pub collisions: Vec<ModelCollision>,
}

impl RegistrationReport {
    fn merge(&mut self, other: RegistrationReport) {
        self.registered.extend(other.registered);
        self.failed.extend(other.failed);
        self.collisions.extend(other.collisions);
    }
}

struct ProviderEntry {
    provider: Provider,
    backend: Arc<dyn ChatBackend>,
}

#[derive(Default)]
struct RegistryState {
    /// Registration order
    providers: Vec<Arc<ProviderEntry>>,
    /// Public model id -> provider name
    models: HashMap<String, String>,
}

impl RegistryState {
    fn entry(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.providers.iter().find(|e| e.provider.name == name).cloned()
    }
}

/// Registered providers and the model-to-provider mapping.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    cache: Arc<ModelCache>,
    factory: BackendFactory,
}

impl ProviderRegistry {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self::with_backend_factory(cache, openai_compatible_factory())
    }

    pub fn with_backend_factory(cache: Arc<ModelCache>, factory: BackendFactory) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            cache,
            factory,
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Apply environment overrides, check credentials and build the backend
    fn prepare(&self, mut provider: Provider) -> Result<(Provider, Arc<dyn ChatBackend>)> {
        provider.load_env();
        provider.validate()?;
        if !provider.has_credentials() {
            return Err(PolygateError::ApiKeyNotSet(
                provider.api_key_env().unwrap_or_else(|| provider.name.clone()),
            ));
        }
        let backend = (self.factory)(&provider)?;
        Ok((provider, backend))
    }

    /// Register one provider, building its backend with the registry's factory.
    pub async fn register(&self, provider: Provider) -> Result<RegistrationReport> {
        let (provider, backend) = self.prepare(provider)?;
        self.register_with_backend(provider, backend).await
    }

    /// Register a provider with an already-built backend. Environment overrides are not applied.
    pub async fn register_with_backend(
        &self,
        provider: Provider,
        backend: Arc<dyn ChatBackend>,
    ) -> Result<RegistrationReport> {
        provider.validate()?;
        let models = self.models_for(&provider, backend.as_ref()).await?;
        self.insert(provider, backend, models)
    }

    /// Register many providers. Model lists are fetched concurrently, at most `concurrency` at a
    /// time, and mappings are applied in input order so collisions resolve deterministically.
    /// One provider failing never stops the others.
    pub async fn register_all(&self, providers: Vec<Provider>, concurrency: usize) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let mut prepared = Vec::new();

        for provider in providers {
            let name = provider.name.clone();
            match self.prepare(provider) {
                Ok(ready) => prepared.push(ready),
                Err(PolygateError::ApiKeyNotSet(var)) => {
                    debug!(provider = %name, variable = %var, "Skipping provider without API key");
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Skipping misconfigured provider");
                    report.failed.push((name, e));
                }
            }
        }

        let fetched: Vec<_> = stream::iter(prepared)
            .map(|(provider, backend)| async move {
                let models = self.models_for(&provider, backend.as_ref()).await;
                (provider, backend, models)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        for (provider, backend, models) in fetched {
            let name = provider.name.clone();
            let outcome = models.and_then(|models| self.insert(provider, backend, models));
            match outcome {
                Ok(partial) => report.merge(partial),
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider registration failed");
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            collisions = report.collisions.len(),
            "Provider registration complete"
        );
        report
    }

    fn insert(
        &self,
        provider: Provider,
        backend: Arc<dyn ChatBackend>,
        models: Vec<Model>,
    ) -> Result<RegistrationReport> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.entry(&provider.name).is_some() {
            return Err(PolygateError::InvalidConfiguration(format!(
                "provider {} is already registered",
                provider.name
            )));
        }

        let name = provider.name.clone();
        state.providers.push(Arc::new(ProviderEntry { provider, backend }));
        let (claimed, collisions) = claim_models(&mut state, &name, &models);

        info!(provider = %name, models = claimed, collisions = collisions.len(), "Provider registered");
        Ok(RegistrationReport {
            registered: vec![(name, claimed)],
            failed: Vec::new(),
            collisions,
        })
    }

    /// Model list for a provider: static and alias models if any, else the cached list while it
    /// is valid, else a live fetch that refreshes the cache.
    async fn models_for(&self, provider: &Provider, backend: &dyn ChatBackend) -> Result<Vec<Model>> {
        let static_models = provider.static_models();
        if !static_models.is_empty() {
            return Ok(static_models);
        }

        if let Some(models) = self.cache.load_valid(&provider.name).await {
            return Ok(models);
        }

        let models = backend.list_models().await?;
        if models.is_empty() {
            return Err(PolygateError::InvalidConfiguration(format!(
                "provider {} returned no models",
                provider.name
            )));
        }

        if let Err(e) = self.cache.save(&provider.name, &models).await {
            warn!(provider = %provider.name, error = %e, "Failed to write model cache");
        }
        Ok(models)
    }

    /// Route `model` (`<id>[?<directive>]`) to its provider.
    pub fn resolve(&self, model: &str) -> Result<Resolution> {
        let (public_model, directive) = split_model(model);
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let provider_name = state
            .models
            .get(public_model)
            .ok_or_else(|| PolygateError::ModelNotFound(public_model.to_string()))?;
        let entry = state
            .entry(provider_name)
            .ok_or_else(|| PolygateError::ProviderNotFound(provider_name.clone()))?;

        Ok(Resolution {
            backend: entry.backend.clone(),
            provider: entry.provider.name.clone(),
            public_model: public_model.to_string(),
            backend_model: entry.provider.real_model(public_model),
            directive: directive.map(str::to_string),
        })
    }

    pub fn backend(&self, provider: &str) -> Result<Arc<dyn ChatBackend>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .entry(provider)
            .map(|e| e.backend.clone())
            .ok_or_else(|| PolygateError::ProviderNotFound(provider.to_string()))
    }

    pub fn provider_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.providers.iter().map(|e| e.provider.name.clone()).collect()
    }

    /// Aggregate the model lists of every provider.
    ///
    /// Lists come from the cache when valid and are refreshed from the backend otherwise.
    /// Providers whose list cannot be obtained are skipped. Newly seen ids become resolvable.
    pub async fn list_models(&self) -> Vec<Model> {
        let entries = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.providers.clone()
        };

        let mut all = Vec::new();
        for entry in entries {
            match self.models_for(&entry.provider, entry.backend.as_ref()).await {
                Ok(models) => {
                    let name = entry.provider.name.as_str();
                    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                    release_missing(&mut state, name, &models);
                    claim_models(&mut state, name, &models);
                    all.extend(
                        models
                            .into_iter()
                            .filter(|m| state.models.get(&m.id).is_some_and(|owner| owner == name)),
                    );
                }
                Err(e) => warn!(provider = %entry.provider.name, error = %e, "Skipping provider model list"),
            }
        }
        all
    }
}

/// Drop the ids `provider` owns that are no longer in its model list.
fn release_missing(state: &mut RegistryState, provider: &str, models: &[Model]) {
    let listed: HashSet<&str> = models.iter().map(|m| m.id.as_str()).collect();
    state.models.retain(|id, owner| {
        let keep = owner != provider || listed.contains(id.as_str());
        if !keep {
            debug!(model = %id, provider = %owner, "Model no longer listed");
        }
        keep
    });
}

/// Map every unclaimed id to `provider`, returning how many ids the provider owns among
/// `models` and the collisions with other providers.
fn claim_models(state: &mut RegistryState, provider: &str, models: &[Model]) -> (usize, Vec<ModelCollision>) {
    let mut owned = 0;
    let mut collisions = Vec::new();

    for model in models {
        match state.models.get(&model.id) {
            Some(owner) if owner == provider => owned += 1,
            Some(owner) => {
                warn!(model = %model.id, kept = %owner, rejected = %provider, "Model id already registered");
                collisions.push(ModelCollision {
                    model: model.id.clone(),
                    kept: owner.clone(),
                    rejected: provider.to_string(),
                });
            }
            None => {
                state.models.insert(model.id.clone(), provider.to_string());
                owned += 1;
            }
        }
    }

    (owned, collisions)
}
