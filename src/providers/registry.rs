use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::errors::AgentError;
use crate::providers::base::Provider;
use crate::providers::openai::OpenAIProvider;

type ProviderFactory =
    Box<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Provider>, AgentError> + Send + Sync>;

/// Explicit name→factory map of provider implementations.
///
/// Constructed once at startup and threaded into the agent; there is
/// deliberately no process-global registry or init-time registration.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Registry with the built-in adapters.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("openai", |cfg| {
            if cfg.api_key.is_empty() {
                return Err(AgentError::InvalidArgs(
                    "provider 'openai' requires an API key (set RUSTLE_API_KEY)".into(),
                ));
            }
            Ok(Arc::new(OpenAIProvider::new(
                cfg.api_key.clone(),
                cfg.model.clone(),
                cfg.base_url.clone(),
            )))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn Provider>, AgentError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn resolve(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, AgentError> {
        let factory = self.factories.get(&config.name).ok_or_else(|| {
            AgentError::InvalidArgs(format!(
                "unknown provider '{}' (available: {})",
                config.name,
                self.names().join(", ")
            ))
        })?;
        factory(config)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
