//! Ordered fallback over several providers

use crate::provider::{Artifact, ArtifactProvider, Lookup};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Tries each provider in order; the first one that has the key wins
///
/// Immutable after construction and safe to share between request handlers.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn ArtifactProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn ArtifactProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Names of the providers in resolution order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("providers", &self.provider_names())
            .finish()
    }
}

#[async_trait]
impl ArtifactProvider for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn lookup(&self, key: &str) -> Lookup {
        match self.get(key).await {
            Some(artifact) => Lookup::Found(artifact),
            None => Lookup::NotFound,
        }
    }

    async fn get(&self, key: &str) -> Option<Artifact> {
        for provider in &self.providers {
            if let Some(artifact) = provider.get(key).await {
                debug!(provider = %provider.name(), key = %key, "Artifact resolved");
                return Some(artifact);
            }
        }
        debug!(key = %key, providers = self.providers.len(), "No provider could resolve artifact");
        None
    }
}
