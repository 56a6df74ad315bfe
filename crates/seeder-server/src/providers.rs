//! Provider chain assembly from configuration

use crate::error::{Result, SeederError};
use seeder_artifacts::{
    ArtifactProvider, Credentials, EmbeddedProvider, FilesystemProvider, OciProvider, OciProviderConfig, ProviderChain,
};
use seeder_config::{ArtifactProviders, OciRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the chain: configured directories in order, then the compiled-in
/// artifacts, then registries in order
pub fn build_chain(settings: &ArtifactProviders) -> Result<ProviderChain> {
    let mut providers: Vec<Arc<dyn ArtifactProvider>> = Vec::new();

    for dir in &settings.directories {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Artifact directory does not exist (yet)");
        }
        providers.push(Arc::new(FilesystemProvider::new(dir)));
    }

    let embedded = EmbeddedProvider::builtin();
    info!(keys = ?embedded.keys().collect::<Vec<_>>(), "Compiled-in artifacts");
    providers.push(Arc::new(embedded));

    for registry in &settings.oci_registries {
        providers.push(Arc::new(oci_provider(registry, settings.oci_temp_dir.as_deref())?));
    }

    Ok(ProviderChain::new(providers))
}

fn oci_provider(registry: &OciRegistry, temp_dir: Option<&Path>) -> Result<OciProvider> {
    let config = OciProviderConfig {
        url: registry.url.clone(),
        credentials: Credentials {
            username: registry.username.clone(),
            password: registry.password.clone(),
            access_token: registry.access_token.clone(),
            refresh_token: registry.refresh_token.clone(),
        },
        server_ca: registry.server_ca_path.clone(),
        client_cert: registry.client_cert_path.clone(),
        client_key: registry.client_key_path.clone(),
        temp_dir: temp_dir.map(Path::to_path_buf),
        plain_http: registry.plain_http,
    };
    if config.plain_http {
        warn!(url = %registry.url, "Registry is reached over plain HTTP");
    }

    OciProvider::new(config).map_err(|e| SeederError::Config(format!("registry {}: {e}", registry.url)))
}
