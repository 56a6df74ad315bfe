//! OCI registry provider
//!
//! Pulls `<namespace>/<key>:latest` from a registry speaking the OCI
//! distribution API. Every lookup goes to the network; the manifest lives
//! in memory for the duration of the call and the selected blob is staged
//! in an anonymous temp file that disappears when the artifact is dropped.
//!
//! Registry URLs look like `oci://registry.local:5000/fabric/boot`.

mod auth;
mod manifest;

pub use auth::{Challenge, Credentials};
pub use manifest::{Descriptor, Manifest, OCI_IMAGE_LAYER};

use crate::error::{ArtifactError, Result};
use crate::provider::{Artifact, ArtifactProvider, Lookup};
use async_trait::async_trait;
use auth::Authorization;
use futures::StreamExt;
use manifest::{sha256_digest, verify_digest, MANIFEST_ACCEPT};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

/// Tag every lookup resolves
pub const TAG: &str = "latest";

/// Upper bound for a whole lookup: auth, manifest and blob
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP keepalive interval
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Idle connections kept per registry host
pub const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// How long an idle pooled connection is kept
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const DIGEST_HEADER: &str = "docker-content-digest";

/// Settings for one registry, validated as a whole by [`OciProvider::new`]
#[derive(Debug, Clone, Default)]
pub struct OciProviderConfig {
    /// `oci://host[:port]/namespace`
    pub url: String,
    pub credentials: Credentials,
    /// PEM bundle replacing the system roots for this registry
    pub server_ca: Option<PathBuf>,
    /// PEM client certificate for mutual TLS
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// Where blobs are staged while being verified
    pub temp_dir: Option<PathBuf>,
    /// Talk plain HTTP instead of HTTPS (local registries only)
    pub plain_http: bool,
}

/// Artifact provider backed by an OCI registry
pub struct OciProvider {
    client: reqwest::Client,
    base: Url,
    namespace: String,
    credentials: Credentials,
    temp_dir: Option<PathBuf>,
    timeout: Duration,
    name: String,
}

impl OciProvider {
    pub fn new(config: OciProviderConfig) -> Result<Self> {
        let (base, namespace) = parse_registry_url(&config.url, config.plain_http)?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);
        // HTTP/2 stays on: the rustls connector advertises h2 through ALPN.

        if let Some(path) = &config.server_ca {
            let pem = std::fs::read(path)?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)?;
            if certs.is_empty() {
                return Err(ArtifactError::InvalidConfig(format!(
                    "no certificates in server CA bundle {}",
                    path.display()
                )));
            }
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
                builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
            }
            (None, None) => {}
            _ => {
                return Err(ArtifactError::InvalidConfig(
                    "client certificate and client key must be configured together".to_string(),
                ))
            }
        }

        if let Some(dir) = &config.temp_dir {
            std::fs::create_dir_all(dir)?;
        }

        let name = format!("oci:{}", config.url);
        Ok(Self {
            client: builder.build()?,
            base,
            namespace,
            credentials: config.credentials,
            temp_dir: config.temp_dir,
            timeout: REQUEST_TIMEOUT,
            name,
        })
    }

    /// Override the per-lookup deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Repository path for a key
    pub fn repository(&self, key: &str) -> Result<String> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        if self.namespace.is_empty() {
            Ok(key.to_string())
        } else {
            Ok(format!("{}/{}", self.namespace, key))
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<Artifact>> {
        let repository = self.repository(key)?;
        let mut session = Session::new(self, &repository);

        let manifest_url = self.endpoint(&format!("v2/{repository}/manifests/{TAG}"))?;
        let response = session.get(&manifest_url, Some(MANIFEST_ACCEPT)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response)?;

        let advertised = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        if let Some(expected) = advertised {
            verify_digest(&expected, &sha256_digest(&body))?;
        }

        let manifest = Manifest::from_slice(&body)?;
        let Some(layer) = manifest.artifact_layer() else {
            debug!(repository = %repository, descriptors = manifest.descriptors().len(), "Manifest has no usable layer");
            return Ok(None);
        };

        let blob_url = self.endpoint(&format!("v2/{repository}/blobs/{}", layer.digest))?;
        let response = ensure_success(session.get(&blob_url, None).await?)?;
        let file = self.stage(response, layer).await?;

        info!(repository = %repository, digest = %layer.digest, size = layer.size, "Pulled artifact from registry");
        Ok(Some(Artifact::from_reader(file, Some(layer.size))))
    }

    /// Stream a blob into an anonymous temp file, checking size and digest
    async fn stage(&self, response: reqwest::Response, layer: &Descriptor) -> Result<tokio::fs::File> {
        let staged = match &self.temp_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let mut file = tokio::fs::File::from_std(staged);
        let mut hasher = Sha256::new();
        let mut written = 0u64;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > layer.size {
                return Err(ArtifactError::SizeMismatch {
                    expected: layer.size,
                    actual: written,
                });
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }

        if written != layer.size {
            return Err(ArtifactError::SizeMismatch {
                expected: layer.size,
                actual: written,
            });
        }
        verify_digest(&layer.digest, &format!("sha256:{}", hex::encode(hasher.finalize())))?;

        file.flush().await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(file)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| ArtifactError::InvalidUrl {
            url: format!("{}{}", self.base, path),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for OciProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciProvider")
            .field("base", &self.base.as_str())
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ArtifactProvider for OciProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &str) -> Lookup {
        match tokio::time::timeout(self.timeout, self.fetch(key)).await {
            Ok(Ok(Some(artifact))) => Lookup::Found(artifact),
            Ok(Ok(None)) => Lookup::NotFound,
            Ok(Err(e)) => Lookup::Failed(e),
            Err(_) => Lookup::Failed(ArtifactError::Timeout(self.timeout)),
        }
    }
}

/// Auth state carried across the requests of a single lookup
struct Session<'a> {
    provider: &'a OciProvider,
    scope: String,
    authorization: Authorization,
    challenged: bool,
}

impl<'a> Session<'a> {
    fn new(provider: &'a OciProvider, repository: &str) -> Self {
        Self {
            provider,
            scope: format!("repository:{repository}:pull"),
            authorization: Authorization::initial(&provider.credentials),
            challenged: false,
        }
    }

    async fn send(&self, url: &Url, accept: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.provider.client.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        Ok(self.authorization.apply(request).send().await?)
    }

    /// GET with one retry after answering an auth challenge
    async fn get(&mut self, url: &Url, accept: Option<&str>) -> Result<reqwest::Response> {
        let response = self.send(url, accept).await?;
        if response.status() != StatusCode::UNAUTHORIZED || self.challenged {
            return Ok(response);
        }
        self.challenged = true;

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse);
        let Some(challenge) = challenge else {
            return Ok(response);
        };

        let credentials = &self.provider.credentials;
        self.authorization = match challenge {
            Challenge::Basic => Authorization::basic(credentials)
                .ok_or_else(|| ArtifactError::Auth("registry requires basic credentials".to_string()))?,
            Challenge::Bearer { realm, service, scope } => {
                debug!(realm = %realm, "Fetching registry token");
                let scope = scope.unwrap_or_else(|| self.scope.clone());
                let token =
                    auth::fetch_token(&self.provider.client, credentials, &realm, service.as_deref(), &scope).await?;
                Authorization::Bearer(token)
            }
        };

        self.send(url, accept).await
    }
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ArtifactError::UnexpectedStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// Split `oci://host[:port]/namespace` into an HTTP base URL and namespace
pub fn parse_registry_url(raw: &str, plain_http: bool) -> Result<(Url, String)> {
    let invalid = |reason: &str| ArtifactError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "oci" {
        return Err(invalid("scheme must be oci://"));
    }
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;

    let scheme = if plain_http { "http" } else { "https" };
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let base = Url::parse(&format!("{scheme}://{authority}/")).map_err(|e| invalid(&e.to_string()))?;
    let namespace = url.path().trim_matches('/').to_string();

    Ok((base, namespace))
}
