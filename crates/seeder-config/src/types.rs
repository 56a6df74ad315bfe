//! Configuration document types
//!
//! Every section and field is optional in the YAML; anything missing takes
//! its `Default`. Unknown fields are rejected so typos surface at load time
//! instead of silently falling back to defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The whole seeder configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeederConfig {
    /// Listener definitions
    pub servers: Servers,

    /// Key and certificate used to sign embedded configuration
    pub embedded_config_generator: EmbeddedConfigGeneratorSettings,

    /// Settings handed to installer stages inside their signed config
    pub installer_settings: InstallerSettings,

    /// Device certificate registration
    pub registry_settings: RegistrySettings,

    /// Where boot artifacts come from
    pub artifact_providers: ArtifactProviders,
}

/// The two listener kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Servers {
    /// Plain listener reachable before the device trusts anything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<BindInfo>,

    /// TLS listener used once the device holds the server CA
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<BindInfo>,
}

/// Addresses and TLS material for one listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindInfo {
    /// Socket addresses to bind (e.g. `0.0.0.0:80`, `[::]:443`)
    pub address: Vec<String>,

    /// CA bundle for verifying client certificates
    ///
    /// Enables mutual TLS. Only meaningful together with `server_key`
    /// and `server_cert`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ca: Option<PathBuf>,

    /// PEM private key of the server certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_key: Option<PathBuf>,

    /// PEM server certificate chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_cert: Option<PathBuf>,
}

impl BindInfo {
    /// Plain listener on the given addresses
    pub fn plain<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            address: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether the listener terminates TLS (key and certificate both set)
    pub fn is_tls(&self) -> bool {
        self.server_key.is_some() && self.server_cert.is_some()
    }
}

/// Signing material for the embedded config generator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddedConfigGeneratorSettings {
    /// PEM private key (PKCS#8, SEC1 or PKCS#1)
    pub key_path: PathBuf,

    /// PEM certificate matching `key_path`, issued by the signature CA
    pub cert_path: PathBuf,
}

/// Values embedded into every stage config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerSettings {
    /// CA that issued the secure listener's certificate
    pub server_ca_path: PathBuf,

    /// CA that issued the config signing certificate
    pub config_signature_ca_path: PathBuf,

    /// Host name (and optional port) of the secure listener as devices see it
    pub secure_server_name: String,

    pub dns_servers: Vec<String>,
    pub ntp_servers: Vec<String>,
    pub syslog_servers: Vec<String>,

    /// Static routes installed before the device leaves the link-local network
    pub routes: Vec<Route>,
}

/// A gateway and the prefixes reached through it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Route {
    pub gateway: String,
    pub destinations: Vec<String>,
}

/// Device registration CA
///
/// With both paths set every registration request is signed immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Out-of-band approval without a registry CA: pending CSRs are written
    /// here as `<device_id>.csr`, and a `<device_id>.pem` certificate placed
    /// next to one approves the device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_dir: Option<PathBuf>,
}

impl RegistrySettings {
    pub fn auto_approves(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Artifact backends, consulted in order: directories, compiled-in bundle,
/// then registries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactProviders {
    /// Local directories searched first, in order
    pub directories: Vec<PathBuf>,

    /// Staging directory for registry blobs (system temp dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oci_temp_dir: Option<PathBuf>,

    /// Registries searched last, in order
    pub oci_registries: Vec<OciRegistry>,
}

/// One OCI registry namespace
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OciRegistry {
    /// `oci://host[:port]/namespace`
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// CA bundle replacing the system roots for this registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ca_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<PathBuf>,

    /// Use plain HTTP (local test registries only)
    pub plain_http: bool,
}

impl std::fmt::Debug for OciRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("OciRegistry")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("server_ca_path", &self.server_ca_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("client_key_path", &self.client_key_path)
            .field("plain_http", &self.plain_http)
            .finish()
    }
}
