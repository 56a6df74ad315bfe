//! Seeder configuration
//!
//! The seeder is configured by a single YAML document. This crate owns its
//! schema and the load/save helpers; validation of the referenced files
//! (keys, certificates, CA bundles) happens when the server is built.
//!
//! ```yaml
//! servers:
//!   insecure:
//!     address: ["0.0.0.0:80"]
//!   secure:
//!     address: ["0.0.0.0:443"]
//!     server_key: /etc/seeder/tls/server.key
//!     server_cert: /etc/seeder/tls/server.pem
//! embedded_config_generator:
//!   key_path: /etc/seeder/signing/config.key
//!   cert_path: /etc/seeder/signing/config.pem
//! artifact_providers:
//!   directories: [/var/lib/seeder/artifacts]
//! ```

pub mod error;
mod reference;
pub mod types;

pub use error::{ConfigError, Result};
pub use types::*;

use std::path::Path;
use tracing::debug;

/// Where the binary looks for its configuration by default
pub const DEFAULT_CONFIG_PATH: &str = "/etc/seeder/config.yaml";

impl SeederConfig {
    /// Read and parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&contents)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(ConfigError::Parse)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Serialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_reference_round_trips() {
        let reference = SeederConfig::reference();
        let yaml = reference.to_yaml().unwrap();
        assert_eq!(SeederConfig::from_yaml(&yaml).unwrap(), reference);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(SeederConfig::from_yaml("{}").unwrap(), SeederConfig::default());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = SeederConfig::from_yaml(
            r#"
servers:
  insecure:
    address: ["127.0.0.1:8080"]
artifact_providers:
  oci_registries:
    - url: oci://localhost:5000/boot
      plain_http: true
"#,
        )
        .unwrap();

        let insecure = config.servers.insecure.unwrap();
        assert_eq!(insecure.address, vec!["127.0.0.1:8080"]);
        assert!(!insecure.is_tls());
        assert!(config.servers.secure.is_none());
        assert!(!config.registry_settings.auto_approves());

        let registry = &config.artifact_providers.oci_registries[0];
        assert!(registry.plain_http);
        assert!(registry.username.is_none());
        assert!(config.artifact_providers.directories.is_empty());
        assert_eq!(config.embedded_config_generator.key_path, PathBuf::new());
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(matches!(
            SeederConfig::from_yaml("servers: [not, a, map]"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SeederConfig::from_yaml("servres: {}"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SeederConfig::from_yaml("servers:\n  insecure:\n    address: \"0.0.0.0:80\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SeederConfig::reference().to_yaml().unwrap().as_bytes())
            .unwrap();

        let config = SeederConfig::load(file.path()).unwrap();
        assert_eq!(config, SeederConfig::reference());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");

        match SeederConfig::load(&path) {
            Err(ConfigError::Read { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
