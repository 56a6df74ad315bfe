//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading or writing the configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be read from disk
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or doesn't match the schema
    #[error("Failed to parse config: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::Read {
            path: PathBuf::from("/etc/seeder/config.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read config /etc/seeder/config.yaml: no such file"
        );

        let parse = serde_yaml::from_str::<u32>("nope").unwrap_err();
        assert!(ConfigError::Parse(parse).to_string().starts_with("Failed to parse config"));
    }
}
