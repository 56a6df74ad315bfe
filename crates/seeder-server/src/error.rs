//! Error types for the seeder server

use crate::seeder::State;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, starting or operating a [`Seeder`](crate::Seeder)
///
/// Construction and `start()` return the fatal variants. `Accept`, `Signing`
/// and the `Registration*` variants are operational: they are reported on
/// the error channel and only affect the connection or request that hit
/// them.
#[derive(Debug, Error)]
pub enum SeederError {
    /// A configured listen address is not a socket address
    #[error("Invalid bind address '{address}': {reason}")]
    InvalidBindAddress { address: String, reason: String },

    /// Failed to bind a listener socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Server TLS material is missing, inconsistent or unusable
    #[error("TLS error: {0}")]
    Tls(String),

    /// The config signing key or certificate is unusable
    #[error("Signing material error: {0}")]
    SigningMaterial(String),

    /// Inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A referenced file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection failed
    #[error("Accept failed on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Signing an embedded config failed at request time
    #[error("Signing failed: {0}")]
    Signing(String),

    /// An embedded config failed verification
    #[error("Verification failed: {0}")]
    Verification(String),

    /// A registration request could not be processed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// A device resubmitted with a different CSR than the one on record
    #[error("Registration conflict: device {device_id} is already registered with another CSR")]
    RegistrationConflict { device_id: String },

    /// The registration book is at capacity
    #[error("Registration rejected: {capacity} devices already on record")]
    RegistrationFull { capacity: usize },

    /// Lifecycle operation not allowed in the current state
    #[error("Cannot {operation} seeder in state {state}")]
    InvalidState { operation: &'static str, state: State },
}

impl SeederError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SeederError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for seeder operations
pub type Result<T> = std::result::Result<T, SeederError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SeederError::InvalidBindAddress {
            address: "localhost".to_string(),
            reason: "invalid socket address syntax".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid bind address 'localhost': invalid socket address syntax"
        );

        let err = SeederError::InvalidState {
            operation: "start",
            state: State::Stopped,
        };
        assert_eq!(err.to_string(), "Cannot start seeder in state stopped");

        let err = SeederError::io(
            "/etc/seeder/ca.pem",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "Failed to read /etc/seeder/ca.pem: gone");

        let err = SeederError::RegistrationConflict {
            device_id: "leaf-01".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Registration conflict: device leaf-01 is already registered with another CSR"
        );
    }
}
