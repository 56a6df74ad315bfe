//! Seeder server
//!
//! Serves installer stages, the provisioning agent and signed stage
//! configuration over an insecure (plain HTTP) and a secure (TLS,
//! optionally mutual TLS) listener.
//!
//! # Routes
//!
//! | Route | Response |
//! |---|---|
//! | `GET /onie` | stage0 for the `ONIE-ARCH` header, with signed config |
//! | `GET /stage{0,1,2}/{arch}` | stage artifact with signed config trailer |
//! | `GET /agent/{arch}` | agent binary |
//! | `GET /config/{stage}/{arch}` | signed config envelope (JSON) |
//! | `POST /register` | submit a device CSR |
//! | `GET /register/{device_id}` | registration status |
//!
//! # Example
//!
//! ```ignore
//! let config = SeederConfig::load("/etc/seeder/config.yaml")?;
//! let chain = Arc::new(build_chain(&config.artifact_providers)?);
//! let seeder = Seeder::new(&config, chain)?;
//! seeder.start().await?;
//! // ...
//! seeder.stop(Duration::from_secs(60)).await;
//! ```

pub mod embedded;
pub mod error;
pub mod installer;
pub mod listener;
pub mod providers;
pub mod registration;
mod routes;
pub mod seeder;
mod tls;

#[cfg(test)]
mod test_support;

pub use embedded::{EmbeddedConfig, EmbeddedConfigGenerator, SignatureAlgorithm, TRAILER_MAGIC};
pub use error::{Result, SeederError};
pub use installer::{Installer, StageConfig, StageRoute};
pub use listener::ListenerKind;
pub use providers::build_chain;
pub use registration::{Registrar, RegistrationRequest, RegistrationStatus};
pub use routes::ONIE_ARCH_HEADER;
pub use seeder::{LocalAddr, Seeder, State, StopOutcome};
