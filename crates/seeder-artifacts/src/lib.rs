//! Seeder artifact providers
//!
//! Boot artifacts (installer stages, the provisioning agent) are resolved
//! by key from one or more backends:
//!
//! - [`FilesystemProvider`]: files under a local directory
//! - [`EmbeddedProvider`]: blobs compiled into the binary
//! - [`OciProvider`]: `<namespace>/<key>:latest` in an OCI registry
//!
//! A [`ProviderChain`] tries them in order and returns the first hit.
//! Lookups never fail: a provider that can't serve a key, for whatever
//! reason, logs the cause and reports the artifact as absent.
//!
//! # Example
//!
//! ```ignore
//! use seeder_artifacts::{ArtifactProvider, EmbeddedProvider, FilesystemProvider, ProviderChain};
//! use std::sync::Arc;
//!
//! let chain = ProviderChain::new(vec![
//!     Arc::new(FilesystemProvider::new("/var/lib/seeder/artifacts")),
//!     Arc::new(EmbeddedProvider::builtin()),
//! ]);
//!
//! if let Some(artifact) = chain.get("stage0-x86_64").await {
//!     let bytes = artifact.into_bytes().await?;
//! }
//! ```

pub mod chain;
pub mod embedded;
pub mod error;
pub mod fs;
pub mod keys;
pub mod oci;
pub mod provider;

pub use chain::ProviderChain;
pub use embedded::{EmbeddedProvider, EmbeddedTable};
pub use error::{ArtifactError, Result};
pub use fs::FilesystemProvider;
pub use keys::{agent_key, all_keys, stage_key, Arch, Stage};
pub use oci::{Credentials, OciProvider, OciProviderConfig};
pub use provider::{Artifact, ArtifactProvider, Lookup};
