//! Compiled-in artifacts
//!
//! The provider of last resort: it works with no filesystem and no network.
//! The builtin table is generated by `build.rs` from the `artifacts/`
//! directory (or `SEEDER_EMBEDDED_ARTIFACTS`) at build time.

use crate::provider::{Artifact, ArtifactProvider, Lookup};
use async_trait::async_trait;

/// A static key to blob mapping
pub type EmbeddedTable = &'static [(&'static str, &'static [u8])];

static BUILTIN: EmbeddedTable = include!(concat!(env!("OUT_DIR"), "/embedded_artifacts.rs"));

/// Serves a fixed set of artifacts baked into the binary
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedProvider {
    table: EmbeddedTable,
}

impl EmbeddedProvider {
    /// Serve from an arbitrary static table
    pub const fn new(table: EmbeddedTable) -> Self {
        Self { table }
    }

    /// Serve the artifacts embedded at build time
    pub const fn builtin() -> Self {
        Self::new(BUILTIN)
    }

    /// Keys this provider can serve
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.iter().map(|(key, _)| *key)
    }

    fn find(&self, key: &str) -> Option<&'static [u8]> {
        self.table
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, data)| *data)
    }
}

impl Default for EmbeddedProvider {
    fn default() -> Self {
        Self::builtin()
    }
}

#[async_trait]
impl ArtifactProvider for EmbeddedProvider {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn lookup(&self, key: &str) -> Lookup {
        match self.find(key) {
            Some(data) => Lookup::Found(Artifact::from_static(data)),
            None => Lookup::NotFound,
        }
    }
}
