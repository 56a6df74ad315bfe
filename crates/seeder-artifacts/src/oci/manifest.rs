//! OCI manifest model and layer selection

use crate::error::{ArtifactError, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Media type of a plain (uncompressed) OCI image layer
pub const OCI_IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Manifest types we ask the registry for
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.artifact.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json";

/// Content descriptor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// The parts of an image or artifact manifest we use
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub media_type: Option<String>,
    /// Image manifest content
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Artifact manifest content
    #[serde(default)]
    pub blobs: Vec<Descriptor>,
}

impl Manifest {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| ArtifactError::InvalidManifest(e.to_string()))
    }

    /// Immediate content descriptors of the manifest
    pub fn descriptors(&self) -> &[Descriptor] {
        if self.layers.is_empty() {
            &self.blobs
        } else {
            &self.layers
        }
    }

    /// Pick the descriptor holding the artifact
    ///
    /// A single descriptor is returned as is. Otherwise the first plain
    /// image layer wins; anything else means the manifest has no usable
    /// artifact.
    pub fn artifact_layer(&self) -> Option<&Descriptor> {
        let descriptors = self.descriptors();
        if descriptors.len() == 1 {
            return descriptors.first();
        }
        descriptors.iter().find(|d| d.media_type == OCI_IMAGE_LAYER)
    }
}

/// Format a sha256 digest the way registries do
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Check content against an expected `sha256:` digest
///
/// Digests with other algorithms are accepted without checking.
pub fn verify_digest(expected: &str, actual_sha256: &str) -> Result<()> {
    if expected.starts_with("sha256:") && expected != actual_sha256 {
        return Err(ArtifactError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual_sha256.to_string(),
        });
    }
    Ok(())
}
