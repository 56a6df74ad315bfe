//! The artifact provider abstraction
//!
//! A provider resolves a key to a byte stream or reports absence. Absence
//! is silent and carries no cause; the cause is logged here, once, so the
//! chain never has to interpret error types.

use crate::error::ArtifactError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// A resolved artifact: an owned byte stream plus an optional length hint
///
/// Dropping the artifact releases whatever backs it (open file, anonymous
/// temp file, static slice).
pub struct Artifact {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    len: Option<u64>,
}

impl Artifact {
    /// Wrap any async reader
    pub fn from_reader(reader: impl AsyncRead + Send + 'static, len: Option<u64>) -> Self {
        Self {
            reader: Box::pin(reader),
            len,
        }
    }

    /// Serve a static slice (compiled-in artifacts)
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::from_reader(Cursor::new(data), Some(data.len() as u64))
    }

    /// Serve an owned buffer
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self::from_reader(Cursor::new(data), Some(len))
    }

    /// Length in bytes, when the backend knows it up front
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    /// Hand out the underlying stream
    pub fn into_reader(self) -> Pin<Box<dyn AsyncRead + Send>> {
        self.reader
    }

    /// Read the whole artifact into memory
    pub async fn into_bytes(mut self) -> std::io::Result<Bytes> {
        let mut buf = Vec::with_capacity(self.len.unwrap_or(0) as usize);
        self.reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Outcome of a single provider lookup
///
/// Keeps "not there" and "broken" apart for the logs. Callers outside a
/// provider only ever see [`ArtifactProvider::get`].
#[derive(Debug)]
pub enum Lookup {
    Found(Artifact),
    NotFound,
    Failed(ArtifactError),
}

/// Trait for resolving boot artifacts by key
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Resolve a key, keeping the reason for absence
    async fn lookup(&self, key: &str) -> Lookup;

    /// Resolve a key to an artifact, or `None` if this provider can't serve it
    ///
    /// Never fails: errors are logged and reported as absent.
    async fn get(&self, key: &str) -> Option<Artifact> {
        match self.lookup(key).await {
            Lookup::Found(artifact) => Some(artifact),
            Lookup::NotFound => {
                debug!(provider = %self.name(), key = %key, "Artifact not found");
                None
            }
            Lookup::Failed(e) => {
                warn!(provider = %self.name(), key = %key, error = %e, "Artifact lookup failed, treating as not found");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl ArtifactProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn lookup(&self, _key: &str) -> Lookup {
            Lookup::Failed(ArtifactError::InvalidKey("nope".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_is_absent() {
        assert!(Broken.get("stage0-x86_64").await.is_none());
    }

    #[tokio::test]
    async fn test_artifact_from_bytes() {
        let artifact = Artifact::from_bytes(vec![1u8, 2, 3]);
        assert_eq!(artifact.len(), Some(3));
        assert_eq!(&artifact.into_bytes().await.unwrap()[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_artifact_from_static() {
        static DATA: &[u8] = b"stage0";
        let artifact = Artifact::from_static(DATA);
        assert_eq!(artifact.len(), Some(6));
        assert_eq!(&artifact.into_bytes().await.unwrap()[..], DATA);
    }
}
