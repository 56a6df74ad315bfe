//! Filesystem-backed provider
//!
//! Serves `<base_dir>/<key>`. A missing file and an unreadable one look the
//! same to the caller; only the log line differs.

use crate::error::ArtifactError;
use crate::provider::{Artifact, ArtifactProvider, Lookup};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Serves artifacts from files under a base directory
#[derive(Debug, Clone)]
pub struct FilesystemProvider {
    base_dir: PathBuf,
    name: String,
}

impl FilesystemProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let name = format!("fs:{}", base_dir.display());
        Self { base_dir, name }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Join a key onto the base directory without escaping it
    fn resolve(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl ArtifactProvider for FilesystemProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &str) -> Lookup {
        let path = match self.resolve(key) {
            Ok(path) => path,
            Err(e) => return Lookup::Failed(e),
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Lookup::NotFound,
            Err(e) => return Lookup::Failed(e.into()),
        };

        match file.metadata().await {
            Ok(meta) if meta.is_file() => Lookup::Found(Artifact::from_reader(file, Some(meta.len()))),
            Ok(_) => Lookup::Failed(ArtifactError::NotAFile(path)),
            Err(e) => Lookup::Failed(e.into()),
        }
    }
}
