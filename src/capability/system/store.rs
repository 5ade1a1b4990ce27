//! Artifact store on a local directory

use crate::capability::{ArtifactStore, CapabilityError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct DirArtifactStore {
    dir: PathBuf,
}

impl DirArtifactStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, CapabilityError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CapabilityError::Internal(format!("invalid artifact name '{}'", name)));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl ArtifactStore for DirArtifactStore {
    async fn upload(&self, name: &str, content: &str) -> Result<(), CapabilityError> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir).await?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CapabilityError::AlreadyExists(format!("artifact {}", name)))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<String>, CapabilityError> {
        let path = self.path_for(name)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
