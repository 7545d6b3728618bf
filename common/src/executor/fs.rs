// Local file system backed by tokio::fs

use crate::executor::{FileSystem, FileWriter};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

/// LocalFileSystem writes script files into a workspace directory on disk
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    prefix: String,
    suffix: String,
}

impl LocalFileSystem {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new("dostrigger", ".bat")
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    #[instrument(skip(self, content))]
    async fn create_temp_script(&self, dir: &Path, content: &str) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(format!("{}{}{}", self.prefix, Uuid::new_v4().simple(), self.suffix));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %path.display(), bytes = content.len(), "Script file created");
        Ok(path)
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn open_for_write(&self, path: &Path) -> io::Result<FileWriter> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(file))
    }
}
