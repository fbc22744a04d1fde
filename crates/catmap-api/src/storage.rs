use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// 10 MB upload limit for cat pictures
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// On-disk storage for uploaded pictures.
///
/// Each upload is stored flat at `{dir}/{uuid}.{ext}`; the generated name is
/// what gets recorded on the cat and served under `/uploads/`.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        info!("Upload directory: {}", self.dir.display());
        Ok(())
    }

    /// Write an upload under a fresh name and return that name.
    pub async fn save(&self, original_name: Option<&str>, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            bail!("empty upload");
        }
        if data.len() > MAX_UPLOAD_SIZE {
            bail!("upload exceeds {} bytes", MAX_UPLOAD_SIZE);
        }

        let filename = match original_name.and_then(extension) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&filename);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        info!("Stored upload {} ({} bytes)", filename, data.len());
        Ok(filename)
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        // names come from save(); anything else never touches the disk
        if filename.contains(['/', '\\']) || filename.starts_with('.') {
            bail!("refusing to delete '{}'", filename);
        }

        match fs::remove_file(self.dir.join(filename)).await {
            Ok(()) => {
                info!("Deleted upload {}", filename);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Upload {} already gone", filename);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lowercased alphanumeric extension of a client-supplied file name.
fn extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
