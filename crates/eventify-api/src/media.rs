use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Largest banner accepted from an upload.
pub const MAX_BANNER_BYTES: usize = 5 * 1024 * 1024;

/// A stored banner: `id` is the handle used to delete it later, `url` is
/// what clients load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub id: String,
    pub url: String,
}

/// External image store for event banners.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(&self, data: Bytes, content_type: Option<&str>) -> Result<StoredAsset>;

    /// Deleting an asset that no longer exists is not an error.
    async fn delete(&self, asset_id: &str) -> Result<()>;
}

/// Banners as flat files at `{dir}/{asset_id}`, served back under
/// `{public_base}/uploads/`.
pub struct DiskMediaStore {
    dir: PathBuf,
    public_base: String,
}

impl DiskMediaStore {
    pub async fn new(dir: PathBuf, public_base: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    fn asset_path(&self, asset_id: &str) -> Result<PathBuf> {
        let valid = !asset_id.is_empty()
            && asset_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            && !asset_id.starts_with('.');
        if !valid {
            bail!("Invalid asset id '{}'", asset_id);
        }
        Ok(self.dir.join(asset_id))
    }
}

#[async_trait]
impl MediaStore for DiskMediaStore {
    async fn store(&self, data: Bytes, content_type: Option<&str>) -> Result<StoredAsset> {
        if data.len() > MAX_BANNER_BYTES {
            bail!("Banner exceeds {} bytes", MAX_BANNER_BYTES);
        }

        let id = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        let path = self.asset_path(&id)?;
        fs::write(&path, &data).await?;

        info!("Stored banner {} ({} bytes)", id, data.len());
        Ok(StoredAsset {
            url: format!("{}/uploads/{}", self.public_base, id),
            id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<()> {
        let path = self.asset_path(asset_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted banner {}", asset_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Banner {} already gone", asset_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("image/png") => "png",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "bin",
    }
}
