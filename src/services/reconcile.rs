use crate::models::{AssetType, FileDescriptor, RawFile};
use crate::services::directory::PARTIAL_SUFFIX;
use crate::services::upload::BoxFuture;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to list {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reconciliation failed: {0}")]
    Remote(String),
}

/// Source of files the server already holds for this session
/// (uploaded earlier but not yet ingested).
///
/// The future is `'static` so it can run on its own task.
#[cfg_attr(test, mockall::automock)]
pub trait Reconciler: Send + Sync {
    fn fetch_uploaded(&self) -> BoxFuture<'static, Result<Vec<FileDescriptor>, ReconcileError>>;
}

/// Lists what a previous session already copied into the drop directory.
#[derive(Debug, Clone)]
pub struct DropDirReconciler {
    drop_dir: Utf8PathBuf,
}

impl DropDirReconciler {
    pub fn new(drop_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            drop_dir: drop_dir.into(),
        }
    }
}

impl Reconciler for DropDirReconciler {
    fn fetch_uploaded(&self) -> BoxFuture<'static, Result<Vec<FileDescriptor>, ReconcileError>> {
        let drop_dir = self.drop_dir.clone();
        Box::pin(async move { scan_drop_dir(&drop_dir).await })
    }
}

async fn scan_drop_dir(drop_dir: &Utf8Path) -> Result<Vec<FileDescriptor>, ReconcileError> {
    if !fs::try_exists(drop_dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for asset_type in AssetType::ALL {
        let dir = drop_dir.join(asset_type.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(ReconcileError::Io { path: dir, source }),
        };

        let mut batch = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| ReconcileError::Io {
                path: dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };

            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                tracing::warn!("Skipping non UTF-8 path in {}", dir);
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            let raw = RawFile::new(path, metadata.len());
            if raw.name.ends_with(PARTIAL_SUFFIX) {
                tracing::debug!("Skipping unfinished copy {}", raw.path);
                continue;
            }
            let version_id = format!("{}/{}", asset_type.as_str(), raw.name);
            batch.push(FileDescriptor::already_uploaded(raw, asset_type, vec![version_id]));
        }
        // read_dir order is platform dependent
        batch.sort_by(|a, b| a.name.cmp(&b.name));
        found.extend(batch);
    }

    tracing::debug!("Found {} previously uploaded files in {}", found.len(), drop_dir);
    Ok(found)
}
