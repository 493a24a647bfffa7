use crate::models::CancelHandle;
use crate::models::config::DEFAULT_CHUNK_SIZE;
use crate::services::upload::{
    BoxFuture, UploadCall, UploadContext, UploadError, UploadReceipt, UploadRequest,
};
use camino::{Utf8Path, Utf8PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Suffix of a copy still in progress. Reconciliation ignores these.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Transport that "uploads" by copying into a drop directory watched by the
/// ingestion pipeline.
///
/// Files are written to `<drop_dir>/<asset_type>/<name>.part` and renamed to
/// `<name>` once complete; the relative path is the version id. A cancelled
/// or failed copy leaves no partial file behind, even when the upload future
/// is dropped mid-copy.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    drop_dir: Utf8PathBuf,
    chunk_size: usize,
}

/// Removes the partial file on drop unless the copy was committed.
struct PartialFile {
    path: Utf8PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    async fn commit(mut self, dest: &Utf8Path) -> Result<(), UploadError> {
        fs::rename(&self.path, dest).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Runs on drop, so it cannot await
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed partial file {}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove partial file {}: {}", self.path, e),
        }
    }
}

impl DirectoryUploader {
    pub fn new(drop_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            drop_dir: drop_dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Destination for a request, relative to the drop directory.
    pub fn relative_destination(request: &UploadRequest) -> Utf8PathBuf {
        Utf8PathBuf::from(request.asset_type.as_str()).join(&request.name)
    }

    async fn copy(
        &self,
        request: &UploadRequest,
        dest: &Utf8Path,
        ctx: &UploadContext,
    ) -> Result<u64, UploadError> {
        let mut source = fs::File::open(&request.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                UploadError::NotFound(request.path.clone())
            } else {
                UploadError::Io(e)
            }
        })?;
        // Size on disk wins over what was recorded at load time
        let total = source.metadata().await?.len();

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Declared before the target so the handle closes first on drop
        let partial = PartialFile::new(Utf8PathBuf::from(format!("{}{}", dest, PARTIAL_SUFFIX)));
        let mut target = fs::File::create(&partial.path).await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut loaded = 0u64;
        ctx.report_progress(loaded, total);

        loop {
            if ctx.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n]).await?;
            loaded += n as u64;
            ctx.report_progress(loaded, total);
        }

        target.flush().await?;
        target.sync_all().await?;
        drop(target);
        partial.commit(dest).await?;
        Ok(loaded)
    }
}

impl UploadCall for DirectoryUploader {
    fn upload(
        &self,
        request: UploadRequest,
        ctx: UploadContext,
    ) -> BoxFuture<'_, Result<UploadReceipt, UploadError>> {
        Box::pin(async move {
            let relative = Self::relative_destination(&request);
            let dest = self.drop_dir.join(&relative);

            let abort = ctx.cancellation().child_token();
            ctx.set_abort_handle(CancelHandle::new(abort.clone()));

            let result = tokio::select! {
                result = self.copy(&request, &dest, &ctx) => result,
                _ = abort.cancelled() => Err(UploadError::Cancelled),
            };

            let bytes = result?;
            tracing::debug!("Copied {} bytes of {} to {}", bytes, request.name, dest);
            Ok(UploadReceipt::success(vec![relative.to_string()]))
        })
    }
}
