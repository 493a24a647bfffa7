//! The Upload Call contract.
//!
//! An [`UploadCall`] moves one file's bytes to the ingestion endpoint. The
//! queue driver treats it as opaque: it hands over an [`UploadRequest`] and an
//! [`UploadContext`], and waits for an [`UploadReceipt`]. Anything other than
//! a successful receipt becomes a single failure message (see [`normalize`]).

use crate::models::{AssetType, CancelHandle, FileDescriptor, FileId};
use camino::Utf8PathBuf;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transport that uploads a single file.
///
/// Implementations should report progress through the context and stop
/// promptly once [`UploadContext::is_cancelled`] turns true.
pub trait UploadCall: Send + Sync {
    fn upload(
        &self,
        request: UploadRequest,
        ctx: UploadContext,
    ) -> BoxFuture<'_, Result<UploadReceipt, UploadError>>;
}

/// What to upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    pub id: FileId,
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
    pub asset_type: AssetType,
    pub owner: Option<String>,
}

impl From<&FileDescriptor> for UploadRequest {
    fn from(file: &FileDescriptor) -> Self {
        Self {
            id: file.id,
            name: file.name.clone(),
            path: file.path.clone(),
            size: file.size,
            asset_type: file.asset_type,
            owner: file.owner.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    Success,
    Failed,
}

/// Result reported by the endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: UploadStatus,
    pub version_ids: Vec<String>,
    pub error: Option<String>,
}

impl UploadReceipt {
    pub fn success(version_ids: Vec<String>) -> Self {
        Self {
            status: UploadStatus::Success,
            version_ids,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Failed,
            version_ids: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Source file not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Upload cancelled")]
    Cancelled,
}

/// Callback notifications from an in-flight upload.
#[derive(Clone, Debug)]
pub enum UploadSignal {
    Progress { loaded: u64, total: u64 },
    AbortHandle(CancelHandle),
}

type SignalSink = Arc<dyn Fn(UploadSignal) + Send + Sync>;

/// Per-call handle given to the transport: the progress and abort-handle
/// callbacks plus a cooperative cancellation token.
#[derive(Clone)]
pub struct UploadContext {
    cancel: CancellationToken,
    sink: SignalSink,
}

impl UploadContext {
    pub fn new<F>(cancel: CancellationToken, sink: F) -> Self
    where
        F: Fn(UploadSignal) + Send + Sync + 'static,
    {
        Self {
            cancel,
            sink: Arc::new(sink),
        }
    }

    /// Context whose callbacks go nowhere.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self::new(cancel, |_| {})
    }

    /// Context whose callbacks are collected on a channel.
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<UploadSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Self::new(cancel, move |signal| {
            let _ = tx.send(signal);
        });
        (ctx, rx)
    }

    pub fn report_progress(&self, loaded: u64, total: u64) {
        (self.sink)(UploadSignal::Progress { loaded, total });
    }

    /// Hand the driver a handle that aborts the underlying request.
    pub fn set_abort_handle(&self, handle: CancelHandle) {
        (self.sink)(UploadSignal::AbortHandle(handle));
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for UploadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadContext")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Collapse a call outcome to version ids or one human-readable message.
pub fn normalize(result: Result<UploadReceipt, UploadError>) -> Result<Vec<String>, String> {
    match result {
        Ok(receipt) if receipt.status == UploadStatus::Success => Ok(receipt.version_ids),
        Ok(receipt) => Err(receipt
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "Upload failed".to_string())),
        Err(e) => Err(e.to_string()),
    }
}
