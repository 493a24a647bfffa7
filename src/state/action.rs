use crate::models::{AssetType, CancelHandle, FileDescriptor, FileId};

/// Typed actions accepted by [`crate::state::reducer::apply`].
#[derive(Clone, Debug)]
pub enum Action {
    /// Append newly selected files; name collisions are skipped
    Load(Vec<FileDescriptor>),

    /// Queue a batch: ready files followed by failed files to retry
    Submit {
        pending: Vec<FileId>,
        retry: Vec<FileId>,
    },

    /// Promote a pending file to `current` with a fresh cancel handle
    StartNext { id: FileId, cancel: CancelHandle },

    UploadProgress { id: FileId, progress: u8 },

    /// Merge a transport-supplied abort handle into the current file's handle
    SetAbortHandler { id: FileId, handle: CancelHandle },

    FileUploaded { id: FileId, version_ids: Vec<String> },

    UploadError { id: FileId, message: String },

    Cancel(FileId),

    /// Re-queue a failed or cancelled file at the front of `pending`
    Retry(FileId),

    Remove(FileId),

    Select { id: FileId, selected: bool },

    SetAssetType { id: FileId, asset_type: AssetType },

    DiscardFiles { keep_unselected: bool },

    /// Batch drained: clears `uploading`
    UploadComplete,

    FetchStarted,

    /// Reconciliation result: files the server already holds
    FetchFinished(Vec<FileDescriptor>),
}

impl Action {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Load(_) => "LOAD",
            Action::Submit { .. } => "SUBMIT",
            Action::StartNext { .. } => "START_NEXT",
            Action::UploadProgress { .. } => "UPLOAD_PROGRESS",
            Action::SetAbortHandler { .. } => "SET_ABORT_HANDLER",
            Action::FileUploaded { .. } => "FILE_UPLOADED",
            Action::UploadError { .. } => "UPLOAD_ERROR",
            Action::Cancel(_) => "CANCEL",
            Action::Retry(_) => "RETRY",
            Action::Remove(_) => "REMOVE",
            Action::Select { .. } => "SELECT",
            Action::SetAssetType { .. } => "SET_ASSET_TYPE",
            Action::DiscardFiles { .. } => "DISCARD_FILES",
            Action::UploadComplete => "UPLOAD_COMPLETE",
            Action::FetchStarted => "FETCH_STARTED",
            Action::FetchFinished(_) => "FETCH_FINISHED",
        }
    }
}
