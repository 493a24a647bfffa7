//! Services module - the collaborators the queue sits between.
//!
//! Nothing here touches the transfer store directly. The queue driver and the
//! ingest controller call into these and turn the results into actions.
//!
//! # Components
//!
//! - [`UploadCall`]: the opaque transport contract that moves one file's bytes.
//!   Progress and abort-handle callbacks travel through an [`UploadContext`];
//!   the outcome is an [`UploadReceipt`] or an [`UploadError`].
//!
//! - [`DirectoryUploader`]: an `UploadCall` that copies files in chunks into a
//!   drop directory (used by the CLI and by tests).
//!
//! - [`AssetClassifier`]: extension-to-asset-type mapping plus the disallowed
//!   file kinds that are rejected before they reach the store.
//!
//! - [`Reconciler`]: the session-start fetch of files the server already holds.
//!   [`DropDirReconciler`] answers it from the drop directory.

pub mod classify;
pub mod directory;
pub mod reconcile;
pub mod upload;

pub use classify::{AssetClassifier, ClassifyError};
pub use directory::DirectoryUploader;
pub use reconcile::{DropDirReconciler, ReconcileError, Reconciler};
pub use upload::{
    BoxFuture, UploadCall, UploadContext, UploadError, UploadReceipt, UploadRequest, UploadSignal,
    UploadStatus, normalize,
};
