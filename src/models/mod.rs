//! Data models for the uploader.
//!
//! - [`FileDescriptor`]: one selected file and its transfer lifecycle
//! - [`TransferState`]: the session's files, pending queue and bookkeeping sets
//! - [`UploaderConfig`]: settings loaded from `Uploader.yaml`
//! - [`MAX_CONCURRENT_TRANSFERS`]: the single-flight limit (always 1)
//!
//! # Architecture Note
//!
//! `TransferState` is wrapped in `Arc<RwLock<>>` by [`TransferStore`](crate::state::TransferStore)
//! and only changes through the reducer, so every mutation produces change events.

pub mod config;
pub mod file;
pub mod transfer_state;

pub use config::UploaderConfig;
pub use file::{AssetType, CancelHandle, FileDescriptor, FileId, FileStatus, RawFile};
pub use transfer_state::{FailedUpload, MAX_CONCURRENT_TRANSFERS, TransferState};
