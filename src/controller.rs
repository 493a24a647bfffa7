// Ingest controller - the batch submission API
//
// Wraps a TransferStore with the operations a view calls: load, submit,
// start, retry, cancel, remove, reclassify, select, discard, reconcile.
// Every operation checks its precondition first and reports a typed error
// instead of dispatching an action the reducer would ignore.

use crate::models::{AssetType, FileDescriptor, FileId, FileStatus, RawFile, TransferState};
use crate::services::classify::{AssetClassifier, ClassifyError};
use crate::services::reconcile::Reconciler;
use crate::state::{Action, StateChange, TransferStore};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Unknown file {0}")]
    UnknownFile(FileId),

    #[error("Cannot {operation} {name}: file is {status}")]
    InvalidState {
        name: String,
        status: FileStatus,
        operation: &'static str,
    },

    #[error("A batch is already uploading")]
    BatchInProgress,

    #[error("No ready or failed files to submit")]
    NothingToSubmit,

    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

/// Outcome of [`IngestController::load_files`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: Vec<FileId>,
    /// Names already present in the session (or repeated in the batch)
    pub duplicates: Vec<String>,
    /// Disallowed file kinds, never loaded
    pub rejected: Vec<ClassifyError>,
}

/// Per-status counts once a batch drains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    fn from_state(state: &TransferState) -> Self {
        Self {
            uploaded: state.count_with_status(FileStatus::Complete),
            failed: state.count_with_status(FileStatus::Failed),
            cancelled: state.count_with_status(FileStatus::Cancelled),
        }
    }
}

/// Caller-facing operations on one ingestion session.
///
/// # Example
/// ```ignore
/// let store = TransferStore::new().with_event_bus(bus.clone());
/// let driver = QueueDriver::new(store.clone(), uploader).spawn();
/// let controller = IngestController::new(store, AssetClassifier::new(&config)?);
///
/// controller.load_files(files);
/// controller.submit()?;
/// let summary = controller.wait_for_batch().await;
/// ```
#[derive(Clone)]
pub struct IngestController {
    store: TransferStore,
    classifier: AssetClassifier,
}

impl IngestController {
    pub fn new(store: TransferStore, classifier: AssetClassifier) -> Self {
        Self { store, classifier }
    }

    pub fn store(&self) -> &TransferStore {
        &self.store
    }

    /// Classify and load newly selected files.
    ///
    /// Disallowed kinds never reach the store. Files whose name is already in
    /// the session are refused and reported, not merged.
    pub fn load_files(&self, files: Vec<RawFile>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut descriptors = Vec::with_capacity(files.len());

        for raw in files {
            match self.classifier.classify(&raw) {
                Ok(asset_type) => descriptors.push(FileDescriptor::new(raw, asset_type)),
                Err(e) => {
                    tracing::warn!("Rejected file: {}", e);
                    report.rejected.push(e);
                }
            }
        }

        if descriptors.is_empty() {
            return report;
        }

        let candidates: Vec<(FileId, String)> =
            descriptors.iter().map(|f| (f.id, f.name.clone())).collect();
        self.store.dispatch(Action::Load(descriptors));

        // The reducer is the authority on what got in
        let loaded: HashSet<FileId> = self.store.read(|s| {
            candidates
                .iter()
                .filter(|(id, _)| s.files.contains_key(id))
                .map(|(id, _)| *id)
                .collect()
        });
        for (id, name) in candidates {
            if loaded.contains(&id) {
                report.accepted.push(id);
            } else {
                tracing::warn!("{} is already loaded; skipping duplicate", name);
                report.duplicates.push(name);
            }
        }

        tracing::info!(
            "Loaded {} files ({} duplicates, {} rejected)",
            report.accepted.len(),
            report.duplicates.len(),
            report.rejected.len()
        );
        report
    }

    /// Queue every ready file plus every failed file for a new batch.
    ///
    /// # Returns
    /// The number of files queued
    pub fn submit(&self) -> Result<usize, ControllerError> {
        let (uploading, (ready, retry)) = self.store.read(|s| (s.uploading, s.submittable()));
        if uploading {
            return Err(ControllerError::BatchInProgress);
        }
        if ready.is_empty() && retry.is_empty() {
            tracing::warn!("Submit requested with no ready or failed files");
            return Err(ControllerError::NothingToSubmit);
        }

        // Counted from this dispatch; the driver may start the head right after it
        let queued = self
            .store
            .dispatch(Action::Submit {
                pending: ready,
                retry,
            })
            .into_iter()
            .find_map(|change| match change {
                StateChange::BatchStarted { queued } => Some(queued),
                _ => None,
            });
        let Some(queued) = queued else {
            // Someone else changed the session between the check and the dispatch
            return Err(if self.store.read(|s| s.uploading) {
                ControllerError::BatchInProgress
            } else {
                ControllerError::NothingToSubmit
            });
        };
        tracing::info!("Submitted batch of {} files", queued);
        Ok(queued)
    }

    /// Upload a single file as its own batch.
    pub fn start_upload(&self, id: FileId) -> Result<(), ControllerError> {
        let (status, uploading) = self.require(id, |s| s.uploading)?;
        if !status.can_start() {
            return Err(self.invalid(id, status, "start"));
        }
        if uploading {
            return Err(ControllerError::BatchInProgress);
        }

        let (pending, retry) = if status == FileStatus::Ready {
            (vec![id], vec![])
        } else {
            (vec![], vec![id])
        };
        self.store.dispatch(Action::Submit { pending, retry });
        Ok(())
    }

    /// Re-queue a failed or cancelled file ahead of everything pending.
    pub fn retry_upload(&self, id: FileId) -> Result<(), ControllerError> {
        let (status, ()) = self.require(id, |_| ())?;
        if !status.is_retryable() {
            return Err(self.invalid(id, status, "retry"));
        }
        tracing::info!("Retrying {}", self.name_of(id));
        self.store.dispatch(Action::Retry(id));
        Ok(())
    }

    /// Abort the in-flight transfer of `id`.
    pub fn cancel_upload(&self, id: FileId) -> Result<(), ControllerError> {
        let (status, ()) = self.require(id, |_| ())?;
        if status != FileStatus::Uploading {
            return Err(self.invalid(id, status, "cancel"));
        }
        tracing::info!("Cancelling {}", self.name_of(id));
        self.store.dispatch(Action::Cancel(id));
        Ok(())
    }

    /// Cancel whatever is uploading right now, if anything.
    ///
    /// # Returns
    /// The id of the cancelled file
    pub fn cancel_current(&self) -> Option<FileId> {
        let current = self.store.read(|s| s.current)?;
        self.cancel_upload(current).ok().map(|()| current)
    }

    pub fn remove_upload(&self, id: FileId) -> Result<(), ControllerError> {
        let (status, ()) = self.require(id, |_| ())?;
        if status == FileStatus::Uploading {
            return Err(self.invalid(id, status, "remove"));
        }
        self.store.dispatch(Action::Remove(id));
        Ok(())
    }

    pub fn change_asset_type(
        &self,
        id: FileId,
        asset_type: AssetType,
    ) -> Result<(), ControllerError> {
        let (status, ()) = self.require(id, |_| ())?;
        if matches!(status, FileStatus::Uploading | FileStatus::Complete) {
            return Err(self.invalid(id, status, "change the asset type of"));
        }
        if !self.classifier.accepts(asset_type) {
            return Err(ClassifyError::Disallowed {
                name: self.name_of(id),
                asset_type,
            }
            .into());
        }
        self.store.dispatch(Action::SetAssetType { id, asset_type });
        Ok(())
    }

    /// Mark a completed file for (or exclude it from) downstream processing.
    pub fn set_selected(&self, id: FileId, selected: bool) -> Result<(), ControllerError> {
        let (status, ()) = self.require(id, |_| ())?;
        if status != FileStatus::Complete {
            return Err(self.invalid(id, status, "select"));
        }
        self.store.dispatch(Action::Select { id, selected });
        Ok(())
    }

    /// Reset the session, cancelling any transfer in flight.
    pub fn discard(&self, keep_unselected: bool) {
        tracing::info!("Discarding session (keep unselected: {})", keep_unselected);
        self.store.dispatch(Action::DiscardFiles { keep_unselected });
    }

    /// Fetch files the server already holds, in the background.
    ///
    /// A failed fetch is logged and treated as an empty result.
    pub fn reconcile(&self, reconciler: Arc<dyn Reconciler>) -> JoinHandle<()> {
        self.store.dispatch(Action::FetchStarted);
        let store = self.store.clone();
        let fetch = reconciler.fetch_uploaded();

        tokio::spawn(async move {
            let files = match fetch.await {
                Ok(files) => {
                    tracing::info!("Reconciliation found {} uploaded files", files.len());
                    files
                }
                Err(e) => {
                    tracing::warn!("Reconciliation failed, continuing without it: {}", e);
                    Vec::new()
                }
            };
            store.dispatch(Action::FetchFinished(files));
        })
    }

    /// Wait until the batch in flight drains. Returns at once if none is.
    pub async fn wait_for_batch(&self) -> BatchSummary {
        let mut rx = self.store.subscribe();
        loop {
            if let Some(summary) = self
                .store
                .read(|s| (!s.uploading).then(|| BatchSummary::from_state(s)))
            {
                return summary;
            }

            match rx.recv().await {
                Ok(StateChange::BatchCompleted {
                    uploaded,
                    failed,
                    cancelled,
                }) => {
                    return BatchSummary {
                        uploaded,
                        failed,
                        cancelled,
                    };
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    return self.store.read(BatchSummary::from_state);
                }
            }
        }
    }

    /// Status of `id` plus whatever else `f` reads from the same snapshot.
    fn require<T>(
        &self,
        id: FileId,
        f: impl FnOnce(&TransferState) -> T,
    ) -> Result<(FileStatus, T), ControllerError> {
        self.store.read(|s| match s.status_of(&id) {
            Some(status) => Ok((status, f(s))),
            None => Err(ControllerError::UnknownFile(id)),
        })
    }

    fn name_of(&self, id: FileId) -> String {
        self.store
            .read(|s| s.file(&id).map(|f| f.name.clone()))
            .unwrap_or_else(|| id.to_string())
    }

    fn invalid(&self, id: FileId, status: FileStatus, operation: &'static str) -> ControllerError {
        ControllerError::InvalidState {
            name: self.name_of(id),
            status,
            operation,
        }
    }
}
