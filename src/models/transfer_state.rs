use crate::models::file::{FileDescriptor, FileId, FileStatus};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;

/// Maximum number of transfers in flight at once.
///
/// The queue is single-flight: `current` holds at most one id, which bounds
/// client bandwidth and server load without a semaphore.
pub const MAX_CONCURRENT_TRANSFERS: usize = 1;

/// Last failure recorded for a file, kept so a later submit can re-offer it.
#[derive(Clone, Debug)]
pub struct FailedUpload {
    pub message: String,
    pub snapshot: FileDescriptor,
}

/// Authoritative state of one ingestion session.
///
/// Never mutate directly; go through [`crate::state::TransferStore::dispatch`],
/// which runs [`crate::state::reducer::apply`].
#[derive(Clone, Debug, Default)]
pub struct TransferState {
    /// Loaded files in insertion order
    pub files: IndexMap<FileId, FileDescriptor>,

    /// Files waiting for transfer, FIFO (retries jump to the front)
    pub pending: VecDeque<FileId>,

    /// The single file currently transferring
    pub current: Option<FileId>,

    pub uploaded: IndexSet<FileId>,
    pub failed: IndexMap<FileId, FailedUpload>,

    /// Reconciliation fetch outstanding
    pub loading: bool,

    /// A batch is in flight
    pub uploading: bool,
}

impl TransferState {
    pub fn file(&self, id: &FileId) -> Option<&FileDescriptor> {
        self.files.get(id)
    }

    pub fn status_of(&self, id: &FileId) -> Option<FileStatus> {
        self.files.get(id).map(|f| f.status)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&FileDescriptor> {
        self.files.values().find(|f| f.name == name)
    }

    pub fn is_pending(&self, id: &FileId) -> bool {
        self.pending.contains(id)
    }


    /// Files that a fresh submit would queue: ready files in load order,
    /// then failed files to retry.
    pub fn submittable(&self) -> (Vec<FileId>, Vec<FileId>) {
        let ready = self
            .files
            .values()
            .filter(|f| f.status == FileStatus::Ready && !self.pending.contains(&f.id))
            .map(|f| f.id)
            .collect();
        let retry = self
            .failed
            .keys()
            .filter(|id| self.files.contains_key(*id) && !self.pending.contains(*id))
            .copied()
            .collect();
        (ready, retry)
    }

    pub fn count_with_status(&self, status: FileStatus) -> usize {
        self.files.values().filter(|f| f.status == status).count()
    }

    pub fn uploading_count(&self) -> usize {
        self.count_with_status(FileStatus::Uploading)
    }

    /// Check the structural invariants of the session.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let uploading: Vec<&FileDescriptor> =
            self.files.values().filter(|f| f.is_uploading()).collect();
        if uploading.len() > MAX_CONCURRENT_TRANSFERS {
            return Err(format!("{} files uploading at once", uploading.len()));
        }
        match (uploading.first(), self.current) {
            (Some(f), Some(current)) if f.id != current => {
                return Err(format!("{} uploading but current is {}", f.id, current));
            }
            (Some(f), None) => return Err(format!("{} uploading with no current", f.id)),
            (None, Some(current)) => {
                return Err(format!("current {} is not uploading", current));
            }
            _ => {}
        }
        for file in self.files.values() {
            if file.cancel.is_some() != file.is_uploading() {
                return Err(format!(
                    "{} has cancel handle={} with status {}",
                    file.id,
                    file.cancel.is_some(),
                    file.status
                ));
            }
        }
        for id in &self.pending {
            if self.status_of(id) == Some(FileStatus::Uploading) {
                return Err(format!("pending {} is uploading", id));
            }
        }
        if let Some(id) = self.uploaded.iter().find(|id| self.failed.contains_key(*id)) {
            return Err(format!("{} is both uploaded and failed", id));
        }
        Ok(())
    }
}
