//! Derives bus events from store changes.
//!
//! Each lifecycle fact is dispatched once, to the store. What the Event Bus
//! sees is computed here from the resulting [`StateChange`]s.

use super::UploadEvent;
use crate::models::{FileStatus, TransferState};
use crate::state::StateChange;

/// Map the changes of one dispatch to the events subscribers should see.
///
/// `next` is the state the changes produced; it supplies the payload fields
/// (owner, error message, version ids) the changes don't carry.
pub fn derive_events(changes: &[StateChange], next: &TransferState) -> Vec<UploadEvent> {
    let mut events = Vec::new();

    for change in changes {
        match change {
            StateChange::ProgressUpdated { id, progress } => {
                let Some(file) = next.file(id) else { continue };
                events.push(UploadEvent::Progress {
                    id: *id,
                    owner: file.owner.clone(),
                    progress: *progress,
                });
            }
            StateChange::StatusChanged { id, to, .. } => {
                let Some(file) = next.file(id) else { continue };
                let owner = file.owner.clone();
                let event = match to {
                    FileStatus::Complete => UploadEvent::Complete {
                        id: *id,
                        owner,
                        version_ids: file.version_ids.clone(),
                    },
                    FileStatus::Failed => UploadEvent::Failed {
                        id: *id,
                        owner,
                        error: file.error.clone().unwrap_or_default(),
                    },
                    FileStatus::Cancelled => UploadEvent::SetCancelled { id: *id, owner },
                    FileStatus::Ready | FileStatus::Uploading => continue,
                };
                events.push(event);
            }
            _ => {}
        }
    }

    events
}
