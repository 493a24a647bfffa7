// Transfer store module
//
// This module provides the TransferStore which wraps TransferState with thread-safe access
// using Arc<RwLock<T>>, runs every mutation through the reducer, and emits change events.

pub mod action;
pub mod reducer;

pub use action::Action;
pub use reducer::apply;

use crate::events::{EventBus, relay};
use crate::metrics::Metrics;
use crate::models::{AssetType, FileId, FileStatus, TransferState};
use crate::models::config::DEFAULT_EVENT_CAPACITY;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when the transfer state is modified
///
/// These events notify interested parties (the queue driver, views) without
/// requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    FilesLoaded { ids: Vec<FileId> },

    FilesRemoved { ids: Vec<FileId> },

    StatusChanged {
        id: FileId,
        from: FileStatus,
        to: FileStatus,
    },

    ProgressUpdated { id: FileId, progress: u8 },

    /// Pending queue or current transfer changed
    QueueChanged {
        pending: usize,
        current: Option<FileId>,
    },

    BatchStarted { queued: usize },

    /// The batch drained; emitted once per batch
    BatchCompleted {
        uploaded: usize,
        failed: usize,
        cancelled: usize,
    },

    LoadingChanged { loading: bool },

    SelectionChanged { id: FileId, selected: bool },

    AssetTypeChanged { id: FileId, asset_type: AssetType },

    /// Session discarded
    StateReset,
}

/// Thread-safe transfer store with event emission
///
/// This is the single source of truth for an ingestion session. It:
/// - Provides thread-safe access to [`TransferState`] via `Arc<RwLock<T>>`
/// - Applies [`Action`]s through the pure [`reducer::apply`]
/// - Detects state changes and emits [`StateChange`] events
/// - Publishes derived [`crate::events::UploadEvent`]s on an attached [`EventBus`]
///
/// The store is an explicit handle: create one per session and pass clones
/// to whoever needs it.
pub struct TransferStore {
    state: Arc<RwLock<TransferState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,

    bus: Option<EventBus>,
    metrics: Arc<Metrics>,
}

impl TransferStore {
    /// Create a store with the default broadcast buffer
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (state_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(TransferState::default())),
            state_tx,
            bus: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Publish lifecycle events derived from every dispatch on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Get a read-only snapshot of the current state
    ///
    /// Cancel handles in the snapshot share tokens with the live state.
    pub fn snapshot(&self) -> TransferState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = store.read(|state| state.current.is_some());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&TransferState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Apply an action and emit change events
    ///
    /// This is the only way to modify state. It:
    /// 1. Runs the reducer against the current state under the write lock
    /// 2. Detects what changed
    /// 3. Releases the lock, then broadcasts the changes
    /// 4. Publishes derived events on the attached event bus
    ///
    /// # Returns
    /// The StateChange events that were emitted (empty if the action was a no-op)
    pub fn dispatch(&self, action: Action) -> Vec<StateChange> {
        let kind = action.kind();
        let discard = matches!(action, Action::DiscardFiles { .. });

        let (changes, derived) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let next = reducer::apply(&state, action);
            let mut changes = detect_changes(&state, &next);
            if discard {
                // A discarded batch did not complete.
                changes.retain(|c| !matches!(c, StateChange::BatchCompleted { .. }));
                changes.push(StateChange::StateReset);
            }
            let derived = match &self.bus {
                Some(_) => relay::derive_events(&changes, &next),
                None => Vec::new(),
            };
            *state = next;
            (changes, derived)
        };

        self.metrics.record_dispatch();
        if changes.is_empty() {
            tracing::trace!("{} produced no changes", kind);
        } else {
            tracing::trace!("{} produced {} changes", kind, changes.len());
        }

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            if self.state_tx.send(change.clone()).is_ok() {
                self.metrics.record_state_broadcast();
            }
        }

        if let Some(bus) = &self.bus {
            for event in &derived {
                let report = bus.publish(event);
                self.metrics.record_bus_publish();
                for error in report.errors {
                    self.metrics.record_handler_error();
                    tracing::error!(
                        "{} subscriber failed for {}: {}",
                        event.event_type(),
                        event.id(),
                        error
                    );
                }
            }
        }

        changes
    }

    /// Subscribe to state change events
    ///
    /// Returns a receiver that will get notified of all future state changes.
    /// Multiple subscribers can listen simultaneously.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }
}

impl Default for TransferStore {
    fn default() -> Self {
        Self::new()
    }
}

// Clones share the same state, channel and bus
impl Clone for TransferStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
            bus: self.bus.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Detect what changed between two states and generate events
fn detect_changes(old: &TransferState, new: &TransferState) -> Vec<StateChange> {
    let mut changes = Vec::new();

    let loaded: Vec<FileId> = new
        .files
        .keys()
        .filter(|id| !old.files.contains_key(*id))
        .copied()
        .collect();
    if !loaded.is_empty() {
        changes.push(StateChange::FilesLoaded { ids: loaded });
    }

    let removed: Vec<FileId> = old
        .files
        .keys()
        .filter(|id| !new.files.contains_key(*id))
        .copied()
        .collect();
    if !removed.is_empty() {
        changes.push(StateChange::FilesRemoved { ids: removed });
    }

    // Batch start comes before the per-file transitions it causes
    if !old.uploading && new.uploading {
        changes.push(StateChange::BatchStarted {
            queued: new.pending.len(),
        });
    }

    for (id, file) in &new.files {
        let Some(before) = old.files.get(id) else {
            continue;
        };
        if before.status != file.status {
            changes.push(StateChange::StatusChanged {
                id: *id,
                from: before.status,
                to: file.status,
            });
        }
        if before.progress != file.progress && file.status == FileStatus::Uploading {
            changes.push(StateChange::ProgressUpdated {
                id: *id,
                progress: file.progress,
            });
        }
        if before.selected != file.selected {
            changes.push(StateChange::SelectionChanged {
                id: *id,
                selected: file.selected,
            });
        }
        if before.asset_type != file.asset_type {
            changes.push(StateChange::AssetTypeChanged {
                id: *id,
                asset_type: file.asset_type,
            });
        }
    }

    if old.pending != new.pending || old.current != new.current {
        changes.push(StateChange::QueueChanged {
            pending: new.pending.len(),
            current: new.current,
        });
    }

    if old.loading != new.loading {
        changes.push(StateChange::LoadingChanged {
            loading: new.loading,
        });
    }

    if old.uploading && !new.uploading {
        changes.push(StateChange::BatchCompleted {
            uploaded: new.count_with_status(FileStatus::Complete),
            failed: new.count_with_status(FileStatus::Failed),
            cancelled: new.count_with_status(FileStatus::Cancelled),
        });
    }

    changes
}
