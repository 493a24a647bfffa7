//! Queue driver - turns transfer store state into upload calls, one at a time.
//!
//! The driver is a tokio task that re-evaluates whenever the store reports a
//! change or the in-flight upload calls back. Each evaluation:
//!
//! 1. Drops its record of the active transfer if the store no longer has it
//!    as `current` (cancelled, discarded or otherwise superseded).
//! 2. If nothing is current and `pending` is non-empty, starts the head.
//! 3. If nothing is current, nothing is pending and a batch is in flight,
//!    dispatches `UploadComplete` (once; the reducer refuses it afterwards).
//!
//! Every started transfer gets an attempt number, and every callback from the
//! upload call carries `(id, attempt)`. Callbacks that don't match the active
//! attempt are stale: they are counted and dropped, never dispatched.

use crate::metrics::Metrics;
use crate::models::config::DEFAULT_PROGRESS_STEP;
use crate::models::{CancelHandle, FileId, FileStatus};
use crate::services::upload::{
    UploadCall, UploadContext, UploadError, UploadReceipt, UploadRequest, UploadSignal, normalize,
};
use crate::state::{Action, TransferStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Percentage of `total` covered by `loaded`. An empty file is complete.
pub fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (loaded.min(total) as u128 * 100) / total as u128;
    pct as u8
}

/// Whether a progress percentage should reach the store: only exact
/// multiples of `step`, and never the same value twice in a row.
pub fn should_forward(pct: u8, last_forwarded: Option<u8>, step: u8) -> bool {
    let step = step.clamp(1, 100);
    pct % step == 0 && last_forwarded != Some(pct)
}

enum DriverMsg {
    Signal {
        id: FileId,
        attempt: u64,
        signal: UploadSignal,
    },
    Finished {
        id: FileId,
        attempt: u64,
        result: Result<UploadReceipt, UploadError>,
        elapsed: Duration,
    },
}

impl DriverMsg {
    fn tag(&self) -> (FileId, u64) {
        match self {
            DriverMsg::Signal { id, attempt, .. } | DriverMsg::Finished { id, attempt, .. } => {
                (*id, *attempt)
            }
        }
    }
}

struct ActiveTransfer {
    id: FileId,
    attempt: u64,
    name: String,
    size: u64,
    token: CancellationToken,
    last_forwarded: Option<u8>,
}

/// Serializes upload calls for one [`TransferStore`].
pub struct QueueDriver {
    store: TransferStore,
    uploader: Arc<dyn UploadCall>,
    metrics: Arc<Metrics>,
    progress_step: u8,
    msg_tx: mpsc::UnboundedSender<DriverMsg>,
    msg_rx: mpsc::UnboundedReceiver<DriverMsg>,
    active: Option<ActiveTransfer>,
    next_attempt: u64,
}

impl QueueDriver {
    pub fn new(store: TransferStore, uploader: Arc<dyn UploadCall>) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let metrics = Arc::clone(store.metrics());
        Self {
            store,
            uploader,
            metrics,
            progress_step: DEFAULT_PROGRESS_STEP,
            msg_tx,
            msg_rx,
            active: None,
            next_attempt: 0,
        }
    }

    /// Forward progress only on multiples of `step` percent (1..=100).
    pub fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step.clamp(1, 100);
        self
    }

    /// Run the driver on the current tokio runtime.
    pub fn spawn(self) -> DriverHandle {
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(self.run(shutdown.clone()));
        DriverHandle { shutdown, join }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        // Subscribe before the first evaluation so no change is missed
        let mut changes = self.store.subscribe();
        tracing::info!("Queue driver started (progress step {}%)", self.progress_step);
        self.evaluate();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    if let Some(active) = self.active.take() {
                        tracing::warn!("Driver shutting down, cancelling {}", active.name);
                        self.store.dispatch(Action::Cancel(active.id));
                        active.token.cancel();
                        self.metrics.record_file_cancelled();
                    }
                    break;
                }

                Some(msg) = self.msg_rx.recv() => {
                    self.handle(msg);
                }

                change = changes.recv() => match change {
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Evaluation reads a fresh snapshot, so missed changes are harmless
                        tracing::debug!("Driver lagged {} store changes", skipped);
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Store channel closed - stopping queue driver");
                        break;
                    }
                },
            }

            self.evaluate();
        }

        tracing::debug!("Queue driver terminated");
    }

    /// Forget the active transfer if the store moved on without us.
    fn sync_active(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let (current, status) = self
            .store
            .read(|s| (s.current, s.status_of(&active.id)));
        if current == Some(active.id) {
            return;
        }
        // The reducer already fired the handle on cancel; this covers discard
        active.token.cancel();
        if status == Some(FileStatus::Cancelled) {
            tracing::info!("Upload of {} cancelled", active.name);
            self.metrics.record_file_cancelled();
        } else {
            tracing::info!("Upload of {} abandoned", active.name);
        }
        self.active = None;
    }

    fn evaluate(&mut self) {
        self.sync_active();
        if self.active.is_some() {
            return;
        }

        let (current, head, uploading) = self
            .store
            .read(|s| (s.current, s.pending.front().copied(), s.uploading));
        if current.is_some() {
            return;
        }

        match head {
            Some(id) => self.start(id),
            None if uploading => {
                tracing::info!("Batch drained");
                self.store.dispatch(Action::UploadComplete);
            }
            None => {}
        }
    }

    fn start(&mut self, id: FileId) {
        let token = CancellationToken::new();
        self.store.dispatch(Action::StartNext {
            id,
            cancel: CancelHandle::new(token.clone()),
        });

        let request = self.store.read(|s| {
            if s.current == Some(id) {
                s.file(&id).map(UploadRequest::from)
            } else {
                None
            }
        });
        let Some(request) = request else {
            tracing::warn!("Could not start {}: no longer startable", id);
            token.cancel();
            return;
        };

        self.next_attempt += 1;
        let attempt = self.next_attempt;

        tracing::info!(
            "Uploading {} as {} (attempt {})",
            request.name,
            request.asset_type,
            attempt
        );

        let signal_tx = self.msg_tx.clone();
        let ctx = UploadContext::new(token.clone(), move |signal| {
            let _ = signal_tx.send(DriverMsg::Signal {
                id,
                attempt,
                signal,
            });
        });

        self.active = Some(ActiveTransfer {
            id,
            attempt,
            name: request.name.clone(),
            size: request.size,
            token: token.clone(),
            last_forwarded: Some(0),
        });

        let uploader = Arc::clone(&self.uploader);
        let done_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            // Losing the race drops the upload future, aborting the transport
            let result = tokio::select! {
                result = uploader.upload(request, ctx) => result,
                _ = token.cancelled() => Err(UploadError::Cancelled),
            };
            let _ = done_tx.send(DriverMsg::Finished {
                id,
                attempt,
                result,
                elapsed: started.elapsed(),
            });
        });
    }

    fn handle(&mut self, msg: DriverMsg) {
        self.sync_active();

        let (id, attempt) = msg.tag();
        let is_active = self
            .active
            .as_ref()
            .is_some_and(|a| a.id == id && a.attempt == attempt);
        if !is_active {
            self.metrics.record_stale_callback();
            tracing::debug!("Dropping stale callback for {} (attempt {})", id, attempt);
            return;
        }

        match msg {
            DriverMsg::Signal { signal, .. } => self.handle_signal(id, signal),
            DriverMsg::Finished {
                result, elapsed, ..
            } => self.finish(id, result, elapsed),
        }
    }

    fn handle_signal(&mut self, id: FileId, signal: UploadSignal) {
        let step = self.progress_step;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match signal {
            UploadSignal::Progress { loaded, total } => {
                let pct = percent(loaded, total);
                if should_forward(pct, active.last_forwarded, step) {
                    active.last_forwarded = Some(pct);
                    tracing::debug!("{}: {}%", active.name, pct);
                    self.metrics.record_progress_forwarded();
                    self.store.dispatch(Action::UploadProgress { id, progress: pct });
                } else {
                    self.metrics.record_progress_suppressed();
                }
            }
            UploadSignal::AbortHandle(handle) => {
                self.store.dispatch(Action::SetAbortHandler { id, handle });
            }
        }
    }

    fn finish(&mut self, id: FileId, result: Result<UploadReceipt, UploadError>, elapsed: Duration) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.metrics.record_transfer_time(elapsed);

        match normalize(result) {
            Ok(version_ids) => {
                tracing::info!("Uploaded {} in {:.2}s", active.name, elapsed.as_secs_f64());
                self.metrics.record_file_uploaded(active.size);
                self.store.dispatch(Action::FileUploaded { id, version_ids });
            }
            Err(message) => {
                tracing::error!("Upload of {} failed: {}", active.name, message);
                self.metrics.record_file_failed();
                self.store.dispatch(Action::UploadError { id, message });
            }
        }
    }
}

/// Handle to a running [`QueueDriver`].
pub struct DriverHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl DriverHandle {
    /// Ask the driver to stop; an in-flight transfer is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Shut down and wait for the driver task to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            tracing::error!("Queue driver task failed: {}", e);
        }
    }
}
