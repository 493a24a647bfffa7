//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use dam_upload::models::{FileId, TransferState, UploaderConfig};
use dam_upload::services::{
    AssetClassifier, BoxFuture, UploadCall, UploadContext, UploadError, UploadReceipt,
    UploadRequest,
};
use dam_upload::{DriverHandle, EventBus, IngestController, QueueDriver, TransferStore};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{Duration, timeout};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How one scripted upload call ends.
#[derive(Clone)]
pub enum Ending {
    Succeed(Vec<String>),
    /// Endpoint answers with a FAILED receipt
    Reject(String),
    /// Transport error
    Transport(String),
    /// Never finishes on its own
    Hang,
    /// Succeeds once the gate is notified
    Gate(Arc<Notify>),
    /// Hangs, but reports progress from a detached task once the gate is
    /// notified, even if the call was aborted by then
    LateProgress(Arc<Notify>),
}

#[derive(Clone)]
pub struct Script {
    pub progress: Vec<(u64, u64)>,
    pub ending: Ending,
}

impl Script {
    pub fn succeed() -> Self {
        Self {
            progress: vec![],
            ending: Ending::Succeed(vec![]),
        }
    }

    pub fn ending(ending: Ending) -> Self {
        Self {
            progress: vec![],
            ending,
        }
    }

    pub fn with_progress(mut self, progress: Vec<(u64, u64)>) -> Self {
        self.progress = progress;
        self
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Upload call whose behaviour is scripted per file name.
///
/// Unscripted calls succeed with version id `v-<name>`.
#[derive(Default)]
pub struct ScriptedUploader {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the behaviour of the next call for `name`.
    pub fn script(&self, name: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(script);
    }

    /// File names in the order their upload calls started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl UploadCall for ScriptedUploader {
    fn upload(
        &self,
        request: UploadRequest,
        ctx: UploadContext,
    ) -> BoxFuture<'_, Result<UploadReceipt, UploadError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request.name.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let script = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.name)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Script::ending(Ending::Succeed(vec![format!("v-{}", request.name)]))
                });

            for (loaded, total) in script.progress {
                ctx.report_progress(loaded, total);
                tokio::task::yield_now().await;
            }

            match script.ending {
                Ending::Succeed(version_ids) => Ok(UploadReceipt::success(version_ids)),
                Ending::Reject(message) => Ok(UploadReceipt::failed(message)),
                Ending::Transport(message) => Err(UploadError::Transport(message)),
                Ending::Hang => {
                    ctx.cancellation().cancelled().await;
                    Err(UploadError::Cancelled)
                }
                Ending::Gate(gate) => {
                    gate.notified().await;
                    Ok(UploadReceipt::success(vec![format!("v-{}", request.name)]))
                }
                Ending::LateProgress(gate) => {
                    let late = ctx.clone();
                    tokio::spawn(async move {
                        gate.notified().await;
                        late.report_progress(50, 100);
                    });
                    ctx.cancellation().cancelled().await;
                    Err(UploadError::Cancelled)
                }
            }
        })
    }
}

/// A wired session: store with bus, running driver, controller.
pub struct Harness {
    pub store: TransferStore,
    pub bus: EventBus,
    pub controller: IngestController,
    pub uploader: Arc<ScriptedUploader>,
    pub driver: DriverHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_uploader(ScriptedUploader::new())
    }

    pub fn with_uploader(uploader: Arc<ScriptedUploader>) -> Self {
        let bus = EventBus::new();
        let store = TransferStore::new().with_event_bus(bus.clone());
        let driver = QueueDriver::new(store.clone(), uploader.clone()).spawn();
        let classifier = AssetClassifier::new(&UploaderConfig::default()).unwrap();
        let controller = IngestController::new(store.clone(), classifier);
        Self {
            store,
            bus,
            controller,
            uploader,
            driver,
        }
    }

    /// Load files by name; returns their ids in order.
    pub fn load(&self, names: &[&str]) -> Vec<FileId> {
        let files = names
            .iter()
            .map(|n| dam_upload::models::RawFile::new(*n, 100))
            .collect();
        let report = self.controller.load_files(files);
        assert_eq!(report.accepted.len(), names.len(), "all test files load");
        report.accepted
    }
}

/// Poll until `check` holds; panics after [`TEST_TIMEOUT`].
pub async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    timeout(TEST_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timeout waiting for condition");
}

/// Wait until `predicate` holds for the store state.
pub async fn wait_for<F>(store: &TransferStore, predicate: F)
where
    F: Fn(&TransferState) -> bool,
{
    let mut rx = store.subscribe();
    timeout(TEST_TIMEOUT, async {
        loop {
            if store.read(&predicate) {
                return;
            }
            // Any change (or lag) means re-check
            let _ = rx.recv().await;
        }
    })
    .await
    .expect("Timeout waiting for store state");
}
