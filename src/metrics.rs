// Transfer metrics module
//
// Lightweight counters for one uploader session

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Session metrics
///
/// Uses atomic operations so the store, the queue driver and bus subscribers
/// can all record without locks. Shared as `Arc<Metrics>` and logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Files that reached `Complete`
    pub files_uploaded: AtomicUsize,

    /// Files that reached `Failed`
    pub files_failed: AtomicUsize,

    /// Files that reached `Cancelled`
    pub files_cancelled: AtomicUsize,

    /// Bytes reported by successful transfers
    pub bytes_transferred: AtomicU64,

    /// Wall time spent inside upload calls, in milliseconds
    pub total_transfer_time_ms: AtomicU64,

    /// Actions dispatched to the store
    pub dispatches: AtomicU64,

    /// State changes delivered on the broadcast channel
    pub state_broadcasts: AtomicU64,

    /// Progress callbacks forwarded to the store
    pub progress_forwarded: AtomicU64,

    /// Progress callbacks dropped by coalescing
    pub progress_suppressed: AtomicU64,

    /// Callbacks from a superseded or aborted attempt
    pub stale_callbacks: AtomicU64,

    /// Events published on the event bus
    pub bus_publishes: AtomicU64,

    /// Event bus subscribers that errored or panicked
    pub handler_errors: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_uploaded: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_cancelled: AtomicUsize::new(0),
            bytes_transferred: AtomicU64::new(0),
            total_transfer_time_ms: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            state_broadcasts: AtomicU64::new(0),
            progress_forwarded: AtomicU64::new(0),
            progress_suppressed: AtomicU64::new(0),
            stale_callbacks: AtomicU64::new(0),
            bus_publishes: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a successful transfer of `bytes`
    pub fn record_file_uploaded(&self, bytes: u64) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_cancelled(&self) {
        self.files_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent in one upload call
    pub fn record_transfer_time(&self, duration: Duration) {
        self.total_transfer_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_broadcast(&self) {
        self.state_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_progress_forwarded(&self) {
        self.progress_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_progress_suppressed(&self) {
        self.progress_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_callback(&self) {
        self.stale_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_publish(&self) {
        self.bus_publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    pub fn stale_callback_count(&self) -> u64 {
        self.stale_callbacks.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average transfer time per finished file in milliseconds
    pub fn avg_transfer_time_ms(&self) -> f64 {
        let total = self.total_transfer_time_ms.load(Ordering::Relaxed);
        let count = self.files_uploaded.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Upload Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} uploaded, {} failed, {} cancelled",
            self.files_uploaded.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
            self.files_cancelled.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Transferred {} bytes in {:.2}s (avg: {:.2}ms per file)",
            self.bytes_transferred.load(Ordering::Relaxed),
            self.total_transfer_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_transfer_time_ms()
        );
        tracing::info!(
            "Dispatches: {}, broadcasts: {}, progress forwarded: {}, suppressed: {}, stale: {}",
            self.dispatches.load(Ordering::Relaxed),
            self.state_broadcasts.load(Ordering::Relaxed),
            self.progress_forwarded.load(Ordering::Relaxed),
            self.progress_suppressed.load(Ordering::Relaxed),
            self.stale_callbacks.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Bus publishes: {}, handler errors: {}",
            self.bus_publishes.load(Ordering::Relaxed),
            self.handler_errors.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
