// dam-upload - serialized upload queue for digital asset ingestion
//
// This is the library crate containing the transfer store, queue driver and
// event bus. The binary crate (main.rs) provides the CLI entry point.

pub mod config;
pub mod controller;
pub mod driver;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use controller::{BatchSummary, ControllerError, IngestController, LoadReport};
pub use driver::{DriverHandle, QueueDriver};
pub use events::{EventBus, EventType, UploadEvent};
pub use models::{FileDescriptor, FileId, FileStatus, TransferState, UploaderConfig};
pub use state::{Action, StateChange, TransferStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
