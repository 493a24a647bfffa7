//! dam-upload - command line front end for the upload queue.
//!
//! # Execution Flow
//!
//! 1. Load `Uploader.yaml` (plus `DAM_UPLOAD_*` overrides) from the config dir
//! 2. Initialize logging → `<log_dir>/dam-upload.<date>`
//! 3. Wire the transfer store, event bus and queue driver
//! 4. Reconcile against the drop directory so re-runs skip finished files
//! 5. Load, classify and submit the files given on the command line
//! 6. Wait for the batch; Ctrl-C cancels the current file, a second Ctrl-C
//!    stops the batch
//! 7. Print a per-file summary and the metrics

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use dam_upload::controller::ControllerError;
use dam_upload::events::{EventType, UploadEvent};
use dam_upload::logging::{LogOptions, setup_logging};
use dam_upload::models::{FileStatus, RawFile};
use dam_upload::services::{AssetClassifier, DirectoryUploader, DropDirReconciler};
use dam_upload::{
    APP_NAME, ConfigManager, EventBus, IngestController, QueueDriver, TransferStore, VERSION,
};
use std::sync::Arc;
use tokio::signal;

/// Command-line arguments for dam-upload
#[derive(Parser, Debug)]
#[command(name = "dam-upload")]
#[command(about = "Upload files one at a time into a DAM ingestion drop directory")]
#[command(version)]
struct Args {
    /// Directory containing Uploader.yaml
    #[arg(long, default_value = ".")]
    config_dir: Utf8PathBuf,

    /// Override the configured drop directory
    #[arg(long)]
    drop_dir: Option<Utf8PathBuf>,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Owning object id, for attachment or update uploads
    #[arg(long)]
    owner: Option<String>,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new(&args.config_dir)?;
    let mut config = config_manager.load()?;
    if let Some(drop_dir) = args.drop_dir {
        config.drop_dir = drop_dir;
    }
    config.debug_mode |= args.debug;

    let _guard = setup_logging(
        &LogOptions::new(config.log_dir.clone(), APP_NAME)
            .debug(config.debug_mode)
            .console(config.debug_mode),
    )?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let bus = EventBus::new();
    let store = TransferStore::with_capacity(config.event_capacity).with_event_bus(bus.clone());
    subscribe_console(&bus, &store);

    let uploader =
        Arc::new(DirectoryUploader::new(config.drop_dir.clone()).with_chunk_size(config.chunk_size));
    let driver = QueueDriver::new(store.clone(), uploader)
        .with_progress_step(config.progress_step)
        .spawn();

    let classifier = AssetClassifier::new(&config).context("Invalid rejected_patterns")?;
    let controller = IngestController::new(store.clone(), classifier);

    let reconcile = controller.reconcile(Arc::new(DropDirReconciler::new(config.drop_dir.clone())));
    if let Err(e) = reconcile.await {
        tracing::error!("Reconciliation task failed: {}", e);
    }

    let mut raw_files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        match RawFile::from_path(path) {
            Ok(raw) => raw_files.push(match &args.owner {
                Some(owner) => raw.with_owner(owner.clone()),
                None => raw,
            }),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path, e);
                eprintln!("skipped {}: {}", path, e);
            }
        }
    }

    let report = controller.load_files(raw_files);
    for name in &report.duplicates {
        eprintln!("already uploaded or loaded: {}", name);
    }
    for rejection in &report.rejected {
        eprintln!("rejected: {}", rejection);
    }

    match controller.submit() {
        Ok(queued) => println!("Uploading {} files to {}", queued, config.drop_dir),
        Err(ControllerError::NothingToSubmit) => {
            println!("Nothing to upload");
            driver.stop().await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let wait = controller.wait_for_batch();
    tokio::pin!(wait);
    let mut interrupts = 0;
    let summary = loop {
        tokio::select! {
            summary = &mut wait => break summary,
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                interrupts += 1;
                if interrupts == 1 {
                    controller.cancel_current();
                    eprintln!("Cancelled current upload; press Ctrl-C again to stop the batch");
                } else {
                    tracing::warn!("Batch interrupted by user");
                    controller.discard(true);
                }
            }
        }
    };

    let state = store.snapshot();
    for file in state.files.values() {
        match file.status {
            FileStatus::Complete => {
                println!("  complete   {} -> {}", file.name, file.version_ids.join(", "))
            }
            FileStatus::Failed => println!(
                "  failed     {}: {}",
                file.name,
                file.error.as_deref().unwrap_or("unknown error")
            ),
            status => println!("  {:<10} {}", status.to_string(), file.name),
        }
    }
    println!(
        "{} uploaded, {} failed, {} cancelled",
        summary.uploaded, summary.failed, summary.cancelled
    );

    driver.stop().await;
    store.metrics().log_summary();
    tracing::info!("Shutdown complete");

    if summary.failed > 0 {
        bail!("{} uploads failed", summary.failed);
    }
    Ok(())
}

/// Console view driven purely by the event bus.
fn subscribe_console(bus: &EventBus, store: &TransferStore) {
    let name_of = {
        let store = store.clone();
        move |event: &UploadEvent| {
            let id = event.id();
            store
                .read(|s| s.file(&id).map(|f| f.name.clone()))
                .unwrap_or_else(|| id.to_string())
        }
    };

    let names = name_of.clone();
    bus.subscribe(EventType::Progress, move |event| {
        if let UploadEvent::Progress { progress, .. } = event {
            eprintln!("{:>3}% {}", progress, names(event));
        }
        Ok(())
    });

    let names = name_of.clone();
    bus.subscribe(EventType::Failed, move |event| {
        if let UploadEvent::Failed { error, .. } = event {
            eprintln!("FAILED {}: {}", names(event), error);
        }
        Ok(())
    });

    let names = name_of.clone();
    bus.subscribe(EventType::SetCancelled, move |event| {
        eprintln!("cancelled {}", names(event));
        Ok(())
    });

    bus.subscribe(EventType::Complete, move |event| {
        eprintln!("done {}", name_of(event));
        Ok(())
    });
}
