use crate::models::file::AssetType;
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Uploader settings from `Uploader.yaml`, overridable via `DAM_UPLOAD_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Destination directory for the directory transport
    pub drop_dir: Utf8PathBuf,

    /// Bytes per read/write while transferring
    pub chunk_size: usize,

    /// Progress percentage boundary for store updates
    pub progress_step: u8,

    /// Buffer size of the store's change broadcast channel
    pub event_capacity: usize,

    /// File extension (lowercase, no dot) to asset type
    pub asset_types: IndexMap<String, AssetType>,

    /// Asset types the ingestion endpoint accepts
    pub allowed_asset_types: Vec<AssetType>,

    /// Regexes matched against the file name; a match rejects the file
    pub rejected_patterns: Vec<String>,

    pub log_dir: Utf8PathBuf,
    pub debug_mode: bool,
}

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_PROGRESS_STEP: u8 = 5;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

fn default_asset_types() -> IndexMap<String, AssetType> {
    let table: [(&str, AssetType); 24] = [
        ("jpg", AssetType::Image),
        ("jpeg", AssetType::Image),
        ("png", AssetType::Image),
        ("tif", AssetType::Image),
        ("tiff", AssetType::Image),
        ("dng", AssetType::Image),
        ("mp4", AssetType::Video),
        ("mov", AssetType::Video),
        ("mkv", AssetType::Video),
        ("wav", AssetType::Audio),
        ("mp3", AssetType::Audio),
        ("flac", AssetType::Audio),
        ("pdf", AssetType::Document),
        ("docx", AssetType::Document),
        ("txt", AssetType::Document),
        ("csv", AssetType::Document),
        ("obj", AssetType::Model),
        ("ply", AssetType::Model),
        ("glb", AssetType::Model),
        ("gltf", AssetType::Model),
        ("stl", AssetType::Model),
        ("zip", AssetType::Archive),
        ("tar", AssetType::Archive),
        ("gz", AssetType::Archive),
    ];
    table
        .into_iter()
        .map(|(ext, kind)| (ext.to_string(), kind))
        .collect()
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            drop_dir: Utf8PathBuf::from("ingest-drop"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_step: DEFAULT_PROGRESS_STEP,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            asset_types: default_asset_types(),
            allowed_asset_types: AssetType::ALL.to_vec(),
            rejected_patterns: vec![
                r"^\.".to_string(),
                r"~$".to_string(),
                r"(?i)\.(exe|bat|cmd|sh|tmp)$".to_string(),
            ],
            log_dir: Utf8PathBuf::from("logs"),
            debug_mode: false,
        }
    }
}
