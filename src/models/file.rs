use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Stable identifier for one selected file.
///
/// Minted fresh on every load, so two files sharing a name never share an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Domain classification of an asset, editable until its transfer starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Image,
    Video,
    Audio,
    Document,
    Model,
    Archive,
    Other,
}

impl AssetType {
    pub const ALL: [AssetType; 7] = [
        AssetType::Image,
        AssetType::Video,
        AssetType::Audio,
        AssetType::Document,
        AssetType::Model,
        AssetType::Archive,
        AssetType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Image => "image",
            AssetType::Video => "video",
            AssetType::Audio => "audio",
            AssetType::Document => "document",
            AssetType::Model => "model",
            AssetType::Archive => "archive",
            AssetType::Other => "other",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown asset type: {0}")]
pub struct UnknownAssetType(pub String);

impl FromStr for AssetType {
    type Err = UnknownAssetType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAssetType(s.to_string()))
    }
}

/// Transfer lifecycle of a single file.
///
/// `Ready -> Uploading -> {Complete, Failed, Cancelled}`; failed and cancelled
/// files go back through `Ready` on retry. `Complete` is never left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ready,
    Uploading,
    Complete,
    Cancelled,
    Failed,
}

impl FileStatus {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FileStatus::Cancelled | FileStatus::Failed)
    }

    /// States from which `StartNext` may promote a file.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            FileStatus::Ready | FileStatus::Cancelled | FileStatus::Failed
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Ready => "ready",
            FileStatus::Uploading => "uploading",
            FileStatus::Complete => "complete",
            FileStatus::Cancelled => "cancelled",
            FileStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A file as selected by the user, before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFile {
    pub path: Utf8PathBuf,
    pub name: String,
    pub size: u64,
    /// Owning object for attachment/update uploads
    pub owner: Option<String>,
}

impl RawFile {
    pub fn new(path: impl Into<Utf8PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path.file_name().unwrap_or(path.as_str()).to_string();
        Self {
            path,
            name,
            size,
            owner: None,
        }
    }

    /// Build from a file on disk, reading its size from metadata.
    pub fn from_path(path: &Utf8Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path),
            ));
        }
        Ok(Self::new(path, metadata.len()))
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Lowercased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        Utf8Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// Abort handle for the in-flight transfer of a file.
///
/// Wraps one or more cancellation tokens. The queue driver mints the first
/// token; transports may merge in their own via `SetAbortHandler`.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    tokens: Vec<CancellationToken>,
}

impl CancelHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            tokens: vec![token],
        }
    }

    /// Cancel every token. Safe to call more than once.
    pub fn cancel(&self) {
        for token in &self.tokens {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tokens.iter().any(CancellationToken::is_cancelled)
    }

    pub fn merge(&mut self, other: CancelHandle) {
        self.tokens.extend(other.tokens);
    }
}

impl From<CancellationToken> for CancelHandle {
    fn from(token: CancellationToken) -> Self {
        Self::new(token)
    }
}

/// One tracked file plus its transfer lifecycle fields.
///
/// Only the reducer in [`crate::state::reducer`] mutates these.
#[derive(Clone, Debug)]
pub struct FileDescriptor {
    pub id: FileId,
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
    pub asset_type: AssetType,
    pub status: FileStatus,
    pub progress: u8,
    pub selected: bool,
    pub error: Option<String>,
    pub version_ids: Vec<String>,
    pub owner: Option<String>,
    pub cancel: Option<CancelHandle>,
}

impl FileDescriptor {
    pub fn new(raw: RawFile, asset_type: AssetType) -> Self {
        Self {
            id: FileId::new(),
            name: raw.name,
            path: raw.path,
            size: raw.size,
            asset_type,
            status: FileStatus::Ready,
            progress: 0,
            selected: false,
            error: None,
            version_ids: Vec::new(),
            owner: raw.owner,
            cancel: None,
        }
    }

    /// A file the server already holds, surfaced by reconciliation.
    pub fn already_uploaded(raw: RawFile, asset_type: AssetType, version_ids: Vec<String>) -> Self {
        Self {
            status: FileStatus::Complete,
            progress: 100,
            version_ids,
            ..Self::new(raw, asset_type)
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.status == FileStatus::Uploading
    }
}
