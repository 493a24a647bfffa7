use crate::models::{AssetType, RawFile, UploaderConfig};
use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Invalid rejection pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{name} matches rejected pattern {pattern}")]
    Rejected { name: String, pattern: String },

    #[error("{name} is {asset_type}, which is not accepted for ingestion")]
    Disallowed { name: String, asset_type: AssetType },
}

/// Maps selected files to asset types and screens out file kinds the
/// endpoint won't take, before anything reaches the store.
#[derive(Debug, Clone)]
pub struct AssetClassifier {
    asset_types: IndexMap<String, AssetType>,
    allowed: Vec<AssetType>,
    rejected: Vec<Regex>,
}

impl AssetClassifier {
    /// Compile the rejection patterns from `config`.
    pub fn new(config: &UploaderConfig) -> Result<Self, ClassifyError> {
        let rejected = config
            .rejected_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ClassifyError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            asset_types: config.asset_types.clone(),
            allowed: config.allowed_asset_types.clone(),
            rejected,
        })
    }

    pub fn accepts(&self, asset_type: AssetType) -> bool {
        self.allowed.contains(&asset_type)
    }

    pub fn classify(&self, file: &RawFile) -> Result<AssetType, ClassifyError> {
        if let Some(pattern) = self.rejected.iter().find(|re| re.is_match(&file.name)) {
            return Err(ClassifyError::Rejected {
                name: file.name.clone(),
                pattern: pattern.as_str().to_string(),
            });
        }

        let asset_type = file
            .extension()
            .and_then(|ext| self.asset_types.get(&ext).copied())
            .unwrap_or(AssetType::Other);

        if !self.accepts(asset_type) {
            return Err(ClassifyError::Disallowed {
                name: file.name.clone(),
                asset_type,
            });
        }
        Ok(asset_type)
    }
}
