use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::card::DEFAULT_PHOTO_SEGMENTS;
use crate::core::policy::StatusPolicyKind;
use crate::core::reader::ShareModeSetting;

/// Settings for a read session, loadable from a JSON file.
///
/// ```json
/// { "segment_count": 20, "photo_dir": "photos", "status_policy": "strict" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Upper bound on photo segments; not checked against the image size.
    pub segment_count: usize,
    pub photo_dir: PathBuf,
    pub status_policy: StatusPolicyKind,
    pub share_mode: ShareModeSetting,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            segment_count: DEFAULT_PHOTO_SEGMENTS,
            photo_dir: PathBuf::from("."),
            status_policy: StatusPolicyKind::default(),
            share_mode: ShareModeSetting::default(),
        }
    }
}

impl ReaderConfig {
    /// Load a config file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_count == 0 || self.segment_count > usize::from(u8::MAX) {
            bail!(
                "segment_count must be between 1 and 255, got {}",
                self.segment_count
            );
        }
        Ok(())
    }
}
