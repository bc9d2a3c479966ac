/// Store configuration
///
/// Everything has a default, so a config file is optional. Defaults live
/// under the user's data directory:
/// - Linux: ~/.local/share/ladderstore/
/// - macOS: ~/Library/Application Support/ladderstore/
/// - Windows: %APPDATA%\ladderstore\

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::identity::SCHEMA_V1;
use crate::pipeline::codec::DEFAULT_JPEG_QUALITY;
use crate::pipeline::Ladder;

/// 30 days; stored content never changes once its identifier exists
pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

const APP_DIR: &str = "ladderstore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Root of the sharded object tree
    pub root: PathBuf,
    /// SQLite metadata index; `None` runs without one
    pub index_path: Option<PathBuf>,
    pub schema_version: u16,
    pub jpeg_quality: u8,
    pub cache_max_age_secs: u64,
    pub ladder: Ladder,
    /// Also store the 1x1 colour sample as its own object (legacy layout)
    pub persist_color_sample: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            root: base.join("store"),
            index_path: Some(base.join("index.db")),
            schema_version: SCHEMA_V1,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            cache_max_age_secs: DEFAULT_CACHE_MAX_AGE_SECS,
            ladder: Ladder::reference(),
            persist_color_sample: false,
        }
    }
}

impl StoreConfig {
    /// Read a JSON config file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: StoreConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_V1 {
            return Err(Error::Config(format!(
                "unsupported schema version {}",
                self.schema_version
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpeg_quality must be 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.root.as_os_str().is_empty() {
            return Err(Error::Config("store root is empty".into()));
        }
        Ok(())
    }

    /// `Cache-Control` value for served objects
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}, immutable", self.cache_max_age_secs)
    }
}

/// Application data directory, falling back to the home directory
fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
