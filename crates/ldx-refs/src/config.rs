use std::fs;
use std::path::Path;

use ldx_store::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

use crate::collection::KeyOrder;
use crate::database::OpenOptions;
use crate::error::{RefError, Result};

/// Explorer settings, usually read from a TOML file. Missing keys take
/// their default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Column order for tabular display and CSV export.
    pub key_order: KeyOrder,
    /// How many times a password prompt is shown before giving up.
    pub max_password_attempts: u32,
    /// Open every database read-only.
    pub read_only: bool,
    /// Blob chunk size in bytes.
    pub chunk_size: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            key_order: KeyOrder::FirstSeen,
            max_password_attempts: 3,
            read_only: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ExplorerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| RefError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RefError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RefError::Config(e.to_string()))
    }

    /// Options for opening a database under this configuration.
    pub fn open_options(&self, password: Option<&str>) -> OpenOptions {
        OpenOptions {
            password: password.map(str::to_string),
            read_only: self.read_only,
            key_order: self.key_order,
            chunk_size: Some(self.chunk_size),
        }
    }
}
