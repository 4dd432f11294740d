use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{ColStoreError, Result};

/// Configuration options supplied when opening a [`super::column::ColumnTree`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnOptions {
    /// Whether pages store runs of identical values once with a repeat count.
    /// Selects expansion entries over per-slot replacements for mutation.
    pub repeat_compression: bool,
    /// Width in bytes of every value in the column.
    pub value_len: u16,
    /// Upper bound on bytes charged for overlay structures; `None` is unbounded.
    pub overlay_budget_bytes: Option<usize>,
    /// Whether page image checksums are verified when reading a column file.
    pub verify_checksums: bool,
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self {
            repeat_compression: false,
            value_len: 8,
            overlay_budget_bytes: None,
            verify_checksums: true,
        }
    }
}

impl ColumnOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether pages are repeat-count compressed.
    pub fn repeat_compression(mut self, enabled: bool) -> Self {
        self.repeat_compression = enabled;
        self
    }

    /// Sets the fixed value width.
    pub fn value_len(mut self, bytes: u16) -> Self {
        self.value_len = bytes;
        self
    }

    /// Caps the bytes overlay structures may use.
    pub fn overlay_budget_bytes(mut self, bytes: Option<usize>) -> Self {
        self.overlay_budget_bytes = bytes;
        self
    }

    /// Sets whether column file checksums are verified.
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Rejects settings no tree could be opened with.
    pub fn validate(&self) -> Result<()> {
        if self.value_len == 0 {
            return Err(ColStoreError::Config("value_len must be at least 1".into()));
        }
        if self.overlay_budget_bytes == Some(0) {
            return Err(ColStoreError::Config(
                "overlay_budget_bytes must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Parses options from TOML; absent keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(src).map_err(|err| ColStoreError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Serializes the options as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| ColStoreError::Config(err.to_string()))
    }
}
