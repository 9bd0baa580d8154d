//! Per-resource configuration, persisted as JSON next to the page log.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// File name of the persisted settings inside a resource directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Byte-transform applied to serialized pages before they reach the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    /// Pages are stored verbatim.
    Passthrough,
    /// Pages are compressed with Snappy framing-free block encoding.
    Snappy,
}

/// Configuration fixed at resource creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSettings {
    /// Records per record page; `page_key = record_key / fan_out`.
    pub fan_out: u64,
    /// Largest serialized record size, in bytes, still stored inline.
    /// Records strictly above this move to overflow pages; a record at
    /// exactly the threshold stays inline.
    pub inline_threshold: usize,
    /// Whether order-preserving position identifiers are stored and
    /// delta-encoded in record pages.
    pub position_ids: bool,
    /// Page byte transform.
    pub transform: TransformKind,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            fan_out: 512,
            inline_threshold: 1024,
            position_ids: true,
            transform: TransformKind::Passthrough,
        }
    }
}

impl ResourceSettings {
    /// Writes the settings file into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)
            .map_err(|err| StrataError::Serialization(err.to_string()))?;
        fs::write(dir.join(SETTINGS_FILE), body)?;
        Ok(())
    }

    /// Loads the settings file from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let body = fs::read(dir.join(SETTINGS_FILE))?;
        let settings: Self = serde_json::from_slice(&body)
            .map_err(|err| StrataError::Corruption(format!("settings file: {err}")))?;
        if settings.fan_out == 0 {
            return Err(StrataError::Corruption("settings fan_out is zero".into()));
        }
        Ok(settings)
    }
}
