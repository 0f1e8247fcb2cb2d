//! Loader configuration lookups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Property key naming the directory under which packages are unpacked.
pub const TEMP_ROOT_KEY: &str = "runtime.tmp.dir";

/// Configuration the package loader reads.
pub trait ConfigSource {
    /// Base directory for extraction work directories, if configured.
    fn temp_root_path(&self) -> Option<PathBuf>;
}

/// Plain configuration value, deserializable from host config files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
}

impl LoaderConfig {
    pub fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: Some(temp_root.into()),
        }
    }

    /// Reads the loader settings out of a flat property map.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Self {
        let temp_root = properties
            .get(TEMP_ROOT_KEY)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self { temp_root }
    }
}

impl ConfigSource for LoaderConfig {
    fn temp_root_path(&self) -> Option<PathBuf> {
        self.temp_root.clone()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn temp_root_path(&self) -> Option<PathBuf> {
        LoaderConfig::from_properties(self).temp_root
    }
}
