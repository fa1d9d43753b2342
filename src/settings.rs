// Key/value settings persistence
//
// The uploader only needs flat string keys; callers decide where values live.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::errors::{AppError, AppResult};

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Applies all entries as one batch; readers never see a partial batch.
    fn set_many(&self, entries: &[(String, String)]) -> AppResult<()>;

    fn sync(&self) -> AppResult<()>;

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.set_many(&[(key.to_string(), value.to_string())])
    }
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        match self.values.read() {
            Ok(values) => values.get(key).cloned(),
            Err(e) => {
                log::error!("Failed to read setting {} (non-critical): {}", key, e);
                None
            }
        }
    }

    fn set_many(&self, entries: &[(String, String)]) -> AppResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|e| AppError::Config(format!("Settings lock poisoned: {}", e)))?;
        for (key, value) in entries {
            values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn sync(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Flat JSON map on disk, rewritten on every `sync`.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl JsonFileSettings {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();

        let values = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!(
                    "Failed to parse settings file {}: {}. Starting empty.",
                    path.display(),
                    e
                );
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        match self.values.read() {
            Ok(values) => values.get(key).cloned(),
            Err(e) => {
                log::error!("Failed to read setting {} (non-critical): {}", key, e);
                None
            }
        }
    }

    fn set_many(&self, entries: &[(String, String)]) -> AppResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|e| AppError::Config(format!("Settings lock poisoned: {}", e)))?;
        for (key, value) in entries {
            values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn sync(&self) -> AppResult<()> {
        let contents = {
            let values = self
                .values
                .read()
                .map_err(|e| AppError::Config(format!("Settings lock poisoned: {}", e)))?;
            serde_json::to_string_pretty(&*values)?
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write a sibling file, then rename it over the store
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;

        log::debug!("Settings synced to {}", self.path.display());
        Ok(())
    }
}
