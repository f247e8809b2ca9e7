use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SeenState;

const STATE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("Failed to read state file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("State file {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("Failed to write state file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    updated_at: Option<DateTime<Utc>>,
    units: SeenState,
}

/// Seen-unit records kept in a pretty-printed JSON file between runs.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is a first run and yields an empty state. Anything
    /// unreadable or unparsable is an error.
    pub fn load(&self) -> Result<SeenState, StateStoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(
                    "No state file at {}; starting with an empty state",
                    self.path.display()
                );
                return Ok(SeenState::new());
            }
            Err(source) => {
                return Err(StateStoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let file: StateFile =
            serde_json::from_str(&contents).map_err(|source| StateStoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if file.version != STATE_VERSION {
            return Err(StateStoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: file.version,
            });
        }

        log::debug!(
            "Loaded {} seen unit(s) from {}",
            file.units.len(),
            self.path.display()
        );
        Ok(file.units)
    }

    /// Writes a sibling temp file, syncs it, then renames it over the state file.
    pub fn save(&self, units: &SeenState) -> Result<(), StateStoreError> {
        let file = StateFile {
            version: STATE_VERSION,
            updated_at: Some(Utc::now()),
            units: units.clone(),
        };
        let mut json = serde_json::to_string_pretty(&file)?;
        json.push('\n');

        let tmp_path = self.tmp_path();
        let write_err = |source: io::Error| StateStoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let result = write_synced(&tmp_path, json.as_bytes())
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        if let Err(source) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_err(source));
        }

        log::debug!(
            "Saved {} seen unit(s) to {}",
            units.len(),
            self.path.display()
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
