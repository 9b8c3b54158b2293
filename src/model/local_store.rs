//! On-disk state kept next to the host: the current window layout, the
//! workspace set, and a marker recording that the desk has run before.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error};

use super::snapshot::WorkspaceLayout;
use super::workspace::WorkspaceState;
use crate::common::config::DefaultWindow;

const LAYOUT_FILE: &str = "layout.ron";
const WORKSPACES_FILE: &str = "workspaces.ron";
const INITIALIZED_MARKER: &str = ".initialized";
const SYNC_FILE: &str = "sync.ron";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: ron::Error,
    },
    #[error("could not decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// What to open when the desk starts.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupDecision {
    /// A saved layout exists; reopen it.
    Restore(Vec<WorkspaceLayout>),
    /// The desk ran before and the user closed everything.
    Nothing,
    /// First run.
    Defaults(Vec<DefaultWindow>),
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn load_layout(&self) -> Result<Option<Vec<WorkspaceLayout>>, StoreError> {
        self.load(LAYOUT_FILE)
    }

    pub fn save_layout(&self, layouts: &[WorkspaceLayout]) -> Result<(), StoreError> {
        self.save(LAYOUT_FILE, layouts)
    }

    pub fn load_workspaces(&self) -> Result<Option<WorkspaceState>, StoreError> {
        self.load(WORKSPACES_FILE)
    }

    pub fn save_workspaces(&self, state: &WorkspaceState) -> Result<(), StoreError> {
        self.save(WORKSPACES_FILE, state)
    }

    /// Highest sync revision this desk has pushed or seen.
    pub fn load_revision(&self) -> Result<Option<u64>, StoreError> { self.load(SYNC_FILE) }

    pub fn save_revision(&self, revision: u64) -> Result<(), StoreError> {
        self.save(SYNC_FILE, &revision)
    }

    pub fn is_initialized(&self) -> bool { self.dir.join(INITIALIZED_MARKER).exists() }

    pub fn mark_initialized(&self) -> Result<(), StoreError> {
        let path = self.dir.join(INITIALIZED_MARKER);
        if path.exists() {
            return Ok(());
        }
        self.ensure_dir()?;
        File::create(&path).map(drop).map_err(|source| StoreError::Io { path, source })
    }

    /// Picks the startup behaviour. An unreadable layout is logged and
    /// treated as absent.
    pub fn startup_decision(&self, defaults: &[DefaultWindow]) -> StartupDecision {
        let saved = match self.load_layout() {
            Ok(saved) => saved,
            Err(e) => {
                error!("ignoring saved layout: {e}");
                None
            }
        };
        match saved {
            Some(layouts) if !layouts.is_empty() => StartupDecision::Restore(layouts),
            _ if self.is_initialized() => StartupDecision::Nothing,
            _ => StartupDecision::Defaults(defaults.to_vec()),
        }
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(name);
        let mut buf = String::new();
        match File::open(&path) {
            Ok(mut file) => file
                .read_to_string(&mut buf)
                .map_err(|source| StoreError::Io { path: path.clone(), source })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        ron::from_str(&buf).map(Some).map_err(|source| StoreError::Decode { path, source })
    }

    /// Writes through a temporary file so a crash never leaves a torn file.
    fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.dir.join(name);
        let text = ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
            .map_err(|source| StoreError::Encode { path: path.clone(), source })?;
        let tmp = self.dir.join(format!("{name}.tmp"));
        File::create(&tmp)
            .and_then(|mut f| f.write_all(text.as_bytes()))
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        debug!(path = %path.display(), "saved");
        Ok(())
    }
}
