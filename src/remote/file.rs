use std::path::PathBuf;

use tracing::{debug, warn};

use super::{Identity, Payload, PreferenceStore, Preferences, SyncError, apply_payload};

/// Keeps each identity's preferences in `{dir}/{identity}.json`. Handy for
/// running the desk against a shared folder instead of a service.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    dir: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    fn path(&self, identity: &Identity) -> PathBuf {
        let name: String = identity
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    fn read(&self, identity: &Identity) -> Result<Option<Preferences>, SyncError> {
        let path = self.path(identity);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SyncError::Io { path, source }),
        }
    }

    fn write(&self, identity: &Identity, prefs: &Preferences) -> Result<(), SyncError> {
        let path = self.path(identity);
        let bytes = serde_json::to_vec_pretty(prefs)?;
        std::fs::create_dir_all(&self.dir)
            .and_then(|()| std::fs::write(&path, bytes))
            .map_err(|source| SyncError::Io { path, source })
    }
}

impl PreferenceStore for FilePreferenceStore {
    async fn push(&self, identity: &Identity, payload: &Payload) -> Result<(), SyncError> {
        let prefs = apply_payload(self.read(identity)?, payload)?;
        self.write(identity, &prefs)?;
        debug!(%identity, revision = prefs.revision, "wrote preferences");
        Ok(())
    }

    async fn pull(&self, identity: &Identity) -> Result<Option<Preferences>, SyncError> {
        self.read(identity)
    }

    fn beacon(&self, identity: &Identity, preferences: Preferences) {
        let result = self
            .read(identity)
            .and_then(|stored| apply_payload(stored, &Payload::Full(preferences)))
            .and_then(|prefs| self.write(identity, &prefs));
        if let Err(e) = result {
            warn!("beacon failed: {e}");
        }
    }
}
