use std::path::Path;

use super::{
    FilePreferenceStore, HttpPreferenceStore, Identity, Payload, PreferenceStore, Preferences,
    SyncError,
};

/// Whichever store the desk was pointed at on the command line or in the
/// config file.
#[derive(Debug, Clone)]
pub enum AnyPreferenceStore {
    Http(HttpPreferenceStore),
    File(FilePreferenceStore),
    /// Nowhere to sync to. Pushes succeed and pulls find nothing.
    Disabled,
}

impl AnyPreferenceStore {
    /// A directory takes precedence over an endpoint.
    pub fn open(dir: Option<&Path>, endpoint: Option<&str>) -> Result<Self, SyncError> {
        if let Some(dir) = dir {
            return Ok(Self::File(FilePreferenceStore::new(dir)));
        }
        match endpoint {
            Some(endpoint) => HttpPreferenceStore::new(endpoint).map(Self::Http),
            None => Ok(Self::Disabled),
        }
    }

    pub fn is_disabled(&self) -> bool { matches!(self, Self::Disabled) }
}

impl PreferenceStore for AnyPreferenceStore {
    async fn push(&self, identity: &Identity, payload: &Payload) -> Result<(), SyncError> {
        match self {
            Self::Http(s) => s.push(identity, payload).await,
            Self::File(s) => s.push(identity, payload).await,
            Self::Disabled => Ok(()),
        }
    }

    async fn pull(&self, identity: &Identity) -> Result<Option<Preferences>, SyncError> {
        match self {
            Self::Http(s) => s.pull(identity).await,
            Self::File(s) => s.pull(identity).await,
            Self::Disabled => Ok(None),
        }
    }

    fn beacon(&self, identity: &Identity, preferences: Preferences) {
        match self {
            Self::Http(s) => s.beacon(identity, preferences),
            Self::File(s) => s.beacon(identity, preferences),
            Self::Disabled => {}
        }
    }
}
