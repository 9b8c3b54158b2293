use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::debug;

use super::{Identity, Payload, PreferenceStore, Preferences, SyncError, apply_payload};

/// In-process store. Clones share the same contents, so a test can keep one
/// handle and give another to the sync engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferenceStore {
    stored: Arc<DashMap<Identity, Preferences>>,
    pushes: Arc<DashMap<Identity, Vec<Payload>>>,
    beacons: Arc<DashMap<Identity, Vec<Preferences>>>,
    pulls: Arc<DashMap<Identity, usize>>,
    offline: Arc<AtomicBool>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self { Self::default() }

    /// While offline every push and pull fails with [`SyncError::Unavailable`].
    pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::SeqCst); }

    pub fn insert(&self, identity: Identity, preferences: Preferences) {
        self.stored.insert(identity, preferences);
    }

    pub fn get(&self, identity: &Identity) -> Option<Preferences> {
        self.stored.get(identity).map(|p| p.clone())
    }

    /// Every accepted push for `identity`, oldest first.
    pub fn pushes(&self, identity: &Identity) -> Vec<Payload> {
        self.pushes.get(identity).map(|p| p.clone()).unwrap_or_default()
    }

    pub fn beacons(&self, identity: &Identity) -> Vec<Preferences> {
        self.beacons.get(identity).map(|b| b.clone()).unwrap_or_default()
    }

    pub fn pull_count(&self, identity: &Identity) -> usize {
        self.pulls.get(identity).map(|n| *n).unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) { Err(SyncError::Unavailable) } else { Ok(()) }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    async fn push(&self, identity: &Identity, payload: &Payload) -> Result<(), SyncError> {
        self.check_online()?;
        let prefs = apply_payload(self.get(identity), payload)?;
        debug!(%identity, revision = prefs.revision, "stored preferences");
        self.stored.insert(identity.clone(), prefs);
        self.pushes.entry(identity.clone()).or_default().push(payload.clone());
        Ok(())
    }

    async fn pull(&self, identity: &Identity) -> Result<Option<Preferences>, SyncError> {
        self.check_online()?;
        *self.pulls.entry(identity.clone()).or_default() += 1;
        Ok(self.get(identity))
    }

    fn beacon(&self, identity: &Identity, preferences: Preferences) {
        self.beacons.entry(identity.clone()).or_default().push(preferences.clone());
        if let Ok(prefs) = apply_payload(self.get(identity), &Payload::Full(preferences)) {
            self.stored.insert(identity.clone(), prefs);
        }
    }
}
