//! The remote preference service that workspace state is synchronised to.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::model::snapshot::WorkspaceLayout;
use crate::model::workspace::{WorkspaceId, WorkspaceState};

pub mod any;
pub mod file;
pub mod http;
pub mod memory;

pub use any::AnyPreferenceStore;
pub use file::FilePreferenceStore;
pub use http::HttpPreferenceStore;
pub use memory::MemoryPreferenceStore;

/// The authenticated user that preferences are stored under.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// Full preference document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Sync sequence number. Higher revisions win.
    #[serde(default)]
    pub revision: u64,
    #[serde(flatten)]
    pub state: WorkspaceState,
}

/// Lightweight update carrying one workspace's layouts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutUpdate {
    pub revision: u64,
    pub workspace_id: WorkspaceId,
    pub window_layouts: Vec<WorkspaceLayout>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Full(Preferences),
    Layouts(LayoutUpdate),
}

impl Payload {
    pub fn revision(&self) -> u64 {
        match self {
            Payload::Full(p) => p.revision,
            Payload::Layouts(u) => u.revision,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote store answered with HTTP {0}")]
    Status(u16),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("could not encode or decode preferences: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("revision {incoming} is older than stored revision {stored}")]
    Stale { stored: u64, incoming: u64 },
    #[error("remote store unavailable")]
    Unavailable,
}

/// Where synchronised preferences live.
///
/// Implementations are driven from a single-threaded event loop, so the
/// returned futures need not be `Send`.
#[allow(async_fn_in_trait)]
pub trait PreferenceStore {
    async fn push(&self, identity: &Identity, payload: &Payload) -> Result<(), SyncError>;

    /// `Ok(None)` when nothing has been stored for `identity` yet.
    async fn pull(&self, identity: &Identity) -> Result<Option<Preferences>, SyncError>;

    /// Best-effort send used while shutting down. Never waits for an answer.
    fn beacon(&self, identity: &Identity, preferences: Preferences);
}

/// Applies `payload` on top of what a store currently holds, the way the
/// remote service does: stale revisions are refused, full documents replace
/// everything, and layout updates touch one workspace.
pub fn apply_payload(
    stored: Option<Preferences>,
    payload: &Payload,
) -> Result<Preferences, SyncError> {
    if let Some(stored) = &stored {
        if payload.revision() < stored.revision {
            return Err(SyncError::Stale {
                stored: stored.revision,
                incoming: payload.revision(),
            });
        }
    }
    match payload {
        Payload::Full(prefs) => Ok(prefs.clone()),
        Payload::Layouts(update) => {
            let mut prefs = stored.unwrap_or_else(|| Preferences {
                revision: 0,
                state: WorkspaceState::default(),
            });
            match prefs.state.workspaces.iter_mut().find(|w| w.id == update.workspace_id) {
                Some(ws) => ws.window_layouts = update.window_layouts.clone(),
                None => {
                    warn!(workspace = %update.workspace_id, "layout update for unknown workspace")
                }
            }
            prefs.revision = update.revision;
            Ok(prefs)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn prefs(revision: u64) -> Preferences {
        Preferences { revision, state: WorkspaceState::default() }
    }

    #[test]
    fn preferences_flatten_the_workspace_state() {
        let json = serde_json::to_value(prefs(3)).unwrap();
        assert_eq!(json["revision"], 3);
        assert_eq!(json["activeWorkspaceId"], "main");
        assert_eq!(json["workspaces"][0]["name"], "Main");
        let back: Preferences = serde_json::from_value(json).unwrap();
        assert_eq!(back, prefs(3));
    }

    #[test]
    fn stale_revisions_are_refused() {
        let err = apply_payload(Some(prefs(5)), &Payload::Full(prefs(4))).unwrap_err();
        assert!(matches!(err, SyncError::Stale { stored: 5, incoming: 4 }));
        assert_eq!(apply_payload(Some(prefs(5)), &Payload::Full(prefs(5))).unwrap(), prefs(5));
    }

    #[test]
    fn io_errors_name_the_file() {
        let err = SyncError::Io {
            path: PathBuf::from("/tmp/prefs/trader.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "i/o error on /tmp/prefs/trader.json: denied");
    }

    #[test]
    fn layout_updates_touch_one_workspace() {
        let update = LayoutUpdate {
            revision: 2,
            workspace_id: WorkspaceId::main(),
            window_layouts: vec![],
        };
        let mut stored = prefs(1);
        stored.state.workspaces[0].window_layouts.push(WorkspaceLayout {
            id: crate::model::window::WindowId::new(1),
            kind: Default::default(),
            title: "Notes".into(),
            position: Default::default(),
            size: Default::default(),
            is_minimized: false,
            z_index: 11,
            component_state: None,
        });
        let applied = apply_payload(Some(stored), &Payload::Layouts(update.clone())).unwrap();
        assert_eq!(applied.revision, 2);
        assert!(applied.state.workspaces[0].window_layouts.is_empty());

        let fresh = apply_payload(None, &Payload::Layouts(update)).unwrap();
        assert_eq!(fresh.state.workspaces.len(), 1);
    }
}
