//! Debounced synchronisation of workspace state to the remote preference
//! store.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, error, info, instrument, trace, warn};

use crate::actor;
use crate::model::local_store::LocalStore;
use crate::model::workspace::{WorkspaceId, WorkspaceState};
use crate::remote::{Identity, LayoutUpdate, Payload, PreferenceStore, Preferences, SyncError};

/// How much of the state a scheduled push has to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Full,
    /// Only one workspace's layouts changed.
    Layouts(WorkspaceId),
}

impl Scope {
    /// Two updates to the same workspace's layouts stay partial; anything
    /// else needs the full document.
    pub fn merge(self, other: Scope) -> Scope {
        match (self, other) {
            (Scope::Layouts(a), Scope::Layouts(b)) if a == b => Scope::Layouts(a),
            _ => Scope::Full,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Schedule { state: WorkspaceState, scope: Scope },
    /// Set while a workspace switch is in flight.
    Suppress(bool),
    /// Starts a new session for another user, or none.
    SetIdentity(Option<Identity>),
    /// Pulls remote state, at most once per session. Replies `None` when
    /// there is nothing to apply.
    LoadOnce(oneshot::Sender<Option<WorkspaceState>>),
    /// Shutdown: send the state without waiting for an answer.
    Unload(WorkspaceState),
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

#[derive(Debug, Clone, PartialEq)]
struct PendingSync {
    state: WorkspaceState,
    scope: Scope,
}

pub struct SyncEngine<S> {
    store: S,
    rx: Receiver,
    debounce: Duration,
    identity: Option<Identity>,
    loaded: bool,
    suppressed: bool,
    pending: Option<PendingSync>,
    deadline: Option<Instant>,
    revision: u64,
    local: Option<LocalStore>,
}

impl<S: PreferenceStore> SyncEngine<S> {
    pub fn new(store: S, rx: Receiver, debounce: Duration, identity: Option<Identity>) -> Self {
        Self {
            store,
            rx,
            debounce,
            identity,
            loaded: false,
            suppressed: false,
            pending: None,
            deadline: None,
            revision: 0,
            local: None,
        }
    }

    /// Keeps the revision counter in `local` so pushes after a restart
    /// continue above everything sent before it.
    pub fn with_revision_store(mut self, local: LocalStore) -> Self {
        match local.load_revision() {
            Ok(Some(saved)) => self.revision = self.revision.max(saved),
            Ok(None) => {}
            Err(e) => error!("ignoring saved sync revision: {e}"),
        }
        self.local = Some(local);
        self
    }

    pub async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.flush().await;
                }
                maybe = self.rx.recv() => {
                    match maybe {
                        Some((span, event)) => self.handle_event(event).instrument(span).await,
                        None => {
                            if !self.suppressed {
                                self.flush().await;
                            }
                            break;
                        }
                    }
                }
            }
        }
        debug!("sync engine stopped");
    }

    #[instrument(name = "sync::handle_event", skip(self))]
    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Schedule { state, scope } => self.schedule(state, scope),
            Event::Suppress(suppressed) => {
                self.suppressed = suppressed;
                if !suppressed && self.pending.is_some() && self.deadline.is_none() {
                    self.deadline = Some(Instant::now() + self.debounce);
                }
            }
            Event::SetIdentity(identity) => {
                if identity == self.identity {
                    return;
                }
                if !self.suppressed {
                    self.flush().await;
                }
                info!(identity = ?identity, "sync identity changed");
                self.identity = identity;
                self.loaded = false;
                self.pending = None;
                self.deadline = None;
            }
            Event::LoadOnce(reply) => {
                let state = self.load_once().await;
                _ = reply.send(state);
            }
            Event::Unload(state) => {
                self.pending = None;
                self.deadline = None;
                let Some(identity) = self.identity.clone() else { return };
                let revision = self.next_revision();
                debug!(%identity, revision, "sending unload beacon");
                self.store.beacon(&identity, Preferences { revision, state });
            }
        }
    }

    fn schedule(&mut self, state: WorkspaceState, scope: Scope) {
        if self.suppressed {
            trace!("sync suppressed, dropping schedule");
            return;
        }
        let scope = match self.pending.take() {
            Some(prev) => prev.scope.merge(scope),
            None => scope,
        };
        self.pending = Some(PendingSync { state, scope });
        self.deadline = Some(Instant::now() + self.debounce);
    }

    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.save_revision();
        self.revision
    }

    /// Continues above a revision learned from the remote store.
    fn adopt_revision(&mut self, seen: u64) {
        if seen > self.revision {
            self.revision = seen;
            self.save_revision();
        }
    }

    fn save_revision(&self) {
        if let Some(local) = &self.local {
            if let Err(e) = local.save_revision(self.revision) {
                error!("could not save sync revision: {e}");
            }
        }
    }

    async fn flush(&mut self) {
        if self.suppressed {
            // Held until the switch finishes.
            return;
        }
        let Some(pending) = self.pending.take() else { return };
        let Some(identity) = self.identity.clone() else {
            trace!("no identity, nothing pushed");
            return;
        };
        let revision = self.next_revision();
        let payload = match pending.scope {
            Scope::Full => Payload::Full(Preferences { revision, state: pending.state }),
            Scope::Layouts(workspace_id) => {
                match pending.state.workspaces.into_iter().find(|w| w.id == workspace_id) {
                    Some(ws) => Payload::Layouts(LayoutUpdate {
                        revision,
                        workspace_id,
                        window_layouts: ws.window_layouts,
                    }),
                    None => {
                        debug!(workspace = %workspace_id, "workspace gone before flush");
                        return;
                    }
                }
            }
        };
        match self.store.push(&identity, &payload).await {
            Ok(()) => debug!(%identity, revision, "synced"),
            Err(SyncError::Stale { stored, .. }) => {
                warn!(%identity, revision, stored, "remote holds a newer revision, push dropped");
                self.adopt_revision(stored);
            }
            Err(e) => error!(%identity, revision, "sync push failed: {e}"),
        }
    }

    async fn load_once(&mut self) -> Option<WorkspaceState> {
        let identity = self.identity.clone()?;
        if self.loaded {
            debug!(%identity, "remote state already loaded this session");
            return None;
        }
        self.loaded = true;
        match self.store.pull(&identity).await {
            Ok(Some(prefs)) => {
                info!(%identity, revision = prefs.revision, "loaded remote state");
                self.adopt_revision(prefs.revision);
                self.pending = None;
                self.deadline = None;
                Some(prefs.state)
            }
            Ok(None) => {
                debug!(%identity, "no remote state stored");
                None
            }
            Err(e) => {
                error!(%identity, "sync pull failed: {e}");
                None
            }
        }
    }
}
