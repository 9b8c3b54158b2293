//! Named workspaces, each holding the stored layout of its windows, and the
//! protocol that swaps the open window set from one workspace to another.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::snapshot::{ComponentState, WorkspaceLayout, from_snapshot, to_snapshot};
use super::window::{WindowId, WindowRegistry};
use crate::common::collections::HashSet;
use crate::common::log::trace_misc;

pub const MAIN_WORKSPACE_ID: &str = "main";
pub const MAIN_WORKSPACE_NAME: &str = "Main";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }

    pub fn main() -> Self { Self(MAIN_WORKSPACE_ID.to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }

    fn sequence(&self) -> Option<u64> { self.0.strip_prefix("ws-")?.parse().ok() }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub window_layouts: Vec<WorkspaceLayout>,
}

impl Workspace {
    fn main() -> Self {
        Self {
            id: WorkspaceId::main(),
            name: MAIN_WORKSPACE_NAME.to_string(),
            is_main: true,
            window_layouts: Vec::new(),
        }
    }
}

/// Everything that is persisted and synchronised about workspaces.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    pub workspaces: Vec<Workspace>,
    pub active_workspace_id: WorkspaceId,
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self {
            workspaces: vec![Workspace::main()],
            active_workspace_id: WorkspaceId::main(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    #[error("unknown workspace: {0}")]
    NotFound(WorkspaceId),
    #[error("the Main workspace cannot be deleted or renamed")]
    MainIsPermanent,
    #[error("a workspace switch is already in progress")]
    SwitchInProgress,
    #[error("window {window} is not part of workspace {workspace}")]
    UnknownWindow {
        workspace: WorkspaceId,
        window: WindowId,
    },
    #[error("component state of kind {state} does not fit a {layout} window")]
    KindMismatch { state: String, layout: String },
}

/// Maps a stored layout back to renderable content. Returning `None` skips
/// the entry.
pub trait ContentResolver<C> {
    fn resolve(&mut self, layout: &WorkspaceLayout) -> Option<C>;
}

impl<C, F> ContentResolver<C> for F
where F: FnMut(&WorkspaceLayout) -> Option<C>
{
    fn resolve(&mut self, layout: &WorkspaceLayout) -> Option<C> { self(layout) }
}

/// Result of the first half of a switch: the outgoing windows are closed and
/// the active pointer already names the target.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStart {
    pub from: WorkspaceId,
    pub to: WorkspaceId,
    pub released: Vec<WindowId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreOutcome {
    pub opened: Vec<WindowId>,
    /// Layouts the resolver had no content for.
    pub unresolved: usize,
    /// Layouts dropped for having no title.
    pub skipped: usize,
}

pub struct WorkspaceStore {
    workspaces: Vec<Workspace>,
    active: WorkspaceId,
    next_id: u64,
    switching: bool,
}

impl Default for WorkspaceStore {
    fn default() -> Self { Self::new() }
}

impl WorkspaceStore {
    pub fn new() -> Self { Self::from_state(WorkspaceState::default()) }

    pub fn from_state(state: WorkspaceState) -> Self {
        let mut store = Self {
            workspaces: Vec::new(),
            active: WorkspaceId::main(),
            next_id: 1,
            switching: false,
        };
        store.replace_state(state);
        store
    }

    pub fn workspaces(&self) -> &[Workspace] { &self.workspaces }

    pub fn get(&self, id: &WorkspaceId) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| &w.id == id)
    }

    fn get_mut(&mut self, id: &WorkspaceId) -> Result<&mut Workspace, WorkspaceError> {
        self.workspaces
            .iter_mut()
            .find(|w| &w.id == id)
            .ok_or_else(|| WorkspaceError::NotFound(id.clone()))
    }

    pub fn main(&self) -> &Workspace { &self.workspaces[0] }

    pub fn active_id(&self) -> &WorkspaceId { &self.active }

    pub fn active(&self) -> &Workspace { self.get(&self.active).unwrap_or_else(|| self.main()) }

    pub fn is_switching(&self) -> bool { self.switching }

    pub fn find_by_name(&self, name: &str) -> Option<&WorkspaceId> {
        self.workspaces.iter().find(|w| w.name == name).map(|w| &w.id)
    }

    pub fn state(&self) -> WorkspaceState {
        WorkspaceState {
            workspaces: self.workspaces.clone(),
            active_workspace_id: self.active.clone(),
        }
    }

    /// Installs `state` wholesale, repairing it so that exactly one Main
    /// workspace exists and comes first, ids are unique, and the active
    /// pointer names an existing workspace.
    pub fn replace_state(&mut self, state: WorkspaceState) {
        trace_misc("replace_state", || {
            let mut seen = HashSet::default();
            let mut workspaces: Vec<Workspace> = Vec::with_capacity(state.workspaces.len() + 1);
            for ws in state.workspaces {
                if !seen.insert(ws.id.clone()) {
                    warn!(id = %ws.id, "dropping duplicate workspace id");
                    continue;
                }
                workspaces.push(ws);
            }

            let main_idx = workspaces
                .iter()
                .position(|w| w.is_main)
                .or_else(|| workspaces.iter().position(|w| w.id.as_str() == MAIN_WORKSPACE_ID));
            match main_idx {
                Some(idx) => {
                    let main = workspaces.remove(idx);
                    workspaces.insert(0, Workspace { is_main: true, ..main });
                }
                None => {
                    warn!("stored state has no Main workspace, recreating it");
                    workspaces.insert(0, Workspace::main());
                }
            }
            for ws in workspaces.iter_mut().skip(1) {
                if ws.is_main {
                    warn!(id = %ws.id, "demoting extra Main workspace");
                    ws.is_main = false;
                }
            }

            self.active = if workspaces.iter().any(|w| w.id == state.active_workspace_id) {
                state.active_workspace_id
            } else {
                warn!(id = %state.active_workspace_id, "active workspace missing, using Main");
                workspaces[0].id.clone()
            };
            self.next_id = workspaces
                .iter()
                .filter_map(|w| w.id.sequence())
                .max()
                .map_or(1, |n| n.saturating_add(1));
            self.workspaces = workspaces;
        })
    }

    /// Captures the open windows into the active workspace's stored layouts.
    pub fn save_active_layouts<C>(&mut self, registry: &WindowRegistry<C>) {
        let active = self.active.clone();
        let previous = self.active().window_layouts.clone();
        let layouts = to_snapshot(registry.windows(), &previous);
        if let Ok(ws) = self.get_mut(&active) {
            debug!(workspace = %active, windows = layouts.len(), "saved active layouts");
            ws.window_layouts = layouts;
        }
    }

    /// Snapshots the active workspace, then appends a new empty workspace.
    /// Names are not deduplicated.
    pub fn create_workspace<C>(
        &mut self,
        name: impl Into<String>,
        registry: &WindowRegistry<C>,
    ) -> WorkspaceId {
        self.save_active_layouts(registry);
        let id = self.fresh_id();
        let name = name.into();
        info!(%id, %name, "created workspace");
        self.workspaces.push(Workspace {
            id: id.clone(),
            name,
            is_main: false,
            window_layouts: Vec::new(),
        });
        id
    }

    fn fresh_id(&mut self) -> WorkspaceId {
        loop {
            let id = WorkspaceId::new(format!("ws-{}", self.next_id));
            let exhausted = self.next_id == u64::MAX;
            self.next_id = self.next_id.saturating_add(1);
            if self.get(&id).is_none() {
                return id;
            }
            if exhausted {
                return self.lowest_free_id();
            }
        }
    }

    fn lowest_free_id(&self) -> WorkspaceId {
        let mut n = 1u64;
        loop {
            let id = WorkspaceId::new(format!("ws-{n}"));
            if self.get(&id).is_none() {
                return id;
            }
            n = n.saturating_add(1);
        }
    }

    /// Removes a workspace. Deleting the active workspace only moves the
    /// active pointer to Main; the caller is expected to have switched there
    /// first so that its windows were closed.
    pub fn delete_workspace(&mut self, id: &WorkspaceId) -> Result<Workspace, WorkspaceError> {
        let idx = self
            .workspaces
            .iter()
            .position(|w| &w.id == id)
            .ok_or_else(|| WorkspaceError::NotFound(id.clone()))?;
        if self.workspaces[idx].is_main {
            return Err(WorkspaceError::MainIsPermanent);
        }
        let removed = self.workspaces.remove(idx);
        if &self.active == id {
            warn!(%id, "deleted the active workspace, falling back to Main");
            self.active = self.main().id.clone();
        }
        info!(%id, name = %removed.name, "deleted workspace");
        Ok(removed)
    }

    pub fn rename_workspace(
        &mut self,
        id: &WorkspaceId,
        name: impl Into<String>,
    ) -> Result<(), WorkspaceError> {
        let ws = self.get_mut(id)?;
        if ws.is_main {
            return Err(WorkspaceError::MainIsPermanent);
        }
        ws.name = name.into();
        info!(%id, name = %ws.name, "renamed workspace");
        Ok(())
    }

    /// Overwrites a workspace's stored layouts wholesale.
    pub fn save_workspace_layouts(
        &mut self,
        id: &WorkspaceId,
        layouts: Vec<WorkspaceLayout>,
    ) -> Result<(), WorkspaceError> {
        self.get_mut(id)?.window_layouts = layouts;
        Ok(())
    }

    /// Records panel restoration data for one stored window. `None` clears it.
    pub fn update_component_state(
        &mut self,
        workspace: &WorkspaceId,
        window: WindowId,
        state: Option<ComponentState>,
    ) -> Result<(), WorkspaceError> {
        let ws = self.get_mut(workspace)?;
        let Some(layout) = ws.window_layouts.iter_mut().find(|l| l.id == window) else {
            return Err(WorkspaceError::UnknownWindow {
                workspace: workspace.clone(),
                window,
            });
        };
        if let Some(state) = &state {
            if !state.fits(layout.kind) {
                return Err(WorkspaceError::KindMismatch {
                    state: state.kind().as_ref().to_string(),
                    layout: layout.kind.as_ref().to_string(),
                });
            }
        }
        layout.component_state = state;
        Ok(())
    }

    /// Marks a switch in progress, saves the outgoing windows, closes them
    /// all and points the store at `target`.
    ///
    /// Returns `Ok(None)` when `target` is already active.
    pub fn begin_switch<C>(
        &mut self,
        target: &WorkspaceId,
        registry: &mut WindowRegistry<C>,
    ) -> Result<Option<SwitchStart>, WorkspaceError> {
        if self.switching {
            return Err(WorkspaceError::SwitchInProgress);
        }
        if self.get(target).is_none() {
            return Err(WorkspaceError::NotFound(target.clone()));
        }
        if &self.active == target {
            debug!(%target, "already active");
            return Ok(None);
        }
        self.switching = true;
        self.save_active_layouts(registry);
        let released = registry.close_all();
        let from = std::mem::replace(&mut self.active, target.clone());
        info!(%from, to = %target, closed = released.len(), "switching workspace");
        Ok(Some(SwitchStart { from, to: target.clone(), released }))
    }

    /// Like [`begin_switch`](Self::begin_switch) but for freshly loaded
    /// state: the open windows are discarded without being saved, and the
    /// new state's active workspace is reopened afterwards.
    pub fn begin_reload<C>(
        &mut self,
        state: WorkspaceState,
        registry: &mut WindowRegistry<C>,
    ) -> Result<SwitchStart, WorkspaceError> {
        if self.switching {
            return Err(WorkspaceError::SwitchInProgress);
        }
        self.switching = true;
        let from = self.active.clone();
        let released = registry.close_all();
        self.replace_state(state);
        info!(%from, to = %self.active, closed = released.len(), "reloading workspaces");
        Ok(SwitchStart { from, to: self.active.clone(), released })
    }

    /// Reopens the active workspace's stored windows, back to front.
    pub fn restore_active<C>(
        &self,
        registry: &mut WindowRegistry<C>,
        resolver: &mut impl ContentResolver<C>,
    ) -> RestoreOutcome {
        restore_layouts(&self.active().window_layouts, registry, resolver)
    }

    /// Ends a switch; sync may resume.
    pub fn finish_switch(&mut self) {
        if self.switching {
            debug!(active = %self.active, "switch finished");
        }
        self.switching = false;
    }

    /// Runs a whole switch synchronously for callers that have no event loop
    /// to wait for teardown and mount acknowledgements.
    pub fn switch_workspace<C>(
        &mut self,
        target: &WorkspaceId,
        registry: &mut WindowRegistry<C>,
        resolver: &mut impl ContentResolver<C>,
    ) -> Result<Option<RestoreOutcome>, WorkspaceError> {
        if self.begin_switch(target, registry)?.is_none() {
            return Ok(None);
        }
        let outcome = self.restore_active(registry, resolver);
        self.finish_switch();
        Ok(Some(outcome))
    }
}

/// Opens one window per resolvable layout, in stored stacking order.
pub fn restore_layouts<C>(
    layouts: &[WorkspaceLayout],
    registry: &mut WindowRegistry<C>,
    resolver: &mut impl ContentResolver<C>,
) -> RestoreOutcome {
    let plan = from_snapshot(layouts);
    let mut outcome = RestoreOutcome { skipped: plan.skipped, ..Default::default() };
    for entry in &plan.entries {
        match resolver.resolve(&entry.layout) {
            Some(content) => outcome.opened.push(registry.open_window(entry.open_request(content))),
            None => {
                debug!(title = %entry.layout.title, "no content for stored layout");
                outcome.unresolved += 1;
            }
        }
    }
    outcome
}
