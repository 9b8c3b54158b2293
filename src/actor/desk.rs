//! The desk owns every open window and the workspace set. It applies host
//! commands, walks workspace switches through their release and mount
//! phases, runs the startup policy, and keeps local and remote copies of the
//! state up to date.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, error, info, instrument, trace, warn};

use super::sync::{self, Scope};
use crate::actor;
use crate::common::collections::VecDeque;
use crate::common::config::{Config, DefaultWindow, SwitchSettings};
use crate::model::geometry::{Chrome, Point, Size};
use crate::model::interaction::{GestureHandle, InteractionController};
use crate::model::local_store::{LocalStore, StartupDecision};
use crate::model::snapshot::{ComponentState, WindowKind, WorkspaceLayout, to_snapshot};
use crate::model::switch::{SwitchKind, SwitchPhase, SwitchPipeline};
use crate::model::window::{OpenWindow, RegistryEvent, WindowId, WindowRegistry};
use crate::model::workspace::{
    ContentResolver, SwitchStart, WorkspaceError, WorkspaceId, WorkspaceState, WorkspaceStore,
    restore_layouts,
};
use crate::model::z_index::ZIndexAllocator;

const DEFAULT_SIZE: Size = Size::new(400.0, 300.0);
const CASCADE_STEP: f64 = 24.0;

/// Host commands. On the wire each is a JSON object tagged by `command`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    OpenWindow {
        title: String,
        #[serde(default)]
        position: Option<Point>,
        #[serde(default)]
        size: Option<Size>,
        #[serde(default)]
        component_state: Option<ComponentState>,
    },
    CloseWindow {
        id: WindowId,
    },
    BringToFront {
        id: WindowId,
    },
    MinimizeWindow {
        id: WindowId,
    },
    MaximizeWindow {
        id: WindowId,
    },
    RestoreWindow {
        id: WindowId,
    },
    PointerDown {
        id: WindowId,
        handle: GestureHandle,
        x: f64,
        y: f64,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    /// Without an id every active gesture ends.
    PointerUp {
        #[serde(default)]
        id: Option<WindowId>,
    },
    ViewportResized {
        width: f64,
        height: f64,
    },
    CreateWorkspace {
        name: String,
    },
    DeleteWorkspace {
        id: WorkspaceId,
    },
    RenameWorkspace {
        id: WorkspaceId,
        name: String,
    },
    SaveLayout,
    SwitchWorkspace {
        id: WorkspaceId,
    },
    SetComponentState {
        id: WindowId,
        #[serde(default)]
        state: Option<ComponentState>,
    },
}

#[derive(Debug)]
pub enum Event {
    Command(Command),
    /// The host finished tearing down a closed window.
    WindowReleased(WindowId),
    /// The host finished mounting an opened window.
    WindowMounted(WindowId),
    /// Replaces local state wholesale and reopens the active workspace.
    RemoteStateLoaded(WorkspaceState),
    Query(oneshot::Sender<DeskSnapshot>),
    Shutdown,
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

#[derive(Debug, Error)]
pub enum DeskError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("unknown window: {0}")]
    UnknownWindow(WindowId),
    #[error("no content for a window titled {0:?}")]
    Unresolved(String),
    #[error("window titles must not be empty")]
    EmptyTitle,
}

/// What a command changed, and so what must be saved and synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    None,
    Layout,
    Workspaces,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowView {
    pub id: WindowId,
    pub title: String,
    pub kind: WindowKind,
    pub position: Point,
    pub size: Size,
    pub z_index: i64,
    pub is_minimized: bool,
    pub is_maximized: bool,
    pub hide_header: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gesture: Option<&'static str>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceView {
    pub id: WorkspaceId,
    pub name: String,
    pub is_main: bool,
    pub stored_windows: usize,
}

/// Read-only view of the desk handed out by [`Event::Query`].
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeskSnapshot {
    pub active_workspace_id: WorkspaceId,
    pub switching: bool,
    pub viewport: Size,
    /// Back to front.
    pub windows: Vec<WindowView>,
    pub workspaces: Vec<WorkspaceView>,
    /// Why the most recent command was refused, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

impl DeskSnapshot {
    pub fn window(&self, title: &str) -> Option<&WindowView> {
        self.windows.iter().find(|w| w.title == title)
    }
}

pub struct Desk<C, R> {
    registry: WindowRegistry<C>,
    interaction: InteractionController,
    store: WorkspaceStore,
    resolver: R,
    local: LocalStore,
    sync: sync::Sender,
    rx: Receiver,
    switch_settings: SwitchSettings,
    stagger: Duration,
    default_windows: Vec<DefaultWindow>,
    pipeline: Option<SwitchPipeline>,
    switch_seq: u64,
    delete_after_switch: Option<WorkspaceId>,
    deferred_reload: Option<WorkspaceState>,
    startup_queue: VecDeque<DefaultWindow>,
    next_stagger: Option<Instant>,
    remote_load: Option<oneshot::Receiver<Option<WorkspaceState>>>,
    rejected: Option<String>,
    stopped: bool,
}

impl<C, R: ContentResolver<C>> Desk<C, R> {
    pub fn new(
        config: &Config,
        resolver: R,
        local: LocalStore,
        sync: sync::Sender,
        rx: Receiver,
    ) -> Self {
        let z = ZIndexAllocator::new(config.stacking.base, config.stacking.ceiling);
        Self {
            registry: WindowRegistry::new(z, config.window.constraints()),
            interaction: InteractionController::new(config.viewport.size(), config.chrome),
            store: WorkspaceStore::new(),
            resolver,
            local,
            sync,
            rx,
            switch_settings: config.switch,
            stagger: config.startup.stagger,
            default_windows: config.startup.default_windows.clone(),
            pipeline: None,
            switch_seq: 0,
            delete_after_switch: None,
            deferred_reload: None,
            startup_queue: VecDeque::new(),
            next_stagger: None,
            remote_load: None,
            rejected: None,
            stopped: false,
        }
    }

    /// Registry notifications, for hosts that tie side effects to window
    /// lifetimes and acknowledge them back.
    pub fn subscribe(&mut self) -> actor::Receiver<RegistryEvent> { self.registry.subscribe() }

    pub async fn run(mut self) {
        self.start();
        while !self.stopped {
            let phase_end = self.pipeline.as_ref().map(|p| p.deadline());
            let stagger = self.next_stagger;
            tokio::select! {
                _ = sleep_until(phase_end.unwrap_or_else(Instant::now)), if phase_end.is_some() => {
                    self.advance_switch();
                }
                _ = sleep_until(stagger.unwrap_or_else(Instant::now)), if stagger.is_some() => {
                    self.open_next_default();
                }
                loaded = recv_remote(&mut self.remote_load), if self.remote_load.is_some() => {
                    self.remote_load = None;
                    if let Some(state) = loaded {
                        self.reload(state);
                    }
                }
                maybe = self.rx.recv() => {
                    match maybe {
                        Some((span, event)) => {
                            let _guard = span.enter();
                            self.handle_event(event);
                        }
                        None => self.shutdown(),
                    }
                }
            }
        }
        debug!("desk stopped");
    }

    fn start(&mut self) {
        match self.local.load_workspaces() {
            Ok(Some(state)) => self.store.replace_state(state),
            Ok(None) => {}
            Err(e) => error!("ignoring saved workspaces: {e}"),
        }

        match self.local.startup_decision(&self.default_windows) {
            StartupDecision::Restore(layouts) => {
                let outcome = restore_layouts(&layouts, &mut self.registry, &mut self.resolver);
                info!(
                    workspace = %self.store.active_id(),
                    opened = outcome.opened.len(),
                    "restored saved layout"
                );
                if outcome.unresolved > 0 {
                    warn!(
                        unresolved = outcome.unresolved,
                        "saved windows without content were skipped"
                    );
                }
                let pipeline = SwitchPipeline::mounting(
                    self.next_seq(),
                    SwitchKind::Startup,
                    self.store.active_id().clone(),
                    outcome.opened,
                    self.switch_settings,
                    Instant::now(),
                );
                self.sync.send(sync::Event::Suppress(true));
                self.pipeline = Some(pipeline);
                self.advance_switch();
            }
            StartupDecision::Nothing => info!("desk was emptied last session, opening nothing"),
            StartupDecision::Defaults(windows) => {
                info!(count = windows.len(), "first run, opening default windows");
                self.startup_queue = windows.into();
                if !self.startup_queue.is_empty() {
                    self.next_stagger = Some(Instant::now());
                }
            }
        }

        if let Err(e) = self.local.mark_initialized() {
            error!("could not record first run: {e}");
        }

        let (reply, rx) = oneshot::channel();
        self.sync.send(sync::Event::LoadOnce(reply));
        self.remote_load = Some(rx);
    }

    #[instrument(name = "desk::handle_event", skip(self))]
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(command) => {
                self.rejected = None;
                match self.handle_command(command) {
                    Ok(Change::None) => {}
                    Ok(Change::Layout) => {
                        let active = self.store.active_id().clone();
                        self.commit(Scope::Layouts(active));
                    }
                    Ok(Change::Workspaces) => self.commit(Scope::Full),
                    Err(e) => {
                        warn!("command rejected: {e}");
                        self.rejected = Some(e.to_string());
                    }
                }
            }
            Event::WindowReleased(id) => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    if !pipeline.ack_released(id) {
                        trace!(%id, "release not awaited");
                    }
                }
                self.advance_switch();
            }
            Event::WindowMounted(id) => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    if !pipeline.ack_mounted(id) {
                        trace!(%id, "mount not awaited");
                    }
                }
                self.advance_switch();
            }
            Event::RemoteStateLoaded(state) => self.reload(state),
            Event::Query(reply) => {
                _ = reply.send(self.snapshot());
            }
            Event::Shutdown => self.shutdown(),
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<Change, DeskError> {
        match command {
            Command::OpenWindow {
                title,
                position,
                size,
                component_state,
            } => {
                self.open(title, position, size, component_state)?;
                Ok(Change::Layout)
            }
            Command::CloseWindow { id } => {
                self.interaction.pointer_up(id);
                self.window_op(id, |reg, id| reg.close_window(id))
            }
            Command::BringToFront { id } => self.window_op(id, |reg, id| reg.bring_to_front(id)),
            Command::MinimizeWindow { id } => {
                self.interaction.pointer_up(id);
                self.window_op(id, |reg, id| reg.minimize_window(id))
            }
            Command::MaximizeWindow { id } => {
                self.window_op(id, |reg, id| reg.maximize_window(id))
            }
            Command::RestoreWindow { id } => self.window_op(id, |reg, id| reg.restore_window(id)),
            Command::PointerDown { id, handle, x, y } => {
                if !self.registry.contains(id) {
                    return Err(DeskError::UnknownWindow(id));
                }
                if !self.interaction.pointer_down(&mut self.registry, id, handle, Point::new(x, y))
                {
                    debug!(%id, "pointer down ignored");
                }
                Ok(Change::None)
            }
            Command::PointerMove { x, y } => {
                self.interaction.pointer_move(&mut self.registry, Point::new(x, y));
                Ok(Change::None)
            }
            Command::PointerUp { id } => {
                let ended = match id {
                    Some(id) => self.interaction.pointer_up(id).is_some(),
                    None => !self.interaction.pointer_up_all().is_empty(),
                };
                Ok(if ended { Change::Layout } else { Change::None })
            }
            Command::ViewportResized { width, height } => {
                self.interaction.set_viewport(Size::new(width, height));
                Ok(Change::None)
            }
            Command::CreateWorkspace { name } => {
                self.ensure_idle()?;
                let id = self.store.create_workspace(name, &self.registry);
                info!(%id, "workspace created");
                Ok(Change::Workspaces)
            }
            Command::DeleteWorkspace { id } => {
                self.ensure_idle()?;
                let is_main = self.store.get(&id).map(|w| w.is_main);
                if &id == self.store.active_id() && is_main == Some(false) {
                    // Close its windows through a regular switch first; the
                    // delete lands once Main is up.
                    let main = self.store.main().id.clone();
                    self.begin_switch(main)?;
                    self.delete_after_switch = Some(id);
                    return Ok(Change::None);
                }
                self.store.delete_workspace(&id)?;
                Ok(Change::Workspaces)
            }
            Command::RenameWorkspace { id, name } => {
                self.store.rename_workspace(&id, name)?;
                Ok(Change::Workspaces)
            }
            Command::SaveLayout => {
                self.ensure_idle()?;
                self.store.save_active_layouts(&self.registry);
                Ok(Change::Workspaces)
            }
            Command::SwitchWorkspace { id } => {
                self.begin_switch(id)?;
                Ok(Change::None)
            }
            Command::SetComponentState { id, state } => {
                if !self.registry.contains(id) {
                    return Err(DeskError::UnknownWindow(id));
                }
                let active = self.store.active_id().clone();
                let stored = self.store.active().window_layouts.iter().any(|l| l.id == id);
                if !stored {
                    self.store.save_active_layouts(&self.registry);
                }
                self.store.update_component_state(&active, id, state)?;
                Ok(Change::Layout)
            }
        }
    }

    fn window_op(
        &mut self,
        id: WindowId,
        op: impl FnOnce(&mut WindowRegistry<C>, WindowId) -> bool,
    ) -> Result<Change, DeskError> {
        if op(&mut self.registry, id) {
            Ok(Change::Layout)
        } else {
            Err(DeskError::UnknownWindow(id))
        }
    }

    fn ensure_idle(&self) -> Result<(), DeskError> {
        if self.pipeline.is_some() {
            Err(WorkspaceError::SwitchInProgress.into())
        } else {
            Ok(())
        }
    }

    fn open(
        &mut self,
        title: String,
        position: Option<Point>,
        size: Option<Size>,
        component_state: Option<ComponentState>,
    ) -> Result<WindowId, DeskError> {
        if title.trim().is_empty() {
            return Err(DeskError::EmptyTitle);
        }
        let kind = WindowKind::classify(&title);
        if let Some(state) = &component_state {
            if !state.fits(kind) {
                return Err(WorkspaceError::KindMismatch {
                    state: state.kind().as_ref().to_string(),
                    layout: kind.as_ref().to_string(),
                }
                .into());
            }
        }
        let position = position.unwrap_or_else(|| self.cascade_position());
        let size = size.unwrap_or(DEFAULT_SIZE);
        let candidate = WorkspaceLayout {
            id: WindowId::new(0),
            kind,
            title: title.clone(),
            position,
            size,
            is_minimized: false,
            z_index: 0,
            component_state: component_state.clone(),
        };
        let Some(content) = self.resolver.resolve(&candidate) else {
            return Err(DeskError::Unresolved(title));
        };
        let id = self.registry.open_window(
            OpenWindow::new(title, content)
                .at(position)
                .sized(size)
                .hide_header(kind.hides_header()),
        );
        if component_state.is_some() {
            let active = self.store.active_id().clone();
            self.store.save_active_layouts(&self.registry);
            self.store.update_component_state(&active, id, component_state)?;
        }
        Ok(id)
    }

    fn cascade_position(&self) -> Point {
        let chrome: &Chrome = self.interaction.chrome();
        let step = (self.registry.len() % 10) as f64 * CASCADE_STEP;
        Point::new(chrome.left + chrome.margin + step, chrome.top + chrome.margin + step)
    }

    fn next_seq(&mut self) -> u64 {
        self.switch_seq += 1;
        self.switch_seq
    }

    fn begin_switch(&mut self, target: WorkspaceId) -> Result<(), DeskError> {
        self.ensure_idle()?;
        self.interaction.cancel_all();
        let Some(start) = self.store.begin_switch(&target, &mut self.registry)? else {
            return Ok(());
        };
        self.start_pipeline(SwitchKind::Switch, start);
        Ok(())
    }

    fn start_pipeline(&mut self, kind: SwitchKind, start: SwitchStart) {
        self.sync.send(sync::Event::Suppress(true));
        let seq = self.next_seq();
        self.pipeline =
            Some(SwitchPipeline::releasing(seq, kind, start, self.switch_settings, Instant::now()));
        self.advance_switch();
    }

    /// Moves the in-flight switch forward as far as acknowledgements and
    /// deadlines allow.
    fn advance_switch(&mut self) {
        let now = Instant::now();
        loop {
            let phase = match &self.pipeline {
                Some(p) if p.settled(now).is_some() => p.phase(),
                _ => return,
            };
            match phase {
                SwitchPhase::Releasing => {
                    let outcome = self.store.restore_active(&mut self.registry, &mut self.resolver);
                    if outcome.unresolved > 0 {
                        debug!(
                            unresolved = outcome.unresolved,
                            "some stored windows had no content"
                        );
                    }
                    if let Some(p) = self.pipeline.as_mut() {
                        p.begin_mounting(outcome.opened, now);
                    }
                }
                SwitchPhase::Mounting => self.finish_switch(),
                SwitchPhase::Done => {
                    self.pipeline = None;
                    return;
                }
            }
        }
    }

    fn finish_switch(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.finish();
            info!(
                seq = pipeline.seq,
                kind = ?pipeline.kind,
                workspace = %pipeline.to,
                "workspace ready"
            );
        }
        self.store.finish_switch();
        self.sync.send(sync::Event::Suppress(false));
        if let Some(id) = self.delete_after_switch.take() {
            if let Err(e) = self.store.delete_workspace(&id) {
                warn!(%id, "delete after switch failed: {e}");
            }
        }
        self.commit(Scope::Full);
        if let Some(state) = self.deferred_reload.take() {
            self.reload(state);
        }
    }

    fn reload(&mut self, state: WorkspaceState) {
        if self.pipeline.is_some() {
            debug!("switch in flight, deferring reload");
            self.deferred_reload = Some(state);
            return;
        }
        if state == self.live_state() {
            debug!("loaded state matches local state");
            return;
        }
        self.startup_queue.clear();
        self.next_stagger = None;
        self.interaction.cancel_all();
        match self.store.begin_reload(state, &mut self.registry) {
            Ok(start) => self.start_pipeline(SwitchKind::Reload, start),
            Err(e) => warn!("reload refused: {e}"),
        }
    }

    fn open_next_default(&mut self) {
        if let Some(window) = self.startup_queue.pop_front() {
            let (position, size) = (Some(window.position()), Some(window.size()));
            match self.open(window.title.clone(), position, size, None) {
                Ok(id) => {
                    debug!(%id, title = %window.title, "opened default window");
                    let active = self.store.active_id().clone();
                    self.commit(Scope::Layouts(active));
                }
                Err(e) => warn!(title = %window.title, "default window skipped: {e}"),
            }
        }
        self.next_stagger =
            (!self.startup_queue.is_empty()).then(|| Instant::now() + self.stagger);
    }

    /// Stored layouts of the open windows in the active workspace.
    fn live_layouts(&self) -> Vec<WorkspaceLayout> {
        to_snapshot(self.registry.windows(), &self.store.active().window_layouts)
    }

    /// Workspace state with the active workspace's layouts taken from the
    /// open windows. While a switch is in flight the stored layouts are used
    /// as they are.
    fn live_state(&self) -> WorkspaceState {
        let mut state = self.store.state();
        if self.pipeline.is_none() {
            let active = self.store.active_id();
            if let Some(ws) = state.workspaces.iter_mut().find(|w| &w.id == active) {
                ws.window_layouts = self.live_layouts();
            }
        }
        state
    }

    fn persist(&self) {
        if let Err(e) = self.local.save_layout(&self.live_layouts()) {
            error!("could not save layout: {e}");
        }
        if let Err(e) = self.local.save_workspaces(&self.store.state()) {
            error!("could not save workspaces: {e}");
        }
    }

    /// Saves locally and schedules a sync. Skipped mid-switch; the switch
    /// commits when it finishes.
    fn commit(&mut self, scope: Scope) {
        if self.pipeline.is_some() {
            return;
        }
        self.persist();
        self.sync.send(sync::Event::Schedule { state: self.live_state(), scope });
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        info!("desk shutting down");
        self.interaction.cancel_all();
        self.persist();
        self.sync.send(sync::Event::Unload(self.live_state()));
        self.stopped = true;
    }

    pub fn snapshot(&self) -> DeskSnapshot {
        DeskSnapshot {
            active_workspace_id: self.store.active_id().clone(),
            switching: self.pipeline.is_some(),
            viewport: self.interaction.viewport(),
            windows: self
                .registry
                .windows()
                .into_iter()
                .map(|w| WindowView {
                    id: w.id,
                    title: w.title.clone(),
                    kind: WindowKind::classify(&w.title),
                    position: w.position,
                    size: w.size,
                    z_index: w.z_index,
                    is_minimized: w.is_minimized,
                    is_maximized: w.is_maximized,
                    hide_header: w.hide_header,
                    gesture: self.interaction.gesture(w.id).map(|g| {
                        if g.is_drag() { "dragging" } else { "resizing" }
                    }),
                })
                .collect(),
            workspaces: self
                .store
                .workspaces()
                .iter()
                .map(|w| WorkspaceView {
                    id: w.id.clone(),
                    name: w.name.clone(),
                    is_main: w.is_main,
                    stored_windows: w.window_layouts.len(),
                })
                .collect(),
            rejected: self.rejected.clone(),
        }
    }
}

async fn recv_remote(
    rx: &mut Option<oneshot::Receiver<Option<WorkspaceState>>>,
) -> Option<WorkspaceState> {
    match rx {
        Some(rx) => rx.await.ok().flatten(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
