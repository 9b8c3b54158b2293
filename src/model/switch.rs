//! Phases of an in-flight workspace switch.
//!
//! A switch first waits for the host to release every window it closed, then
//! waits for every window it reopened to mount. Each wait ends when all
//! acknowledgements are in or when its deadline passes, whichever is first.

use tokio::time::Instant;
use tracing::{debug, warn};

use super::window::WindowId;
use super::workspace::{SwitchStart, WorkspaceId};
use crate::common::collections::BTreeSet;
use crate::common::config::SwitchSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// User-requested move to another workspace.
    Switch,
    /// Freshly loaded state replaced the local one.
    Reload,
    /// Restoring the saved layout at startup.
    Startup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    Releasing,
    Mounting,
    Done,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Acknowledged,
    TimedOut { pending: usize },
}

#[derive(Debug, Clone)]
pub struct SwitchPipeline {
    pub seq: u64,
    pub kind: SwitchKind,
    pub from: WorkspaceId,
    pub to: WorkspaceId,
    phase: SwitchPhase,
    pending: BTreeSet<WindowId>,
    deadline: Instant,
    settings: SwitchSettings,
}

impl SwitchPipeline {
    pub fn releasing(
        seq: u64,
        kind: SwitchKind,
        start: SwitchStart,
        settings: SwitchSettings,
        now: Instant,
    ) -> Self {
        Self {
            seq,
            kind,
            from: start.from,
            to: start.to,
            phase: SwitchPhase::Releasing,
            pending: start.released.into_iter().collect(),
            deadline: now + settings.release_timeout,
            settings,
        }
    }

    /// A pipeline with nothing to release, used when windows are only being
    /// opened.
    pub fn mounting(
        seq: u64,
        kind: SwitchKind,
        workspace: WorkspaceId,
        mounted: Vec<WindowId>,
        settings: SwitchSettings,
        now: Instant,
    ) -> Self {
        let mut pipeline = Self::releasing(
            seq,
            kind,
            SwitchStart {
                from: workspace.clone(),
                to: workspace,
                released: Vec::new(),
            },
            settings,
            now,
        );
        pipeline.begin_mounting(mounted, now);
        pipeline
    }

    pub fn phase(&self) -> SwitchPhase { self.phase }

    pub fn deadline(&self) -> Instant { self.deadline }

    pub fn pending(&self) -> impl Iterator<Item = WindowId> + '_ { self.pending.iter().copied() }

    pub fn is_done(&self) -> bool { self.phase == SwitchPhase::Done }

    /// Records that the host finished tearing down a closed window.
    pub fn ack_released(&mut self, id: WindowId) -> bool {
        self.phase == SwitchPhase::Releasing && self.pending.remove(&id)
    }

    /// Records that a reopened window finished mounting.
    pub fn ack_mounted(&mut self, id: WindowId) -> bool {
        self.phase == SwitchPhase::Mounting && self.pending.remove(&id)
    }

    /// Whether the current phase may end at `now`.
    pub fn settled(&self, now: Instant) -> Option<Settled> {
        if self.phase == SwitchPhase::Done {
            return None;
        }
        if self.pending.is_empty() {
            Some(Settled::Acknowledged)
        } else if now >= self.deadline {
            Some(Settled::TimedOut { pending: self.pending.len() })
        } else {
            None
        }
    }

    pub fn begin_mounting(&mut self, mounted: Vec<WindowId>, now: Instant) {
        self.log_unacknowledged();
        debug!(seq = self.seq, to = %self.to, windows = mounted.len(), "mounting");
        self.phase = SwitchPhase::Mounting;
        self.pending = mounted.into_iter().collect();
        self.deadline = now + self.settings.mount_timeout;
    }

    pub fn finish(&mut self) {
        self.log_unacknowledged();
        debug!(seq = self.seq, to = %self.to, "switch pipeline done");
        self.phase = SwitchPhase::Done;
        self.pending.clear();
    }

    fn log_unacknowledged(&self) {
        if !self.pending.is_empty() {
            warn!(
                seq = self.seq,
                phase = ?self.phase,
                pending = ?self.pending,
                "settle timeout, continuing without acknowledgement"
            );
        }
    }
}
