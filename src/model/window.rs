use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::geometry::{Constraints, Point, Size};
use super::z_index::ZIndexAllocator;
use crate::actor;
use crate::common::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WindowId(u64);

impl WindowId {
    pub const fn new(raw: u64) -> Self { Self(raw) }

    pub const fn get(self) -> u64 { self.0 }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// One open floating window. `content` is whatever the host rendered for it;
/// the registry never looks inside.
#[derive(Debug, Clone)]
pub struct WindowDescriptor<C> {
    pub id: WindowId,
    pub title: String,
    pub content: C,
    pub position: Point,
    pub size: Size,
    pub constraints: Constraints,
    pub z_index: i64,
    pub is_minimized: bool,
    pub is_maximized: bool,
    pub hide_header: bool,
}

/// Arguments for [`WindowRegistry::open_window`].
#[derive(Debug, Clone)]
pub struct OpenWindow<C> {
    pub id: Option<WindowId>,
    pub title: String,
    pub content: C,
    pub position: Point,
    pub size: Size,
    pub constraints: Option<Constraints>,
    pub is_minimized: bool,
    pub hide_header: bool,
}

impl<C> OpenWindow<C> {
    pub fn new(title: impl Into<String>, content: C) -> Self {
        Self {
            id: None,
            title: title.into(),
            content,
            position: Point::default(),
            size: Size::new(400.0, 300.0),
            constraints: None,
            is_minimized: false,
            hide_header: false,
        }
    }

    pub fn with_id(mut self, id: WindowId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at(mut self, position: Point) -> Self {
        self.position = position;
        self
    }

    pub fn sized(mut self, size: Size) -> Self {
        self.size = size;
        self
    }

    pub fn constrained(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn minimized(mut self, is_minimized: bool) -> Self {
        self.is_minimized = is_minimized;
        self
    }

    pub fn hide_header(mut self, hide_header: bool) -> Self {
        self.hide_header = hide_header;
        self
    }
}

/// Shallow partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowUpdate {
    pub title: Option<String>,
    pub position: Option<Point>,
    pub size: Option<Size>,
    pub z_index: Option<i64>,
    pub is_minimized: Option<bool>,
    pub is_maximized: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Opened { id: WindowId, title: String },
    Changed { id: WindowId },
    /// Every window closed by one operation, delivered as a single batch.
    Closed { windows: Vec<(WindowId, String)> },
}

/// In-memory source of truth for every open floating window.
///
/// All mutation goes through the named operations below; each one notifies
/// subscribers synchronously before returning.
pub struct WindowRegistry<C> {
    windows: BTreeMap<WindowId, WindowDescriptor<C>>,
    z: ZIndexAllocator,
    next_id: u64,
    default_constraints: Constraints,
    subscribers: Vec<actor::Sender<RegistryEvent>>,
}

impl<C> Default for WindowRegistry<C> {
    fn default() -> Self { Self::new(ZIndexAllocator::default(), Constraints::default()) }
}

impl<C> WindowRegistry<C> {
    pub fn new(z: ZIndexAllocator, default_constraints: Constraints) -> Self {
        Self {
            windows: BTreeMap::new(),
            z,
            next_id: 1,
            default_constraints,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> actor::Receiver<RegistryEvent> {
        let (tx, rx) = actor::channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: RegistryEvent) {
        self.subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    /// Inserts a window and returns its id. A requested id is honoured unless
    /// it collides with a window that is currently open.
    pub fn open_window(&mut self, open: OpenWindow<C>) -> WindowId {
        let id = match open.id {
            Some(id) if !self.windows.contains_key(&id) => {
                self.next_id = self.next_id.max(id.get().saturating_add(1));
                id
            }
            Some(id) => {
                let fresh = self.fresh_id();
                debug!(requested = %id, assigned = %fresh, "requested window id in use");
                fresh
            }
            None => self.fresh_id(),
        };
        let z_index = self.issue_z();
        let title = open.title.clone();
        self.windows.insert(
            id,
            WindowDescriptor {
                id,
                title: open.title,
                content: open.content,
                position: open.position,
                size: open.size,
                constraints: open.constraints.unwrap_or(self.default_constraints).normalized(),
                z_index,
                is_minimized: open.is_minimized,
                is_maximized: false,
                hide_header: open.hide_header,
            },
        );
        debug!(%id, %title, z_index, "opened window");
        self.notify(RegistryEvent::Opened { id, title });
        id
    }

    fn fresh_id(&mut self) -> WindowId {
        loop {
            let id = WindowId::new(self.next_id);
            let exhausted = self.next_id == u64::MAX;
            self.next_id = self.next_id.saturating_add(1);
            if !self.windows.contains_key(&id) {
                return id;
            }
            if exhausted {
                return self.lowest_free_id();
            }
        }
    }

    /// Smallest id above zero that no open window holds.
    fn lowest_free_id(&self) -> WindowId {
        let mut candidate = 1u64;
        for id in self.windows.keys() {
            if id.get() == candidate {
                candidate = candidate.saturating_add(1);
            } else if id.get() > candidate {
                break;
            }
        }
        WindowId::new(candidate)
    }

    fn issue_z(&mut self) -> i64 {
        if self.z.would_wrap() {
            self.renormalize_z();
        }
        self.z.next()
    }

    /// Re-issues tokens to every open window in current stacking order so a
    /// wrap never inverts the relative order of open windows.
    fn renormalize_z(&mut self) {
        let mut order: Vec<(i64, WindowId)> =
            self.windows.values().map(|w| (w.z_index, w.id)).collect();
        order.sort_unstable();
        let room = self.z.ceiling() - self.z.base();
        if order.len() as i64 >= room {
            warn!(open = order.len(), room, "too many windows to renormalize stacking order");
        }
        self.z.reset();
        for (_, id) in order {
            let z = self.z.next();
            if let Some(window) = self.windows.get_mut(&id) {
                window.z_index = z;
            }
        }
        debug!(current = self.z.current(), "renormalized stacking order");
    }

    pub fn close_window(&mut self, id: WindowId) -> bool {
        let Some(window) = self.windows.remove(&id) else { return false };
        debug!(%id, title = %window.title, "closed window");
        self.notify(RegistryEvent::Closed { windows: vec![(id, window.title)] });
        true
    }

    /// Closes every open window as one batch and returns their ids.
    pub fn close_all(&mut self) -> Vec<WindowId> {
        let closed: Vec<(WindowId, String)> = std::mem::take(&mut self.windows)
            .into_values()
            .map(|w| (w.id, w.title))
            .collect();
        let ids = closed.iter().map(|(id, _)| *id).collect();
        if !closed.is_empty() {
            debug!(count = closed.len(), "closed all windows");
            self.notify(RegistryEvent::Closed { windows: closed });
        }
        ids
    }

    pub fn update_window(&mut self, id: WindowId, update: WindowUpdate) -> bool {
        let Some(window) = self.windows.get_mut(&id) else { return false };
        if let Some(title) = update.title {
            window.title = title;
        }
        if let Some(position) = update.position {
            window.position = position;
        }
        if let Some(size) = update.size {
            window.size = size;
        }
        if let Some(z_index) = update.z_index {
            window.z_index = z_index;
        }
        if let Some(is_minimized) = update.is_minimized {
            window.is_minimized = is_minimized;
        }
        if let Some(is_maximized) = update.is_maximized {
            window.is_maximized = is_maximized;
        }
        trace!(%id, "updated window");
        self.notify(RegistryEvent::Changed { id });
        true
    }

    pub fn bring_to_front(&mut self, id: WindowId) -> bool {
        if !self.windows.contains_key(&id) {
            return false;
        }
        let z_index = self.issue_z();
        self.update_window(id, WindowUpdate { z_index: Some(z_index), ..Default::default() })
    }

    pub fn minimize_window(&mut self, id: WindowId) -> bool {
        self.update_window(id, WindowUpdate {
            is_minimized: Some(true),
            is_maximized: Some(false),
            ..Default::default()
        })
    }

    pub fn maximize_window(&mut self, id: WindowId) -> bool {
        self.update_window(id, WindowUpdate {
            is_minimized: Some(false),
            is_maximized: Some(true),
            ..Default::default()
        })
    }

    pub fn restore_window(&mut self, id: WindowId) -> bool {
        self.update_window(id, WindowUpdate {
            is_minimized: Some(false),
            is_maximized: Some(false),
            ..Default::default()
        })
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowDescriptor<C>> { self.windows.get(&id) }

    pub fn contains(&self, id: WindowId) -> bool { self.windows.contains_key(&id) }

    pub fn len(&self) -> usize { self.windows.len() }

    pub fn is_empty(&self) -> bool { self.windows.is_empty() }

    pub fn ids(&self) -> Vec<WindowId> { self.windows.keys().copied().collect() }

    /// Open windows ordered back to front.
    pub fn windows(&self) -> Vec<&WindowDescriptor<C>> {
        let mut windows: Vec<_> = self.windows.values().collect();
        windows.sort_by_key(|w| (w.z_index, w.id));
        windows
    }

    pub fn top_window(&self) -> Option<WindowId> {
        self.windows.values().max_by_key(|w| (w.z_index, w.id)).map(|w| w.id)
    }

    pub fn find_by_title(&self, title: &str) -> Option<WindowId> {
        self.windows.values().find(|w| w.title == title).map(|w| w.id)
    }

    pub fn current_z(&self) -> i64 { self.z.current() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn open(reg: &mut WindowRegistry<()>, title: &str, x: f64, y: f64) -> WindowId {
        reg.open_window(
            OpenWindow::new(title, ()).at(Point::new(x, y)).sized(Size::new(300.0, 200.0)),
        )
    }

    #[test]
    fn ids_are_pairwise_distinct() {
        let mut reg = WindowRegistry::default();
        let ids: Vec<_> = (0..50).map(|i| open(&mut reg, &format!("w{i}"), 0.0, 0.0)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn requested_max_id_does_not_exhaust_allocation() {
        let mut reg = WindowRegistry::default();
        let a = open(&mut reg, "A", 0.0, 0.0);
        let last = WindowId::new(u64::MAX);
        assert_eq!(reg.open_window(OpenWindow::new("Last", ()).with_id(last)), last);

        let b = open(&mut reg, "B", 0.0, 0.0);
        let c = open(&mut reg, "C", 0.0, 0.0);
        assert_eq!(a, WindowId::new(1));
        assert_eq!(b, WindowId::new(2));
        assert_eq!(c, WindowId::new(3));

        reg.close_window(last);
        assert_eq!(open(&mut reg, "D", 0.0, 0.0), last);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn later_opens_stack_above_earlier_ones() {
        let mut reg = WindowRegistry::default();
        let a = open(&mut reg, "A", 276.0, 84.0);
        let b = open(&mut reg, "B", 400.0, 150.0);
        assert_eq!(reg.get(a).unwrap().z_index, 11);
        assert_eq!(reg.get(b).unwrap().z_index, 12);
        assert_eq!(reg.top_window(), Some(b));
    }

    #[test]
    fn bring_to_front_issues_a_higher_token() {
        let mut reg = WindowRegistry::default();
        let a = open(&mut reg, "A", 276.0, 84.0);
        let b = open(&mut reg, "B", 400.0, 150.0);
        assert!(reg.bring_to_front(a));
        assert_eq!(reg.get(a).unwrap().z_index, 13);
        assert!(reg.get(a).unwrap().z_index > reg.get(b).unwrap().z_index);
        assert_eq!(reg.top_window(), Some(a));
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let mut reg: WindowRegistry<()> = WindowRegistry::default();
        let ghost = WindowId::new(99);
        assert!(!reg.close_window(ghost));
        assert!(!reg.bring_to_front(ghost));
        assert!(!reg.update_window(ghost, WindowUpdate::default()));
        assert!(!reg.minimize_window(ghost));
        assert_eq!(reg.current_z(), 10);
    }

    #[test]
    fn minimize_and_maximize_exclude_each_other() {
        let mut reg = WindowRegistry::default();
        let a = open(&mut reg, "A", 0.0, 0.0);
        reg.maximize_window(a);
        assert!(reg.get(a).unwrap().is_maximized);
        reg.minimize_window(a);
        let w = reg.get(a).unwrap();
        assert!(w.is_minimized && !w.is_maximized);
        reg.maximize_window(a);
        let w = reg.get(a).unwrap();
        assert!(!w.is_minimized && w.is_maximized);
        reg.restore_window(a);
        let w = reg.get(a).unwrap();
        assert!(!w.is_minimized && !w.is_maximized);
    }

    #[test]
    fn requested_id_is_used_when_free_and_replaced_when_taken() {
        let mut reg = WindowRegistry::default();
        let a = reg.open_window(OpenWindow::new("A", ()).with_id(WindowId::new(7)));
        assert_eq!(a, WindowId::new(7));
        let b = reg.open_window(OpenWindow::new("B", ()).with_id(WindowId::new(7)));
        assert_ne!(b, a);
        let c = open(&mut reg, "C", 0.0, 0.0);
        assert!(c.get() > 7);
    }

    #[test]
    fn closed_ids_may_be_reused() {
        let mut reg = WindowRegistry::default();
        let a = open(&mut reg, "A", 0.0, 0.0);
        reg.close_window(a);
        let again = reg.open_window(OpenWindow::new("A", ()).with_id(a));
        assert_eq!(again, a);
    }

    #[test]
    fn update_merges_only_given_fields() {
        let mut reg = WindowRegistry::default();
        let a = open(&mut reg, "A", 10.0, 20.0);
        reg.update_window(a, WindowUpdate {
            position: Some(Point::new(50.0, 60.0)),
            ..Default::default()
        });
        let w = reg.get(a).unwrap();
        assert_eq!(w.position, Point::new(50.0, 60.0));
        assert_eq!(w.size, Size::new(300.0, 200.0));
        assert_eq!(w.title, "A");
    }

    #[test]
    fn subscribers_see_mutations_in_order() {
        let mut reg = WindowRegistry::default();
        let mut rx = reg.subscribe();
        let a = open(&mut reg, "A", 0.0, 0.0);
        let b = open(&mut reg, "B", 0.0, 0.0);
        reg.bring_to_front(a);
        reg.close_all();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).map(|(_, e)| e).collect();
        assert_eq!(events, vec![
            RegistryEvent::Opened { id: a, title: "A".into() },
            RegistryEvent::Opened { id: b, title: "B".into() },
            RegistryEvent::Changed { id: a },
            RegistryEvent::Closed {
                windows: vec![(a, "A".into()), (b, "B".into())],
            },
        ]);
        assert!(reg.is_empty());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut reg = WindowRegistry::default();
        let rx = reg.subscribe();
        drop(rx);
        open(&mut reg, "A", 0.0, 0.0);
        assert!(reg.subscribers.is_empty());
    }

    #[test]
    fn wrap_renormalizes_without_inverting_order() {
        let mut reg = WindowRegistry::new(ZIndexAllocator::new(10, 14), Constraints::default());
        let a = open(&mut reg, "A", 0.0, 0.0);
        let b = open(&mut reg, "B", 0.0, 0.0);
        let c = open(&mut reg, "C", 0.0, 0.0);
        reg.bring_to_front(a);
        // a=14 is at the ceiling; the next bring-to-front must wrap.
        reg.bring_to_front(b);

        let order: Vec<_> = reg.windows().iter().map(|w| w.id).collect();
        assert_eq!(order, vec![c, a, b]);
        for w in reg.windows() {
            assert!(w.z_index > 10 && w.z_index <= 14);
        }
    }
}
