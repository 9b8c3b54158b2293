//! Pointer-driven drag and resize of floating windows.
//!
//! Each window runs its own small state machine, `Idle -> Dragging -> Idle`
//! or `Idle -> Resizing -> Idle`. A window is idle exactly when it has no
//! entry in the controller. Between `pointer_down` and the next pointer event
//! the controller does nothing; the host routes every global pointer move to
//! [`InteractionController::pointer_move`] until the matching `pointer_up`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::geometry::{Chrome, Point, Size, clamp_position, clamp_size};
use super::window::{WindowId, WindowRegistry, WindowUpdate};
use crate::common::collections::HashMap;

bitflags! {
    /// Window edges moved by a resize handle. The top-left corner stays put.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResizeEdges: u8 {
        const RIGHT = 0b01;
        const BOTTOM = 0b10;
    }
}

/// The region of a window a gesture started on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GestureHandle {
    /// The title bar.
    Header,
    ResizeRight,
    ResizeBottom,
    ResizeBottomRight,
}

impl GestureHandle {
    pub fn resize_edges(self) -> Option<ResizeEdges> {
        match self {
            GestureHandle::Header => None,
            GestureHandle::ResizeRight => Some(ResizeEdges::RIGHT),
            GestureHandle::ResizeBottom => Some(ResizeEdges::BOTTOM),
            GestureHandle::ResizeBottomRight => Some(ResizeEdges::RIGHT | ResizeEdges::BOTTOM),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Dragging {
        start_pointer: Point,
        start_position: Point,
    },
    Resizing {
        edges: ResizeEdges,
        start_pointer: Point,
        start_size: Size,
    },
}

impl Gesture {
    pub fn is_drag(&self) -> bool { matches!(self, Gesture::Dragging { .. }) }

    pub fn is_resize(&self) -> bool { matches!(self, Gesture::Resizing { .. }) }
}

#[derive(Debug, Clone)]
pub struct InteractionController {
    gestures: HashMap<WindowId, Gesture>,
    viewport: Size,
    chrome: Chrome,
}

impl InteractionController {
    pub fn new(viewport: Size, chrome: Chrome) -> Self {
        Self {
            gestures: HashMap::default(),
            viewport,
            chrome,
        }
    }

    pub fn viewport(&self) -> Size { self.viewport }

    pub fn chrome(&self) -> &Chrome { &self.chrome }

    /// Records a new viewport size. Idle windows that are now out of bounds
    /// stay where they are until their next gesture.
    pub fn set_viewport(&mut self, viewport: Size) {
        debug!(?viewport, "viewport changed");
        self.viewport = viewport;
    }

    pub fn gesture(&self, id: WindowId) -> Option<Gesture> { self.gestures.get(&id).copied() }

    pub fn is_active(&self) -> bool { !self.gestures.is_empty() }

    /// Starts a drag or resize. Brings the window to front before anything
    /// else happens. Returns false if the window is unknown, minimized, or
    /// already mid-gesture.
    pub fn pointer_down<C>(
        &mut self,
        registry: &mut WindowRegistry<C>,
        id: WindowId,
        handle: GestureHandle,
        pointer: Point,
    ) -> bool {
        if self.gestures.contains_key(&id) {
            trace!(%id, "pointer down ignored, gesture already active");
            return false;
        }
        let Some(window) = registry.get(id) else { return false };
        if window.is_minimized {
            return false;
        }
        let gesture = match handle.resize_edges() {
            None => Gesture::Dragging {
                start_pointer: pointer,
                start_position: window.position,
            },
            Some(edges) => Gesture::Resizing {
                edges,
                start_pointer: pointer,
                start_size: window.size,
            },
        };

        registry.bring_to_front(id);
        debug!(%id, ?gesture, "gesture started");
        self.gestures.insert(id, gesture);
        true
    }

    /// Advances every active gesture to `pointer`.
    pub fn pointer_move<C>(&mut self, registry: &mut WindowRegistry<C>, pointer: Point) {
        let mut vanished = Vec::new();
        for (&id, gesture) in &self.gestures {
            let Some(window) = registry.get(id) else {
                vanished.push(id);
                continue;
            };
            let update = match *gesture {
                Gesture::Dragging { start_pointer, start_position } => {
                    let delta = pointer.delta_from(start_pointer);
                    let position = clamp_position(
                        start_position.offset(delta),
                        window.size,
                        self.viewport,
                        &self.chrome,
                    );
                    WindowUpdate { position: Some(position), ..Default::default() }
                }
                Gesture::Resizing { edges, start_pointer, start_size } => {
                    let delta = pointer.delta_from(start_pointer);
                    let mut size = window.size;
                    if edges.contains(ResizeEdges::RIGHT) {
                        size.width = start_size.width + delta.x;
                    }
                    if edges.contains(ResizeEdges::BOTTOM) {
                        size.height = start_size.height + delta.y;
                    }
                    let size = clamp_size(size, &window.constraints);
                    WindowUpdate { size: Some(size), ..Default::default() }
                }
            };
            trace!(%id, ?update, "gesture moved");
            registry.update_window(id, update);
        }
        for id in vanished {
            debug!(%id, "dropping gesture for closed window");
            self.gestures.remove(&id);
        }
    }

    /// Ends the gesture on `id`. Returns the gesture that was active, if any.
    pub fn pointer_up(&mut self, id: WindowId) -> Option<Gesture> {
        let ended = self.gestures.remove(&id);
        if ended.is_some() {
            debug!(%id, "gesture ended");
        }
        ended
    }

    /// Ends every gesture, returning the windows that were mid-gesture.
    pub fn pointer_up_all(&mut self) -> Vec<WindowId> {
        self.gestures.drain().map(|(id, _)| id).collect()
    }

    pub fn cancel_all(&mut self) { self.gestures.clear(); }
}
