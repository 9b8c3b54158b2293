//! Conversion between open windows and the persisted per-workspace layout
//! list.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};
use tracing::{debug, warn};

use super::geometry::{Point, Size};
use super::window::{OpenWindow, WindowDescriptor, WindowId};

/// Coarse panel classification derived from a window's title. The content
/// resolver uses it to pick how to rebuild a panel.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WindowKind {
    Chart,
    Scanner,
    Events,
    News,
    Watchlist,
    Chat,
    Settings,
    #[default]
    Other,
}

impl WindowKind {
    pub fn classify(title: &str) -> WindowKind {
        let title = title.trim();
        let lower = title.to_ascii_lowercase();
        if lower.starts_with("scanner:") {
            WindowKind::Scanner
        } else if lower.starts_with("events:") {
            WindowKind::Events
        } else if lower.starts_with("chart") {
            WindowKind::Chart
        } else if lower.starts_with("news") {
            WindowKind::News
        } else if lower.starts_with("watchlist") {
            WindowKind::Watchlist
        } else if lower.starts_with("chat") {
            WindowKind::Chat
        } else if lower.starts_with("settings") {
            WindowKind::Settings
        } else {
            WindowKind::Other
        }
    }

    /// Panels that draw their own header inside the window body.
    pub fn hides_header(self) -> bool { matches!(self, WindowKind::Scanner | WindowKind::Events) }
}

/// Panel-defined restoration data, one variant per panel kind that has any.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ComponentState {
    Chart {
        symbol: String,
        #[serde(default)]
        interval: Option<String>,
    },
    Scanner {
        preset: String,
        #[serde(default)]
        sort_column: Option<String>,
        #[serde(default)]
        sort_descending: bool,
    },
    Events {
        category: String,
        #[serde(default)]
        symbols: Vec<String>,
    },
    News {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Watchlist {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Chat {
        channel: String,
    },
}

impl ComponentState {
    pub fn kind(&self) -> WindowKind {
        match self {
            ComponentState::Chart { .. } => WindowKind::Chart,
            ComponentState::Scanner { .. } => WindowKind::Scanner,
            ComponentState::Events { .. } => WindowKind::Events,
            ComponentState::News { .. } => WindowKind::News,
            ComponentState::Watchlist { .. } => WindowKind::Watchlist,
            ComponentState::Chat { .. } => WindowKind::Chat,
        }
    }

    pub fn fits(&self, kind: WindowKind) -> bool { self.kind() == kind }
}

/// One persisted window entry inside a workspace.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceLayout {
    pub id: WindowId,
    #[serde(rename = "type", default)]
    pub kind: WindowKind,
    pub title: String,
    pub position: Point,
    pub size: Size,
    #[serde(default)]
    pub is_minimized: bool,
    #[serde(default)]
    pub z_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_state: Option<ComponentState>,
}

impl WorkspaceLayout {
    pub fn from_window<C>(window: &WindowDescriptor<C>) -> Self {
        Self {
            id: window.id,
            kind: WindowKind::classify(&window.title),
            title: window.title.clone(),
            position: window.position,
            size: window.size,
            is_minimized: window.is_minimized,
            z_index: window.z_index,
            component_state: None,
        }
    }

    pub fn has_title(&self) -> bool { !self.title.trim().is_empty() }
}

/// Snapshots `windows` back to front. Component state is carried over by id
/// from `previous`, the workspace's last stored layouts, since open windows
/// do not hold it themselves.
pub fn to_snapshot<'a, C: 'a>(
    windows: impl IntoIterator<Item = &'a WindowDescriptor<C>>,
    previous: &[WorkspaceLayout],
) -> Vec<WorkspaceLayout> {
    let mut layouts: Vec<WorkspaceLayout> = windows
        .into_iter()
        .map(|window| {
            let mut layout = WorkspaceLayout::from_window(window);
            let kind = layout.kind;
            layout.component_state = previous
                .iter()
                .find(|p| p.id == window.id)
                .and_then(|p| p.component_state.clone())
                .filter(|state| {
                    let fits = state.fits(kind);
                    if !fits {
                        warn!(
                            id = %window.id,
                            kind = kind.as_ref(),
                            "dropping component state of another kind"
                        );
                    }
                    fits
                });
            layout
        })
        .collect();
    layouts.sort_by_key(|l| (l.z_index, l.id));
    layouts
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreEntry {
    pub layout: WorkspaceLayout,
    pub hide_header: bool,
}

impl RestoreEntry {
    pub fn open_request<C>(&self, content: C) -> OpenWindow<C> {
        OpenWindow::new(self.layout.title.clone(), content)
            .with_id(self.layout.id)
            .at(self.layout.position)
            .sized(self.layout.size)
            .minimized(self.layout.is_minimized)
            .hide_header(self.hide_header)
    }
}

/// Windows to reopen for a workspace, in the order they should be opened so
/// that stacking order survives the round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestorePlan {
    pub entries: Vec<RestoreEntry>,
    pub skipped: usize,
}

pub fn from_snapshot(layouts: &[WorkspaceLayout]) -> RestorePlan {
    let mut plan = RestorePlan::default();
    for layout in layouts {
        if !layout.has_title() {
            plan.skipped += 1;
            continue;
        }
        let kind = WindowKind::classify(&layout.title);
        let component_state = layout.component_state.clone().filter(|state| {
            let fits = state.fits(kind);
            if !fits {
                warn!(
                    id = %layout.id,
                    kind = kind.as_ref(),
                    "dropping component state of another kind"
                );
            }
            fits
        });
        plan.entries.push(RestoreEntry {
            layout: WorkspaceLayout { kind, component_state, ..layout.clone() },
            hide_header: kind.hides_header(),
        });
    }
    plan.entries.sort_by_key(|e| e.layout.z_index);
    if plan.skipped > 0 {
        debug!(skipped = plan.skipped, "skipped untitled layouts");
    }
    plan
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::model::window::WindowRegistry;

    fn layout(id: u64, title: &str, z: i64) -> WorkspaceLayout {
        WorkspaceLayout {
            id: WindowId::new(id),
            kind: WindowKind::classify(title),
            title: title.to_string(),
            position: Point::new(300.0, 100.0),
            size: Size::new(400.0, 300.0),
            is_minimized: false,
            z_index: z,
            component_state: None,
        }
    }

    #[test]
    fn classifies_titles() {
        assert_eq!(WindowKind::classify("Scanner: Top Gainers"), WindowKind::Scanner);
        assert_eq!(WindowKind::classify("Events: Earnings"), WindowKind::Events);
        assert_eq!(WindowKind::classify("Chart"), WindowKind::Chart);
        assert_eq!(WindowKind::classify("Chart - AAPL"), WindowKind::Chart);
        assert_eq!(WindowKind::classify("News"), WindowKind::News);
        assert_eq!(WindowKind::classify("Scanner"), WindowKind::Other);
        assert_eq!(WindowKind::classify(""), WindowKind::Other);
    }

    #[test]
    fn only_self_headed_panels_hide_header() {
        let hiding: Vec<_> = WindowKind::iter().filter(|k| k.hides_header()).collect();
        assert_eq!(hiding, vec![WindowKind::Scanner, WindowKind::Events]);
    }

    #[test]
    fn snapshot_carries_component_state_by_id() {
        let mut reg = WindowRegistry::default();
        let chart = reg.open_window(OpenWindow::new("Chart", ()));
        let news = reg.open_window(OpenWindow::new("News", ()));

        let mut prev_chart = layout(chart.get(), "Chart", 1);
        prev_chart.component_state = Some(ComponentState::Chart {
            symbol: "AAPL".into(),
            interval: Some("5m".into()),
        });
        let mut stale = layout(news.get(), "News", 2);
        stale.component_state = Some(ComponentState::Chat { channel: "general".into() });

        let snap = to_snapshot(reg.windows(), &[prev_chart.clone(), stale]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, chart);
        assert_eq!(snap[0].component_state, prev_chart.component_state);
        assert_eq!(snap[1].id, news);
        assert_eq!(snap[1].component_state, None);
    }

    #[test]
    fn snapshot_is_ordered_back_to_front() {
        let mut reg = WindowRegistry::default();
        let a = reg.open_window(OpenWindow::new("A", ()));
        let b = reg.open_window(OpenWindow::new("B", ()));
        reg.bring_to_front(a);
        let ids: Vec<_> = to_snapshot(reg.windows(), &[]).iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn restore_plan_skips_untitled_and_orders_by_z() {
        let plan = from_snapshot(&[
            layout(1, "News", 30),
            layout(2, "  ", 10),
            layout(3, "Scanner: Volume", 20),
        ]);
        assert_eq!(plan.skipped, 1);
        let ids: Vec<_> = plan.entries.iter().map(|e| e.layout.id.get()).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(plan.entries[0].hide_header);
        assert!(!plan.entries[1].hide_header);
    }

    #[test]
    fn restore_plan_drops_component_state_of_another_kind() {
        let mut news = layout(1, "News", 10);
        news.component_state =
            Some(ComponentState::Chart { symbol: "AAPL".into(), interval: None });
        let mut chart = layout(2, "Chart", 20);
        chart.component_state =
            Some(ComponentState::Chart { symbol: "MSFT".into(), interval: None });

        let plan = from_snapshot(&[news, chart.clone()]);
        assert_eq!(plan.entries[0].layout.kind, WindowKind::News);
        assert_eq!(plan.entries[0].layout.component_state, None);
        assert_eq!(plan.entries[1].layout, chart);
    }

    #[test]
    fn restore_entry_builds_open_request() {
        let mut l = layout(9, "Events: Earnings", 5);
        l.is_minimized = true;
        let plan = from_snapshot(&[l]);
        let req = plan.entries[0].open_request("content");
        assert_eq!(req.id, Some(WindowId::new(9)));
        assert_eq!(req.title, "Events: Earnings");
        assert!(req.is_minimized);
        assert!(req.hide_header);
        assert_eq!(req.position, Point::new(300.0, 100.0));
    }

    #[test]
    fn layout_wire_format_is_camel_case() {
        let mut l = layout(4, "Chart", 12);
        l.component_state = Some(ComponentState::Chart { symbol: "MSFT".into(), interval: None });
        let json = serde_json::to_value(&l).unwrap();
        assert_eq!(json["type"], "chart");
        assert_eq!(json["isMinimized"], false);
        assert_eq!(json["zIndex"], 12);
        assert_eq!(json["componentState"]["chart"]["symbol"], "MSFT");
        let back: WorkspaceLayout = serde_json::from_value(json).unwrap();
        assert_eq!(back, l);
    }
}
