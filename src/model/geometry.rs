//! Window geometry and the clamps that keep floating windows inside the
//! usable part of the viewport.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self { Self { x, y } }

    pub fn offset(self, delta: Point) -> Point { Point::new(self.x + delta.x, self.y + delta.y) }

    pub fn delta_from(self, origin: Point) -> Point {
        Point::new(self.x - origin.x, self.y - origin.y)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self { Self { width, height } }
}

/// Per-window size bounds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    pub min_width: f64,
    pub min_height: f64,
    pub max_width: f64,
    pub max_height: f64,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_width: 200.0,
            min_height: 120.0,
            max_width: 3840.0,
            max_height: 2160.0,
        }
    }
}

impl Constraints {
    /// Raises each maximum to at least its minimum so that clamping always
    /// has a non-empty range to land in.
    pub fn normalized(self) -> Self {
        let min_width = finite_or(self.min_width, 0.0).max(0.0);
        let min_height = finite_or(self.min_height, 0.0).max(0.0);
        Self {
            min_width,
            min_height,
            max_width: finite_or(self.max_width, f64::MAX).max(min_width),
            max_height: finite_or(self.max_height, f64::MAX).max(min_height),
        }
    }
}

/// Fixed obstructions around the window area: a top navigation bar, a left
/// sidebar, a margin kept clear on every side, and a strip at the bottom
/// below which a window's top edge may not go.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Chrome {
    #[serde(default = "default_top_bar_height")]
    pub top: f64,
    #[serde(default = "default_sidebar_width")]
    pub left: f64,
    #[serde(default = "default_margin")]
    pub margin: f64,
    #[serde(default = "default_reserved_bottom")]
    pub reserved_bottom: f64,
}

impl Default for Chrome {
    fn default() -> Self {
        Self {
            top: default_top_bar_height(),
            left: default_sidebar_width(),
            margin: default_margin(),
            reserved_bottom: default_reserved_bottom(),
        }
    }
}

fn default_top_bar_height() -> f64 { 64.0 }
fn default_sidebar_width() -> f64 { 256.0 }
fn default_margin() -> f64 { 20.0 }
fn default_reserved_bottom() -> f64 { 100.0 }

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// Clamps `value` into `[lo, hi]`. When the range is empty the lower bound
/// wins; non-finite values land on the lower bound.
fn clamp_axis(value: f64, lo: f64, hi: f64) -> f64 {
    if !value.is_finite() {
        return lo;
    }
    value.min(hi).max(lo)
}

/// Bounds a window's top-left corner to the chrome-aware viewport.
///
/// `x` lands in `[chrome.left + margin, viewport.width - size.width - margin]`
/// and `y` in `[chrome.top + margin, viewport.height - reserved_bottom]`. When
/// the viewport is too small for the window, the window is pinned to the
/// top-left of the usable area.
pub fn clamp_position(pos: Point, size: Size, viewport: Size, chrome: &Chrome) -> Point {
    let min_x = chrome.left + chrome.margin;
    let min_y = chrome.top + chrome.margin;
    let max_x = finite_or(viewport.width - size.width - chrome.margin, min_x);
    let max_y = finite_or(viewport.height - chrome.reserved_bottom, min_y);

    Point::new(clamp_axis(pos.x, min_x, max_x), clamp_axis(pos.y, min_y, max_y))
}

/// Clamps each dimension independently into its `[min, max]` range.
pub fn clamp_size(size: Size, constraints: &Constraints) -> Size {
    let c = constraints.normalized();
    Size::new(
        clamp_axis(size.width, c.min_width, c.max_width),
        clamp_axis(size.height, c.min_height, c.max_height),
    )
}

/// True when `pos` already satisfies [`clamp_position`]'s bounds.
pub fn is_within_bounds(pos: Point, size: Size, viewport: Size, chrome: &Chrome) -> bool {
    clamp_position(pos, size, viewport, chrome) == pos
}
