use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::model::geometry::{Chrome, Constraints, Point, Size};

pub fn data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir).join(".tradewm")
}
pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(std::env::temp_dir)
        .join("tradewm")
        .join("config.toml")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub viewport: ViewportSettings,
    #[serde(default)]
    pub chrome: Chrome,
    #[serde(default)]
    pub stacking: StackingSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub switch: SwitchSettings,
    #[serde(default)]
    pub startup: StartupSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ViewportSettings {
    #[serde(default = "default_viewport_width")]
    pub width: f64,
    #[serde(default = "default_viewport_height")]
    pub height: f64,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            width: default_viewport_width(),
            height: default_viewport_height(),
        }
    }
}

impl ViewportSettings {
    pub fn size(&self) -> Size { Size::new(self.width, self.height) }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StackingSettings {
    #[serde(default = "default_z_base")]
    pub base: i64,
    #[serde(default = "default_z_ceiling")]
    pub ceiling: i64,
}

impl Default for StackingSettings {
    fn default() -> Self {
        Self {
            base: default_z_base(),
            ceiling: default_z_ceiling(),
        }
    }
}

/// Default size bounds for windows that do not bring their own.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WindowSettings {
    #[serde(default = "default_min_width")]
    pub min_width: f64,
    #[serde(default = "default_min_height")]
    pub min_height: f64,
    #[serde(default = "default_max_width")]
    pub max_width: f64,
    #[serde(default = "default_max_height")]
    pub max_height: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

impl WindowSettings {
    pub fn constraints(&self) -> Constraints {
        Constraints {
            min_width: self.min_width,
            min_height: self.min_height,
            max_width: self.max_width,
            max_height: self.max_height,
        }
    }
}

/// Upper bounds on how long each workspace switch phase waits for the host
/// to acknowledge window teardown and mount.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SwitchSettings {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "release_timeout_ms", default = "default_release_timeout")]
    pub release_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "mount_timeout_ms", default = "default_mount_timeout")]
    pub mount_timeout: Duration,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            release_timeout: default_release_timeout(),
            mount_timeout: default_mount_timeout(),
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StartupSettings {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "stagger_ms", default = "default_stagger")]
    pub stagger: Duration,
    #[serde(default)]
    pub default_windows: Vec<DefaultWindow>,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            stagger: default_stagger(),
            default_windows: Vec::new(),
        }
    }
}

/// A window opened on the very first run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DefaultWindow {
    pub title: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_window_width")]
    pub width: f64,
    #[serde(default = "default_window_height")]
    pub height: f64,
}

impl DefaultWindow {
    pub fn position(&self) -> Point { Point::new(self.x, self.y) }

    pub fn size(&self) -> Size { Size::new(self.width, self.height) }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms", default = "default_debounce")]
    pub debounce: Duration,
    /// Base URL of the remote preference service.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            endpoint: None,
            identity: None,
        }
    }
}

fn default_viewport_width() -> f64 { 1920.0 }
fn default_viewport_height() -> f64 { 1080.0 }
fn default_z_base() -> i64 { 10 }
fn default_z_ceiling() -> i64 { 10_000 }
fn default_min_width() -> f64 { 200.0 }
fn default_min_height() -> f64 { 120.0 }
fn default_max_width() -> f64 { 3840.0 }
fn default_max_height() -> f64 { 2160.0 }
fn default_window_width() -> f64 { 400.0 }
fn default_window_height() -> f64 { 300.0 }
fn default_release_timeout() -> Duration { Duration::from_millis(100) }
fn default_mount_timeout() -> Duration { Duration::from_millis(300) }
fn default_stagger() -> Duration { Duration::from_millis(150) }
fn default_debounce() -> Duration { Duration::from_millis(2000) }

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    /// Reads `path` when it exists, otherwise falls back to the built-in
    /// defaults.
    pub fn read_or_default(path: &Path) -> anyhow::Result<Config> {
        if path.exists() {
            Self::read(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn default() -> Config {
        // The embedded file is covered by `default_config_parses`.
        Self::parse(include_str!("../../tradewm.default.toml")).unwrap_or_else(|_| Config {
            viewport: ViewportSettings::default(),
            chrome: Chrome::default(),
            stacking: StackingSettings::default(),
            window: WindowSettings::default(),
            switch: SwitchSettings::default(),
            startup: StartupSettings::default(),
            sync: SyncSettings::default(),
        })
    }

    pub fn parse(buf: &str) -> anyhow::Result<Config> {
        match toml::from_str::<Config>(buf) {
            Ok(c) => Ok(c),
            Err(e) => bail!("invalid configuration: {e}"),
        }
    }

    /// Validates the entire configuration and returns a list of issues found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        let viewport_ok = self.viewport.width > 0.0 && self.viewport.height > 0.0;
        if !viewport_ok {
            issues.push(format!(
                "viewport must be positive, got {}x{}",
                self.viewport.width, self.viewport.height
            ));
        }

        for (name, value) in [
            ("chrome.top", self.chrome.top),
            ("chrome.left", self.chrome.left),
            ("chrome.margin", self.chrome.margin),
            ("chrome.reserved_bottom", self.chrome.reserved_bottom),
        ] {
            if value.is_nan() || value < 0.0 {
                issues.push(format!("{name} must be non-negative, got {value}"));
            }
        }

        if self.stacking.ceiling <= self.stacking.base {
            issues.push(format!(
                "stacking.ceiling ({}) must be greater than stacking.base ({})",
                self.stacking.ceiling, self.stacking.base
            ));
        }

        let w = &self.window;
        if w.min_width > w.max_width {
            issues.push(format!(
                "window.min_width ({}) exceeds window.max_width ({})",
                w.min_width, w.max_width
            ));
        }
        if w.min_height > w.max_height {
            issues.push(format!(
                "window.min_height ({}) exceeds window.max_height ({})",
                w.min_height, w.max_height
            ));
        }

        if self.sync.debounce.is_zero() {
            issues.push("sync.debounce_ms must be greater than 0".to_string());
        }
        if let Some(endpoint) = &self.sync.endpoint {
            if reqwest::Url::parse(endpoint).is_err() {
                issues.push(format!("sync.endpoint is not a valid URL: {endpoint}"));
            }
        }

        for (idx, window) in self.startup.default_windows.iter().enumerate() {
            if window.title.trim().is_empty() {
                issues.push(format!("startup.default_windows[{idx}] has an empty title"));
            }
        }

        issues
    }
}
