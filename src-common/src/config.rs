//! Settings snapshot for the recorder.
//!
//! Settings live in the platform-standard config directory:
//! - Linux: `~/.config/reviewrec/settings.json`
//! - macOS: `~/Library/Application Support/reviewrec/settings.json`
//! - Windows: `%APPDATA%\reviewrec\config\settings.json`
//!
//! A snapshot is loaded once per operation and passed to whoever needs it.
//! Every missing file, section or key falls back to a documented default.

use crate::logging::APP_NAME;
use directories::{ProjectDirs, UserDirs};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Frame rate used when the settings do not provide a usable one.
pub const DEFAULT_FRAME_RATE: u32 = 15;

/// Recordings stop automatically after this many seconds.
pub const DEFAULT_MAX_DURATION_SECS: u64 = 120;

/// Output canvas every frame is conformed to.
pub const DEFAULT_CANVAS: (u32, u32) = (1920, 1080);

/// Same-day delivery cutoff.
pub const DEFAULT_CUTOFF: &str = "10:00";

/// Weekend lookahead used by the delivery calendar.
pub const DEFAULT_WEEKEND_WINDOW_MONTHS: u32 = 3;

/// Folder created under the home directory when no review root is configured.
pub const FALLBACK_REVIEW_FOLDER: &str = "ReviewData";

/// Capture-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Automatic stop after this many seconds; 0 disables the limit.
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE
}

fn default_max_duration() -> u64 {
    DEFAULT_MAX_DURATION_SECS
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
        }
    }
}

/// Output-related settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputSettings {
    /// Review folder root. If None, falls back to `~/ReviewData`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Delivery calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Time of day (`HH:MM`) before which recordings go to today's folder.
    #[serde(default = "default_cutoff")]
    pub cutoff: String,
    /// Public holiday calendar name (`hungary`, `none`).
    #[serde(default = "default_holiday_region")]
    pub holiday_region: String,
    #[serde(default = "default_weekend_window")]
    pub weekend_window_months: u32,
}

fn default_cutoff() -> String {
    DEFAULT_CUTOFF.to_string()
}

fn default_holiday_region() -> String {
    "hungary".to_string()
}

fn default_weekend_window() -> u32 {
    DEFAULT_WEEKEND_WINDOW_MONTHS
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            holiday_region: default_holiday_region(),
            weekend_window_months: DEFAULT_WEEKEND_WINDOW_MONTHS,
        }
    }
}

/// Frame conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Worker pool size. None means available hardware concurrency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default = "default_canvas_width")]
    pub canvas_width: u32,
    #[serde(default = "default_canvas_height")]
    pub canvas_height: u32,
    /// Image composited over every frame using its own alpha.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,
    /// Background image written as frame 0 of every sequence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slate: Option<String>,
    /// TrueType font for the slate text. Falls back to a system font.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slate_font: Option<String>,
}

fn default_canvas_width() -> u32 {
    DEFAULT_CANVAS.0
}

fn default_canvas_height() -> u32 {
    DEFAULT_CANVAS.1
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            workers: None,
            canvas_width: DEFAULT_CANVAS.0,
            canvas_height: DEFAULT_CANVAS.1,
            overlay: None,
            slate: None,
            slate_font: None,
        }
    }
}

/// Help link shown by front ends.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HelpSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Projects a recording can be tagged with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default = "default_projects")]
    pub names: Vec<String>,
}

fn default_projects() -> Vec<String> {
    vec!["testing".to_string()]
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            names: default_projects(),
        }
    }
}

/// Complete settings snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub output: OutputSettings,
    /// Studio closures: each value is a date or an inclusive `start, end` pair.
    #[serde(default)]
    pub days_to_skip: BTreeMap<String, String>,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub help: HelpSettings,
    #[serde(default)]
    pub projects: ProjectSettings,
}

impl Settings {
    /// Frame rate, falling back to the default for zero.
    pub fn frame_rate(&self) -> u32 {
        if self.capture.frame_rate == 0 {
            warn!(
                "Configured frame rate is 0, using {} fps",
                DEFAULT_FRAME_RATE
            );
            DEFAULT_FRAME_RATE
        } else {
            self.capture.frame_rate
        }
    }

    /// Project names, sorted, never empty.
    pub fn project_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .projects
            .names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            names = default_projects();
        }
        names.sort();
        names.dedup();
        names
    }

    /// Excluded-date entries in key order.
    pub fn excluded_dates(&self) -> Vec<String> {
        self.days_to_skip.values().cloned().collect()
    }
}

/// Get the path to the settings file.
pub fn settings_path() -> Result<PathBuf, String> {
    let proj_dirs =
        ProjectDirs::from("", "", APP_NAME).ok_or("Could not determine config directory")?;
    Ok(proj_dirs.config_dir().join("settings.json"))
}

/// Load settings from the platform config directory.
/// Returns defaults if the file doesn't exist or is invalid.
pub fn load_settings() -> Settings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            warn!("Failed to get settings path: {}", e);
            Settings::default()
        }
    }
}

/// Load settings from an explicit file.
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Settings::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => {
            let settings = parse_settings(&contents);
            info!("Loaded settings from {:?}", path);
            settings
        }
        Err(e) => {
            warn!("Failed to read settings file: {}. Using defaults.", e);
            Settings::default()
        }
    }
}

/// Parse a settings document, replacing only the values that do not fit.
pub fn parse_settings(contents: &str) -> Settings {
    let root = match serde_json::from_str::<Value>(contents) {
        Ok(Value::Object(root)) => root,
        Ok(_) => {
            warn!("Settings file is not a JSON object. Using defaults.");
            return Settings::default();
        }
        Err(e) => {
            warn!("Failed to parse settings file: {}. Using defaults.", e);
            return Settings::default();
        }
    };

    Settings {
        capture: section(&root, "capture"),
        output: section(&root, "output"),
        days_to_skip: section(&root, "days_to_skip"),
        delivery: section(&root, "delivery"),
        processing: section(&root, "processing"),
        help: section(&root, "help"),
        projects: section(&root, "projects"),
    }
}

/// Deserialize one section, dropping the keys whose values are unusable.
fn section<T>(root: &Map<String, Value>, name: &str) -> T
where
    T: Default + Serialize + DeserializeOwned,
{
    let Some(value) = root.get(name) else {
        debug!("No {:?} section in settings, using defaults", name);
        return T::default();
    };
    if let Ok(parsed) = serde_json::from_value::<T>(value.clone()) {
        return parsed;
    }
    let Value::Object(user) = value else {
        warn!("Settings section {:?} is not an object, using defaults", name);
        return T::default();
    };

    let mut merged = match serde_json::to_value(T::default()) {
        Ok(Value::Object(defaults)) => defaults,
        _ => Map::new(),
    };
    for (key, field) in user {
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), field.clone());
        if serde_json::from_value::<T>(Value::Object(candidate.clone())).is_ok() {
            merged = candidate;
        } else {
            warn!("Invalid settings value {}.{}: {}, using default", name, key, field);
        }
    }
    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
        warn!("Settings section {:?} unusable ({}), using defaults", name, e);
        T::default()
    })
}

/// Save settings to the platform config directory.
pub fn save_settings(settings: &Settings) -> Result<PathBuf, String> {
    let path = settings_path()?;
    save_settings_to(settings, &path)?;
    Ok(path)
}

/// Save settings to an explicit file, creating the parent directory.
pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    fs::write(path, json).map_err(|e| format!("Failed to write settings file: {}", e))?;

    info!("Saved settings to {:?}", path);
    Ok(())
}

/// Default review root: `~/ReviewData`, or the temp directory without a home.
pub fn default_review_root() -> PathBuf {
    match UserDirs::new() {
        Some(dirs) => dirs.home_dir().join(FALLBACK_REVIEW_FOLDER),
        None => std::env::temp_dir().join(FALLBACK_REVIEW_FOLDER),
    }
}

/// Resolve the review root, falling back when the configured one is missing.
///
/// The configured folder usually lives on a network share; if it cannot be
/// found the local fallback is used (and created) instead.
pub fn review_root(settings: &Settings) -> Result<PathBuf, String> {
    if let Some(dir) = settings.output.directory.as_deref().filter(|d| !d.is_empty()) {
        let configured = PathBuf::from(dir);
        if configured.is_dir() {
            return Ok(configured);
        }
        warn!(
            "Output folder {:?} cannot be found, using local fallback",
            configured
        );
    }

    let fallback = default_review_root();
    fs::create_dir_all(&fallback)
        .map_err(|e| format!("Failed to create review folder {:?}: {}", fallback, e))?;
    Ok(fallback)
}
