use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::clipboard_capture::CaptureSettings;
use crate::clipboard_store::RetentionPolicy;
use crate::model::Favourite;
use crate::startup_trigger::TriggerSettings;

const LOG_TARGET: &str = "config";
const APP_DIR_NAME: &str = "StarterAppLauncher";
const CONFIG_FILE_NAME: &str = "config.json";
const HISTORY_DB_FILE_NAME: &str = "clipboard.db";
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "config io error: {error}"),
            Self::Parse(error) => write!(f, "config parse error: {error}"),
            Self::Validation(error) => write!(f, "config validation error: {error}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub language: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub autostart_app: bool,
    pub require_admin: bool,
}

/// A fresh document starts with the trigger off and a 10 s delay. Keys
/// missing from an existing file read as trigger on with a 1 s delay, which
/// is how older files behaved before the keys existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarterSettings {
    #[serde(default = "legacy_trigger")]
    pub trigger_selected_on_startup: bool,
    #[serde(default = "legacy_delay")]
    pub delay_seconds: u32,
}

impl Default for StarterSettings {
    fn default() -> Self {
        Self {
            trigger_selected_on_startup: false,
            delay_seconds: 10,
        }
    }
}

impl StarterSettings {
    fn legacy() -> Self {
        Self {
            trigger_selected_on_startup: legacy_trigger(),
            delay_seconds: legacy_delay(),
        }
    }

    pub fn trigger(&self) -> TriggerSettings {
        TriggerSettings {
            enabled: self.trigger_selected_on_startup,
            delay: Duration::from_secs(u64::from(self.delay_seconds)),
        }
    }
}

fn legacy_trigger() -> bool {
    true
}

fn legacy_delay() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardSettings {
    pub max_items: usize,
    pub max_age_days: u32,
    pub duplicate_window_hours: u32,
    pub debounce_ms: u64,
    pub max_chars: usize,
}

impl Default for ClipboardSettings {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_age_days: 30,
            duplicate_window_hours: 3,
            debounce_ms: 150,
            max_chars: 10_000,
        }
    }
}

impl ClipboardSettings {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_items: self.max_items,
            max_age_days: self.max_age_days,
        }
    }

    pub fn capture(&self) -> CaptureSettings {
        CaptureSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            max_chars: self.max_chars,
            duplicate_window: TimeDelta::hours(i64::from(self.duplicate_window_hours)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default = "StarterSettings::legacy")]
    pub starter_settings: StarterSettings,
    #[serde(default)]
    pub favourites: Vec<Favourite>,
    #[serde(default)]
    pub clipboard: ClipboardSettings,
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(skip)]
    pub history_db_path: PathBuf,
}

fn current_version() -> u32 {
    CURRENT_VERSION
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = stable_app_data_dir();
        Self {
            version: CURRENT_VERSION,
            ui: UiConfig::default(),
            admin: AdminConfig::default(),
            starter_settings: StarterSettings::default(),
            favourites: Vec::new(),
            clipboard: ClipboardSettings::default(),
            config_path: base.join(CONFIG_FILE_NAME),
            history_db_path: base.join(HISTORY_DB_FILE_NAME),
        }
    }
}

impl AppConfig {
    /// Defaults rooted in `dir` instead of the per-user data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_path: dir.join(CONFIG_FILE_NAME),
            history_db_path: dir.join(HISTORY_DB_FILE_NAME),
            ..Self::default()
        }
    }

    pub fn favourite(&self, id: &str) -> Option<&Favourite> {
        self.favourites.iter().find(|favourite| favourite.id == id)
    }

    pub fn selected_favourites(&self) -> Vec<Favourite> {
        self.favourites
            .iter()
            .filter(|favourite| favourite.selected)
            .cloned()
            .collect()
    }

    pub fn add_favourite(&mut self, favourite: Favourite) {
        self.favourites.push(favourite);
    }

    /// Replaces the favourite with the same id. Returns false when no such
    /// favourite exists.
    pub fn update_favourite(&mut self, favourite: Favourite) -> bool {
        match self.favourites.iter_mut().find(|f| f.id == favourite.id) {
            Some(existing) => {
                *existing = favourite;
                true
            }
            None => false,
        }
    }

    pub fn remove_favourite(&mut self, id: &str) -> bool {
        let before = self.favourites.len();
        self.favourites.retain(|favourite| favourite.id != id);
        self.favourites.len() != before
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) -> bool {
        match self.favourite_mut(id) {
            Some(favourite) => {
                favourite.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Appends `url` unless the favourite already holds it.
    pub fn add_browser_link(&mut self, id: &str, url: &str) -> bool {
        let Some(favourite) = self.favourite_mut(id) else {
            return false;
        };
        let url = url.trim();
        if url.is_empty() || favourite.browser_links.iter().any(|link| link == url) {
            return false;
        }
        favourite.browser_links.push(url.to_string());
        true
    }

    pub fn remove_browser_link(&mut self, id: &str, url: &str) -> bool {
        let Some(favourite) = self.favourite_mut(id) else {
            return false;
        };
        let before = favourite.browser_links.len();
        favourite.browser_links.retain(|link| link != url.trim());
        favourite.browser_links.len() != before
    }

    fn favourite_mut(&mut self, id: &str) -> Option<&mut Favourite> {
        self.favourites.iter_mut().find(|favourite| favourite.id == id)
    }
}

pub fn stable_app_data_dir() -> PathBuf {
    let root = std::env::var_os("APPDATA")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(home_dir)
        .unwrap_or_else(std::env::temp_dir);
    root.join(APP_DIR_NAME)
}

fn home_dir() -> Option<PathBuf> {
    ["USERPROFILE", "HOME"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn default_config_path() -> PathBuf {
    stable_app_data_dir().join(CONFIG_FILE_NAME)
}

/// Loads the document at `path` (or the default location). A missing file
/// is created with defaults; an unparseable one is kept as a `.bak` copy.
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(stable_app_data_dir);

    if !config_path.exists() {
        let mut config = AppConfig::in_dir(&dir);
        config.config_path = config_path;
        save(&config)?;
        log::info!(
            target: LOG_TARGET,
            "wrote default config to {}",
            config.config_path.display()
        );
        return Ok(config);
    }

    let raw = std::fs::read_to_string(&config_path)?;
    let mut config = match parse_document(&raw) {
        Ok(config) => config,
        Err(error) => {
            let backup = backup_path(&config_path);
            std::fs::rename(&config_path, &backup)?;
            log::warn!(
                target: LOG_TARGET,
                "unreadable config at {} ({error}); moved to {} and using defaults",
                config_path.display(),
                backup.display()
            );
            AppConfig::default()
        }
    };
    config.config_path = config_path;
    config.history_db_path = dir.join(HISTORY_DB_FILE_NAME);
    validate(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Where an unreadable document is moved before defaults replace it:
/// `config.json` becomes `config.json.bak`.
pub fn backup_path(config_path: &Path) -> PathBuf {
    let mut name = config_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| CONFIG_FILE_NAME.into());
    name.push(".bak");
    config_path.with_file_name(name)
}

/// Parses strict JSON first, then the lenient json5 dialect for files with
/// comments or trailing commas.
pub fn parse_document(raw: &str) -> Result<AppConfig, ConfigError> {
    match serde_json::from_str::<AppConfig>(raw) {
        Ok(config) => Ok(config),
        Err(strict_error) => json5::from_str::<AppConfig>(raw).map_err(|lenient_error| {
            ConfigError::Parse(format!("{strict_error}; json5: {lenient_error}"))
        }),
    }
}

pub fn save(config: &AppConfig) -> Result<(), ConfigError> {
    validate(config).map_err(ConfigError::Validation)?;
    if let Some(parent) = config.config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let serialized = serde_json::to_string_pretty(config)?;
    let temp_path = config.config_path.with_extension("tmp");
    std::fs::write(&temp_path, serialized)?;
    std::fs::rename(&temp_path, &config.config_path)?;
    Ok(())
}

pub fn validate(cfg: &AppConfig) -> Result<(), String> {
    let delay = cfg.starter_settings.delay_seconds;
    if !(1..=20).contains(&delay) {
        return Err(format!("delay_seconds must be between 1 and 20 (got {delay})"));
    }

    let clipboard = &cfg.clipboard;
    if !(10..=5_000).contains(&clipboard.debounce_ms) {
        return Err("clipboard.debounce_ms must be between 10 and 5000".into());
    }
    if !(1..=100_000).contains(&clipboard.max_items) {
        return Err("clipboard.max_items must be between 1 and 100000".into());
    }
    if !(1..=3_650).contains(&clipboard.max_age_days) {
        return Err("clipboard.max_age_days must be between 1 and 3650".into());
    }
    if clipboard.duplicate_window_hours > 720 {
        return Err("clipboard.duplicate_window_hours must be at most 720".into());
    }
    if !(1..=1_000_000).contains(&clipboard.max_chars) {
        return Err("clipboard.max_chars must be between 1 and 1000000".into());
    }

    if cfg.config_path.as_os_str().is_empty() {
        return Err("config_path is required".into());
    }
    if cfg.history_db_path.as_os_str().is_empty() {
        return Err("history_db_path is required".into());
    }

    Ok(())
}
