use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::model::AppInfo;

const SKIP_KEYWORDS: [&str; 4] = ["uninstall", "readme", "help", "documentation"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

pub trait DiscoveryProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;
    fn discover(&self) -> Result<Vec<AppInfo>, ProviderError>;
}

/// Scans the per-user and all-users Start Menu program folders for `.lnk`
/// shortcuts.
pub struct StartMenuProvider {
    roots: Vec<PathBuf>,
}

impl Default for StartMenuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StartMenuProvider {
    pub fn new() -> Self {
        Self {
            roots: start_menu_roots(),
        }
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl DiscoveryProvider for StartMenuProvider {
    fn provider_name(&self) -> &'static str {
        "start_menu"
    }

    fn discover(&self) -> Result<Vec<AppInfo>, ProviderError> {
        let mut apps = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                continue;
            }
            apps.extend(collect_shortcuts(root));
        }

        let mut seen = HashSet::new();
        apps.retain(|app| seen.insert(app.name.clone()));
        apps.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });

        log::info!(target: "discovery", "discovered {} start menu shortcuts", apps.len());
        Ok(apps)
    }
}

/// Walks `root` recursively and returns every app-like shortcut beneath it.
pub fn collect_shortcuts(root: &Path) -> Vec<AppInfo> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                log::debug!(target: "discovery", "skipping unreadable entry: {error}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.path();
            let is_lnk = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("lnk"))
                .unwrap_or(false);
            if !is_lnk {
                return None;
            }
            let name = path.file_stem()?.to_str()?.to_string();
            if is_skipped_name(&name) {
                return None;
            }
            Some(AppInfo::new(&name, &path.to_string_lossy()))
        })
        .collect()
}

fn is_skipped_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    SKIP_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn start_menu_roots() -> Vec<PathBuf> {
    let programs = Path::new("Microsoft")
        .join("Windows")
        .join("Start Menu")
        .join("Programs");
    ["APPDATA", "PROGRAMDATA"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .filter(|value| !value.is_empty())
        .map(|value| PathBuf::from(value).join(&programs))
        .collect()
}

/// Fixed app list for tests and headless runs.
pub struct FixtureProvider {
    apps: Vec<AppInfo>,
}

impl FixtureProvider {
    pub fn from_apps(apps: Vec<AppInfo>) -> Self {
        Self { apps }
    }

    pub fn deterministic_fixture() -> Self {
        Self {
            apps: vec![
                AppInfo::new(
                    "Google Chrome",
                    "C:\\ProgramData\\Microsoft\\Windows\\Start Menu\\Programs\\Google Chrome.lnk",
                ),
                AppInfo::new(
                    "Visual Studio Code",
                    "C:\\ProgramData\\Microsoft\\Windows\\Start Menu\\Programs\\Visual Studio Code.lnk",
                ),
            ],
        }
    }
}

impl DiscoveryProvider for FixtureProvider {
    fn provider_name(&self) -> &'static str {
        "fixture"
    }

    fn discover(&self) -> Result<Vec<AppInfo>, ProviderError> {
        Ok(self.apps.clone())
    }
}
