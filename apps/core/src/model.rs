use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured clipboard snippet. Content never changes after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub id: String,
    pub content: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub source_app: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FavouriteKind {
    #[default]
    App,
    Browser,
    WorkingApp,
}

impl FavouriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Browser => "browser",
            Self::WorkingApp => "working_app",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "app" => Some(Self::App),
            "browser" => Some(Self::Browser),
            "working_app" | "working-app" => Some(Self::WorkingApp),
            _ => None,
        }
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            Self::App => "App",
            Self::Browser => "Browser",
            Self::WorkingApp => "Working App",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favourite {
    pub id: String,
    pub name: String,
    pub lnk_path: String,
    #[serde(default)]
    pub kind: FavouriteKind,
    #[serde(default = "default_label")]
    pub label: String,
    /// Doubles as the "launch on startup" marker.
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub browser_links: Vec<String>,
}

impl Favourite {
    pub fn new(name: &str, lnk_path: &str, kind: FavouriteKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            lnk_path: lnk_path.trim().to_string(),
            kind,
            label: kind.default_label().to_string(),
            selected: false,
            browser_links: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: &[&str]) -> Self {
        self.browser_links = links.iter().map(|link| link.to_string()).collect();
        self
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    pub fn opens_browser_links(&self) -> bool {
        self.kind == FavouriteKind::Browser && !self.browser_links.is_empty()
    }
}

fn default_label() -> String {
    FavouriteKind::App.default_label().to_string()
}

/// A Start Menu shortcut found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub lnk_path: String,
    normalized_name: String,
}

impl AppInfo {
    pub fn new(name: &str, lnk_path: &str) -> Self {
        Self {
            normalized_name: normalize_for_search(name),
            name: name.to_string(),
            lnk_path: lnk_path.to_string(),
        }
    }

    pub fn normalized_name(&self) -> &str {
        &self.normalized_name
    }
}

pub fn normalize_for_search(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
