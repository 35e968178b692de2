use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clipboard_capture::ServiceState;
use crate::clipboard_store::format_timestamp;
use crate::config::StarterSettings;
use crate::metrics::{MetricsSample, MetricsSnapshot, ProcessInfo, SystemInfo};
use crate::model::{AppInfo, ClipboardItem, Favourite};
use crate::startup::StartupEntry;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaysRequest {
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRequest {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureAction {
    Start,
    Stop,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureControlRequest {
    pub action: CaptureAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavouriteDraftRequest {
    pub name: String,
    pub lnk_path: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub browser_links: Vec<String>,
}

fn default_kind() -> String {
    "app".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectRequest {
    pub id: String,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkRequest {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StarterSettingsRequest {
    pub trigger_selected_on_startup: Option<bool>,
    pub delay_seconds: Option<u32>,
}

/// Identifies an entry as listed by `startup_entries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupRemoveRequest {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinutesRequest {
    pub minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PidRequest {
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CoreRequest {
    ClipboardRecent(LimitRequest),
    ClipboardByDay(DaysRequest),
    ClipboardSearch(SearchRequest),
    ClipboardGet(IdRequest),
    ClipboardDelete(IdRequest),
    ClipboardClear,
    ClipboardRecopy(IdRequest),
    CaptureControl(CaptureControlRequest),
    CaptureState,
    FavouritesList,
    FavouriteAdd(FavouriteDraftRequest),
    FavouriteRemove(IdRequest),
    FavouriteSelect(SelectRequest),
    FavouriteAddLink(LinkRequest),
    FavouriteRemoveLink(LinkRequest),
    FavouriteTest(IdRequest),
    RunSelected,
    AppsScan,
    AppsSearch(SearchRequest),
    StarterSettingsGet,
    StarterSettingsUpdate(StarterSettingsRequest),
    StartupEntries,
    StartupRemove(StartupRemoveRequest),
    MetricsCurrent,
    MetricsHistory(MinutesRequest),
    SystemInfo,
    RunningWindows,
    ProcessKill(PidRequest),
    LogsRecent(LimitRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardItemDto {
    pub id: String,
    pub content: String,
    pub preview: String,
    pub content_hash: String,
    pub created_at: String,
    pub source_app: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardItemsResponse {
    pub items: Vec<ClipboardItemDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayGroupDto {
    pub day: String,
    pub items: Vec<ClipboardItemDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardDaysResponse {
    pub days: Vec<DayGroupDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckResponse {
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearedResponse {
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureStateResponse {
    pub state: ServiceState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavouritesResponse {
    pub favourites: Vec<Favourite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchResponse {
    pub launched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSelectedResponse {
    pub selected: usize,
    pub launched: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppDto {
    pub name: String,
    pub lnk_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppsResponse {
    pub apps: Vec<AppDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupEntryDto {
    pub name: String,
    pub source: String,
    pub command: String,
    pub status: String,
    pub process_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupEntriesResponse {
    pub entries: Vec<StartupEntryDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLinesResponse {
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsHistoryResponse {
    pub samples: Vec<MetricsSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessesResponse {
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CoreResponse {
    ClipboardItems(ClipboardItemsResponse),
    ClipboardDays(ClipboardDaysResponse),
    ClipboardItem(ClipboardItemDto),
    Ack(AckResponse),
    Cleared(ClearedResponse),
    CaptureState(CaptureStateResponse),
    Favourites(FavouritesResponse),
    Favourite(Favourite),
    Launch(LaunchResponse),
    RunSelected(RunSelectedResponse),
    Apps(AppsResponse),
    StarterSettings(StarterSettings),
    StartupEntries(StartupEntriesResponse),
    Metrics(MetricsSnapshot),
    MetricsHistory(MetricsHistoryResponse),
    SystemInfo(SystemInfo),
    Processes(ProcessesResponse),
    LogLines(LogLinesResponse),
}

/// Single-line preview with control characters removed.
pub fn preview(content: &str) -> String {
    let cleaned: String = content.chars().filter(|c| *c != '\0' && *c != '\r').collect();
    let first_line = cleaned.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let trimmed = first_line.trim();
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    if trimmed.chars().count() > PREVIEW_CHARS || cleaned.trim().lines().count() > 1 {
        preview.push_str("...");
    }
    preview
}

impl From<ClipboardItem> for ClipboardItemDto {
    fn from(value: ClipboardItem) -> Self {
        Self {
            preview: preview(&value.content),
            created_at: format_timestamp(value.created_at),
            id: value.id,
            content: value.content,
            content_hash: value.content_hash,
            source_app: value.source_app,
            is_pinned: value.is_pinned,
        }
    }
}

/// Newest day first.
pub fn day_groups(groups: BTreeMap<String, Vec<ClipboardItem>>) -> Vec<DayGroupDto> {
    groups
        .into_iter()
        .rev()
        .map(|(day, items)| DayGroupDto {
            day,
            items: items.into_iter().map(ClipboardItemDto::from).collect(),
        })
        .collect()
}

impl From<AppInfo> for AppDto {
    fn from(value: AppInfo) -> Self {
        Self {
            name: value.name,
            lnk_path: value.lnk_path,
        }
    }
}

impl From<StartupEntry> for StartupEntryDto {
    fn from(value: StartupEntry) -> Self {
        Self {
            name: value.name,
            source: value.source.as_str().to_string(),
            command: value.command,
            status: value.status.as_str().to_string(),
            process_id: value.process_id,
        }
    }
}
