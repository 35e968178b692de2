use std::sync::{Arc, MutexGuard};

use crate::action_executor::LaunchError;
use crate::clipboard_access::{system_clipboard, ClipboardAccess, ClipboardError};
use crate::clipboard_capture::{ChangeDetector, ServiceState};
use crate::clipboard_store::{ContentStore, StoreError};
use crate::config::{self, AppConfig, ConfigError, StarterSettings};
use crate::contract::{
    day_groups, AckResponse, AppDto, AppsResponse, CaptureAction, CaptureStateResponse,
    ClearedResponse, ClipboardDaysResponse, ClipboardItemDto, ClipboardItemsResponse,
    CoreRequest, CoreResponse, FavouritesResponse, LaunchResponse, LogLinesResponse,
    MetricsHistoryResponse, ProcessesResponse, RunSelectedResponse, StartupEntriesResponse,
    StartupRemoveRequest,
};
use crate::discovery::{DiscoveryProvider, ProviderError, StartMenuProvider};
use crate::launch_orchestrator::LaunchOrchestrator;
use crate::metrics::{
    self, MetricsError, MetricsHistory, MetricsSample, MetricsSnapshot, MetricsSource,
    ProcessInfo, SharedMetrics, SysinfoSource, SystemInfo,
};
use crate::model::{AppInfo, ClipboardItem, Favourite};
use crate::settings::{self, FavouriteDraft};
use crate::startup::{self, StartupEntry, StartupError, StartupSource};

pub const DEFAULT_RECENT_LIMIT: usize = 50;
pub const DEFAULT_HISTORY_DAYS: u32 = 7;
pub const DEFAULT_APP_LIMIT: usize = 20;
pub const DEFAULT_METRICS_MINUTES: u32 = 60;

#[derive(Debug)]
pub enum ServiceError {
    Config(String),
    Store(StoreError),
    Launch(LaunchError),
    Clipboard(ClipboardError),
    Provider(ProviderError),
    Startup(StartupError),
    Metrics(MetricsError),
    ItemNotFound(String),
    InvalidRequest(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(error) => write!(f, "config error: {error}"),
            Self::Store(error) => write!(f, "store error: {error}"),
            Self::Launch(error) => write!(f, "launch error: {error}"),
            Self::Clipboard(error) => write!(f, "clipboard error: {error}"),
            Self::Provider(error) => write!(f, "provider error: {error}"),
            Self::Startup(error) => write!(f, "startup error: {error}"),
            Self::Metrics(error) => write!(f, "metrics error: {error}"),
            Self::ItemNotFound(id) => write!(f, "item not found: {id}"),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<LaunchError> for ServiceError {
    fn from(value: LaunchError) -> Self {
        Self::Launch(value)
    }
}

impl From<ClipboardError> for ServiceError {
    fn from(value: ClipboardError) -> Self {
        Self::Clipboard(value)
    }
}

impl From<ProviderError> for ServiceError {
    fn from(value: ProviderError) -> Self {
        Self::Provider(value)
    }
}

impl From<StartupError> for ServiceError {
    fn from(value: StartupError) -> Self {
        Self::Startup(value)
    }
}

impl From<MetricsError> for ServiceError {
    fn from(value: MetricsError) -> Self {
        Self::Metrics(value)
    }
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

/// Composition of the clipboard pipeline, the favourites document and the
/// launcher. Every mutation of favourites or settings is saved immediately.
pub struct CoreService {
    config: AppConfig,
    detector: ChangeDetector,
    orchestrator: LaunchOrchestrator,
    provider: Arc<dyn DiscoveryProvider>,
    installed_apps: Vec<AppInfo>,
    metrics: SharedMetrics,
    metrics_history: MetricsHistory,
}

impl CoreService {
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        config::validate(&config).map_err(ServiceError::Config)?;
        let store = ContentStore::open(&config.history_db_path, config.clipboard.retention())?;
        Self::with_parts(
            config,
            store,
            system_clipboard(),
            LaunchOrchestrator::system(),
            Arc::new(StartMenuProvider::new()),
        )
    }

    pub fn with_parts(
        config: AppConfig,
        store: ContentStore,
        clipboard: Box<dyn ClipboardAccess>,
        orchestrator: LaunchOrchestrator,
        provider: Arc<dyn DiscoveryProvider>,
    ) -> Result<Self, ServiceError> {
        config::validate(&config).map_err(ServiceError::Config)?;
        let detector = ChangeDetector::new(store, clipboard, config.clipboard.capture());
        Ok(Self {
            config,
            detector,
            orchestrator,
            provider,
            installed_apps: Vec::new(),
            metrics: metrics::shared(SysinfoSource::new()),
            metrics_history: MetricsHistory::default(),
        })
    }

    pub fn with_metrics(mut self, source: impl MetricsSource + 'static) -> Self {
        self.metrics = metrics::shared(source);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &ContentStore {
        self.detector.store()
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut ChangeDetector {
        &mut self.detector
    }

    pub fn orchestrator(&self) -> &LaunchOrchestrator {
        &self.orchestrator
    }

    pub fn provider(&self) -> Arc<dyn DiscoveryProvider> {
        Arc::clone(&self.provider)
    }

    /// Shared with the sampling worker.
    pub fn metrics_source(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    pub fn recent_items(&self, limit: usize) -> Result<Vec<ClipboardItem>, ServiceError> {
        Ok(self.store().list_recent(limit)?)
    }

    pub fn search_items(&self, query: &str, limit: usize) -> Result<Vec<ClipboardItem>, ServiceError> {
        Ok(self.store().search(query, limit)?)
    }

    pub fn get_item(&self, id: &str) -> Result<ClipboardItem, ServiceError> {
        self.store()
            .get(id)?
            .ok_or_else(|| ServiceError::ItemNotFound(id.to_string()))
    }

    pub fn delete_item(&self, id: &str) -> Result<bool, ServiceError> {
        Ok(self.store().delete(id)?)
    }

    pub fn clear_history(&self) -> Result<usize, ServiceError> {
        let removed = self.store().clear_all()?;
        log::info!(target: "clipboard", "cleared {removed} clipboard items");
        Ok(removed)
    }

    /// Puts a stored item back on the clipboard without capturing it again.
    pub fn recopy_item(&mut self, id: &str) -> Result<ClipboardItem, ServiceError> {
        let item = self.get_item(id)?;
        self.detector.recopy(&item.content)?;
        Ok(item)
    }

    /// `Start` also resumes a paused detector.
    pub fn control_capture(&mut self, action: CaptureAction) -> ServiceState {
        match action {
            CaptureAction::Start => {
                if self.detector.state() == ServiceState::Paused {
                    self.detector.resume();
                } else {
                    self.detector.start_listening();
                }
            }
            CaptureAction::Stop => {
                self.detector.stop_listening();
            }
            CaptureAction::Pause => {
                self.detector.pause();
            }
            CaptureAction::Resume => {
                self.detector.resume();
            }
        }
        self.detector.state()
    }

    pub fn capture_state(&self) -> ServiceState {
        self.detector.state()
    }

    pub fn favourites(&self) -> &[Favourite] {
        &self.config.favourites
    }

    pub fn add_favourite(&mut self, draft: &FavouriteDraft) -> Result<Favourite, ServiceError> {
        let (kind, links) =
            settings::validate_favourite_draft(draft).map_err(ServiceError::InvalidRequest)?;
        let mut favourite = Favourite::new(&draft.name, &draft.lnk_path, kind);
        favourite.browser_links = links;
        self.config.add_favourite(favourite.clone());
        self.persist()?;
        log::info!(target: "config", "added favourite {}", favourite.name);
        Ok(favourite)
    }

    pub fn remove_favourite(&mut self, id: &str) -> Result<bool, ServiceError> {
        let removed = self.config.remove_favourite(id);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) -> Result<(), ServiceError> {
        if !self.config.set_selected(id, selected) {
            return Err(ServiceError::ItemNotFound(id.to_string()));
        }
        self.persist()
    }

    pub fn add_browser_link(&mut self, id: &str, url: &str) -> Result<bool, ServiceError> {
        let url = settings::validate_url(url).map_err(ServiceError::InvalidRequest)?;
        if self.config.favourite(id).is_none() {
            return Err(ServiceError::ItemNotFound(id.to_string()));
        }
        let added = self.config.add_browser_link(id, &url);
        if added {
            self.persist()?;
        }
        Ok(added)
    }

    pub fn remove_browser_link(&mut self, id: &str, url: &str) -> Result<bool, ServiceError> {
        if self.config.favourite(id).is_none() {
            return Err(ServiceError::ItemNotFound(id.to_string()));
        }
        let removed = self.config.remove_browser_link(id, url);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn test_favourite(&self, id: &str) -> Result<bool, ServiceError> {
        let favourite = self
            .config
            .favourite(id)
            .ok_or_else(|| ServiceError::ItemNotFound(id.to_string()))?;
        Ok(self.orchestrator.test_favourite(favourite))
    }

    /// Launches every selected favourite now. Returns `(selected, launched)`.
    pub fn run_selected(&self) -> (usize, usize) {
        let selected = self.config.selected_favourites();
        let launched = self.orchestrator.launch_selected(&selected);
        log::info!(target: "launcher", "run selected: {launched} of {} launched", selected.len());
        (selected.len(), launched)
    }

    pub fn scan_apps(&mut self) -> Result<usize, ServiceError> {
        let apps = self.provider.discover()?;
        self.set_installed_apps(apps);
        Ok(self.installed_apps.len())
    }

    pub fn set_installed_apps(&mut self, apps: Vec<AppInfo>) {
        self.installed_apps = apps;
    }

    pub fn installed_apps(&self) -> &[AppInfo] {
        &self.installed_apps
    }

    pub fn search_apps(&self, query: &str, limit: usize) -> Vec<AppInfo> {
        crate::search::rank_apps(&self.installed_apps, query, limit)
    }

    pub fn starter_settings(&self) -> &StarterSettings {
        &self.config.starter_settings
    }

    pub fn update_starter_settings(
        &mut self,
        trigger: Option<bool>,
        delay_seconds: Option<u32>,
    ) -> Result<StarterSettings, ServiceError> {
        if let Some(delay) = delay_seconds {
            settings::validate_delay_seconds(delay).map_err(ServiceError::InvalidRequest)?;
            self.config.starter_settings.delay_seconds = delay;
        }
        if let Some(trigger) = trigger {
            self.config.starter_settings.trigger_selected_on_startup = trigger;
        }
        self.persist()?;
        Ok(self.config.starter_settings.clone())
    }

    /// Takes a fresh sample and records it in the history.
    pub fn current_metrics(&mut self) -> Result<MetricsSnapshot, ServiceError> {
        let snapshot = self.lock_metrics()?.sample()?;
        self.record_metrics(&snapshot);
        Ok(snapshot)
    }

    pub fn record_metrics(&mut self, snapshot: &MetricsSnapshot) {
        self.metrics_history.record(snapshot);
    }

    /// Samples from the last `minutes`, sampling first when the newest one
    /// is older than the sample interval.
    pub fn metrics_history(&mut self, minutes: u32) -> Result<Vec<MetricsSample>, ServiceError> {
        let now = chrono::Utc::now();
        if self.metrics_history.is_stale(now) {
            self.current_metrics()?;
        }
        Ok(self.metrics_history.within(minutes, chrono::Utc::now()))
    }

    pub fn system_info(&self) -> Result<SystemInfo, ServiceError> {
        Ok(self.lock_metrics()?.system_info()?)
    }

    pub fn running_windows(&self) -> Result<Vec<ProcessInfo>, ServiceError> {
        Ok(self.lock_metrics()?.running_windows()?)
    }

    /// Refuses the idle process and this process.
    pub fn kill_process(&self, pid: u32) -> Result<bool, ServiceError> {
        if pid == 0 || pid == std::process::id() {
            return Err(ServiceError::InvalidRequest(format!(
                "refusing to kill process {pid}"
            )));
        }
        let killed = self.lock_metrics()?.kill_process(pid)?;
        log::info!(target: "metrics", "kill process {pid}: {killed}");
        Ok(killed)
    }

    /// Startup entries with their running status. When the process list
    /// cannot be read the status stays unknown.
    pub fn startup_entries(&self) -> Result<Vec<StartupEntry>, ServiceError> {
        let mut entries = startup::list_entries()?;
        match self.lock_metrics()?.processes() {
            Ok(processes) => startup::mark_running(&mut entries, &processes),
            Err(error) => {
                log::warn!(target: "startup", "running status unavailable: {error}");
            }
        }
        Ok(entries)
    }

    pub fn remove_startup_entry(&self, request: &StartupRemoveRequest) -> Result<bool, ServiceError> {
        let source = StartupSource::parse(&request.source).ok_or_else(|| {
            ServiceError::InvalidRequest(format!("unknown startup source: {}", request.source))
        })?;
        if request.name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "startup entry name is empty".to_string(),
            ));
        }
        let entry = StartupEntry::new(&request.name, source, &request.command);
        Ok(startup::remove_entry(&entry)?)
    }

    pub fn handle_command(&mut self, request: CoreRequest) -> Result<CoreResponse, ServiceError> {
        match request {
            CoreRequest::ClipboardRecent(request) => {
                let limit = request.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
                Ok(items_response(self.recent_items(limit)?))
            }
            CoreRequest::ClipboardByDay(request) => {
                let days = request.days.unwrap_or(DEFAULT_HISTORY_DAYS);
                let groups = self.store().list_grouped_by_day(days)?;
                Ok(CoreResponse::ClipboardDays(ClipboardDaysResponse {
                    days: day_groups(groups),
                }))
            }
            CoreRequest::ClipboardSearch(request) => {
                let limit = request.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
                Ok(items_response(self.search_items(&request.query, limit)?))
            }
            CoreRequest::ClipboardGet(request) => Ok(CoreResponse::ClipboardItem(
                ClipboardItemDto::from(self.get_item(&request.id)?),
            )),
            CoreRequest::ClipboardDelete(request) => Ok(CoreResponse::Ack(AckResponse {
                changed: self.delete_item(&request.id)?,
            })),
            CoreRequest::ClipboardClear => Ok(CoreResponse::Cleared(ClearedResponse {
                removed: self.clear_history()?,
            })),
            CoreRequest::ClipboardRecopy(request) => Ok(CoreResponse::ClipboardItem(
                ClipboardItemDto::from(self.recopy_item(&request.id)?),
            )),
            CoreRequest::CaptureControl(request) => Ok(CoreResponse::CaptureState(
                CaptureStateResponse {
                    state: self.control_capture(request.action),
                },
            )),
            CoreRequest::CaptureState => Ok(CoreResponse::CaptureState(CaptureStateResponse {
                state: self.capture_state(),
            })),
            CoreRequest::FavouritesList => Ok(self.favourites_response()),
            CoreRequest::FavouriteAdd(request) => {
                let draft = FavouriteDraft {
                    name: request.name,
                    lnk_path: request.lnk_path,
                    kind: request.kind,
                    browser_links: request.browser_links,
                };
                Ok(CoreResponse::Favourite(self.add_favourite(&draft)?))
            }
            CoreRequest::FavouriteRemove(request) => Ok(CoreResponse::Ack(AckResponse {
                changed: self.remove_favourite(&request.id)?,
            })),
            CoreRequest::FavouriteSelect(request) => {
                self.set_selected(&request.id, request.selected)?;
                Ok(self.favourites_response())
            }
            CoreRequest::FavouriteAddLink(request) => Ok(CoreResponse::Ack(AckResponse {
                changed: self.add_browser_link(&request.id, &request.url)?,
            })),
            CoreRequest::FavouriteRemoveLink(request) => Ok(CoreResponse::Ack(AckResponse {
                changed: self.remove_browser_link(&request.id, &request.url)?,
            })),
            CoreRequest::FavouriteTest(request) => Ok(CoreResponse::Launch(LaunchResponse {
                launched: self.test_favourite(&request.id)?,
            })),
            CoreRequest::RunSelected => {
                let (selected, launched) = self.run_selected();
                Ok(CoreResponse::RunSelected(RunSelectedResponse { selected, launched }))
            }
            CoreRequest::AppsScan => {
                self.scan_apps()?;
                Ok(self.apps_response(self.installed_apps.clone()))
            }
            CoreRequest::AppsSearch(request) => {
                let limit = request.limit.unwrap_or(DEFAULT_APP_LIMIT);
                Ok(self.apps_response(self.search_apps(&request.query, limit)))
            }
            CoreRequest::StarterSettingsGet => {
                Ok(CoreResponse::StarterSettings(self.config.starter_settings.clone()))
            }
            CoreRequest::StarterSettingsUpdate(request) => Ok(CoreResponse::StarterSettings(
                self.update_starter_settings(
                    request.trigger_selected_on_startup,
                    request.delay_seconds,
                )?,
            )),
            CoreRequest::StartupEntries => {
                let entries = self.startup_entries()?;
                Ok(CoreResponse::StartupEntries(StartupEntriesResponse {
                    entries: entries.into_iter().map(Into::into).collect(),
                }))
            }
            CoreRequest::StartupRemove(request) => Ok(CoreResponse::Ack(AckResponse {
                changed: self.remove_startup_entry(&request)?,
            })),
            CoreRequest::MetricsCurrent => Ok(CoreResponse::Metrics(self.current_metrics()?)),
            CoreRequest::MetricsHistory(request) => {
                let minutes = request.minutes.unwrap_or(DEFAULT_METRICS_MINUTES);
                Ok(CoreResponse::MetricsHistory(MetricsHistoryResponse {
                    samples: self.metrics_history(minutes)?,
                }))
            }
            CoreRequest::SystemInfo => Ok(CoreResponse::SystemInfo(self.system_info()?)),
            CoreRequest::RunningWindows => Ok(CoreResponse::Processes(ProcessesResponse {
                processes: self.running_windows()?,
            })),
            CoreRequest::ProcessKill(request) => Ok(CoreResponse::Ack(AckResponse {
                changed: self.kill_process(request.pid)?,
            })),
            CoreRequest::LogsRecent(request) => {
                let lines = crate::logging::recent_lines(request.limit.unwrap_or(200))
                    .map_err(|error| ServiceError::Config(format!("log read failed: {error}")))?;
                Ok(CoreResponse::LogLines(LogLinesResponse { lines }))
            }
        }
    }

    fn favourites_response(&self) -> CoreResponse {
        CoreResponse::Favourites(FavouritesResponse {
            favourites: self.config.favourites.clone(),
        })
    }

    fn apps_response(&self, apps: Vec<AppInfo>) -> CoreResponse {
        CoreResponse::Apps(AppsResponse {
            apps: apps.into_iter().map(AppDto::from).collect(),
        })
    }

    fn lock_metrics(&self) -> Result<MutexGuard<'_, Box<dyn MetricsSource>>, ServiceError> {
        self.metrics.lock().map_err(|_| {
            ServiceError::Metrics(MetricsError::Unavailable("metrics source lock poisoned".to_string()))
        })
    }

    fn persist(&self) -> Result<(), ServiceError> {
        config::save(&self.config)?;
        Ok(())
    }
}

fn items_response(items: Vec<ClipboardItem>) -> CoreResponse {
    CoreResponse::ClipboardItems(ClipboardItemsResponse {
        items: items.into_iter().map(ClipboardItemDto::from).collect(),
    })
}
