use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use crate::config::{self, AppConfig, ConfigError};
use crate::core_service::{CoreService, ServiceError};
use crate::discovery::ProviderError;
use crate::ipc::{self, InboundRequest};
use crate::metrics::{MetricsError, MetricsSnapshot, SAMPLE_INTERVAL};
use crate::model::{AppInfo, ClipboardItem};
use crate::startup::STARTUP_ARG;
use crate::startup_trigger::{ArmOutcome, LaunchOrigin, LaunchOutcome, StartupSequencer};
use crate::worker::{self, Task, TaskPoll};

const LOG_TARGET: &str = "runtime";
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
    Service(ServiceError),
    Logging(std::io::Error),
    Instance(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(error) => write!(f, "config error: {error}"),
            Self::Service(error) => write!(f, "service error: {error}"),
            Self::Logging(error) => write!(f, "logging error: {error}"),
            Self::Instance(error) => write!(f, "single instance error: {error}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ServiceError> for RuntimeError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub startup_launch: bool,
    pub config_path: Option<PathBuf>,
    pub request: Option<String>,
    pub verbose: bool,
}

impl RuntimeOptions {
    pub fn origin(&self) -> LaunchOrigin {
        if self.startup_launch {
            LaunchOrigin::Startup
        } else {
            LaunchOrigin::Manual
        }
    }
}

pub fn parse_cli_args(args: &[String]) -> Result<RuntimeOptions, String> {
    let mut options = RuntimeOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            STARTUP_ARG => options.startup_launch = true,
            "--verbose" | "-v" => options.verbose = true,
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--config requires a path".to_string())?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--request" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--request requires a JSON payload".to_string())?;
                options.request = Some(value.clone());
            }
            other => {
                if let Some(value) = other.strip_prefix("--config=") {
                    options.config_path = Some(PathBuf::from(value));
                } else {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }
    }
    Ok(options)
}

pub fn run_with_options(options: RuntimeOptions) -> Result<(), RuntimeError> {
    if let Err(error) = crate::logging::init(options.verbose) {
        eprintln!("[starter-core] file logging unavailable: {error}");
    }

    let config = config::load(options.config_path.as_deref())?;
    log::info!(
        target: LOG_TARGET,
        "startup mode={} origin={:?} config_path={} history_db_path={}",
        runtime_mode(),
        options.origin(),
        config.config_path.display(),
        config.history_db_path.display(),
    );

    if let Some(payload) = options.request.as_deref() {
        let info_path = ipc::instance_file(&config.config_path);
        match ipc::forward_request(&info_path, payload) {
            Ok(Some(response)) => {
                println!("{response}");
                return Ok(());
            }
            Ok(None) => {}
            Err(error) => {
                // The live instance may already have acted on it, so do not
                // run it a second time here.
                log::error!(target: LOG_TARGET, "running instance request failed: {error}");
                println!(
                    "{}",
                    crate::transport::error_json(
                        crate::transport::ErrorCode::Unavailable,
                        format!("running instance request failed: {error}"),
                    )
                );
                return Ok(());
            }
        }
        let mut service = CoreService::new(config)?;
        println!("{}", crate::transport::handle_json(&mut service, payload));
        return Ok(());
    }

    #[cfg(target_os = "windows")]
    {
        let single_instance = acquire_single_instance_guard().map_err(RuntimeError::Instance)?;
        let Some(_single_instance) = single_instance else {
            log::info!(target: LOG_TARGET, "runtime already active; exiting duplicate process");
            return Ok(());
        };

        sync_autostart(&config);
        let info_path = ipc::instance_file(&config.config_path);
        let service = CoreService::new(config)?;
        let mut event_loop = EventLoop::new(service);
        let _request_server = match ipc::RequestServer::start(&info_path, event_loop.request_sender()) {
            Ok(server) => Some(server),
            Err(error) => {
                log::warn!(target: LOG_TARGET, "request listener unavailable: {error}");
                None
            }
        };
        event_loop.service_mut().detector_mut().start_listening();
        event_loop.arm_startup(options.origin(), Instant::now());
        event_loop.start_scan();
        event_loop.enable_metrics_sampling(Instant::now());

        loop {
            event_loop.turn(Instant::now());
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = config;
        log::info!(
            target: LOG_TARGET,
            "clipboard event loop requires Windows; use --request for one-shot commands"
        );
        Ok(())
    }
}

/// What one [`EventLoop::turn`] produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TurnReport {
    pub stored: Option<ClipboardItem>,
    pub launched: Option<LaunchOutcome>,
    pub apps_loaded: Option<usize>,
    pub requests: usize,
    pub metrics: Option<MetricsSnapshot>,
}

/// Single-threaded driver for the capture pipeline and the startup batch.
/// Blocking work (launches, Start Menu scans, metrics samples) goes to worker
/// threads and is collected on later turns.
pub struct EventLoop {
    service: CoreService,
    sequencer: StartupSequencer,
    last_token: Option<u64>,
    launch_task: Option<Task<bool>>,
    scan_task: Option<Task<Result<Vec<AppInfo>, ProviderError>>>,
    inbox: Option<Receiver<InboundRequest>>,
    metrics_task: Option<Task<Result<MetricsSnapshot, MetricsError>>>,
    next_metrics_at: Option<Instant>,
}

impl EventLoop {
    pub fn new(service: CoreService) -> Self {
        Self::with_sequencer(service, StartupSequencer::new())
    }

    pub fn with_sequencer(service: CoreService, sequencer: StartupSequencer) -> Self {
        Self {
            service,
            sequencer,
            last_token: None,
            launch_task: None,
            scan_task: None,
            inbox: None,
            metrics_task: None,
            next_metrics_at: None,
        }
    }

    /// Samples metrics on a worker every [`SAMPLE_INTERVAL`], the first one
    /// on the turn at or after `now`.
    pub fn enable_metrics_sampling(&mut self, now: Instant) {
        self.next_metrics_at = Some(now);
    }

    /// Requests sent on the returned channel are answered on later turns
    /// against this loop's live service. Replaces any earlier channel.
    pub fn request_sender(&mut self) -> Sender<InboundRequest> {
        let (sender, receiver) = mpsc::channel();
        self.inbox = Some(receiver);
        sender
    }

    pub fn service(&self) -> &CoreService {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut CoreService {
        &mut self.service
    }

    pub fn sequencer(&self) -> &StartupSequencer {
        &self.sequencer
    }

    pub fn arm_startup(&mut self, origin: LaunchOrigin, now: Instant) -> ArmOutcome {
        let config: &AppConfig = self.service.config();
        let trigger = config.starter_settings.trigger();
        self.sequencer.arm(origin, trigger, &config.favourites, now)
    }

    /// Starts a background Start Menu scan unless one is running.
    pub fn start_scan(&mut self) -> bool {
        if self.scan_task.is_some() {
            return false;
        }
        let provider = self.service.provider();
        match worker::dispatch("app-scan", move || provider.discover()) {
            Ok(task) => {
                self.scan_task = Some(task);
                true
            }
            Err(error) => {
                log::error!(target: LOG_TARGET, "could not start app scan: {error}");
                false
            }
        }
    }

    pub fn has_background_work(&self) -> bool {
        self.launch_task.is_some() || self.scan_task.is_some() || self.metrics_task.is_some()
    }

    pub fn turn(&mut self, now: Instant) -> TurnReport {
        let mut report = TurnReport::default();

        // Requests go first so a re-copy sets its ignore flag before the
        // token comparison below sees the clipboard write.
        report.requests = self.drain_requests();

        let token = self.service.detector().clipboard_change_token();
        if let Some(token) = token {
            // The first token only sets the baseline; content present before
            // the process started is not captured.
            if self.last_token.is_some_and(|last| last != token) {
                self.service.detector_mut().on_clipboard_changed(now);
            }
            self.last_token = Some(token);
        }
        report.stored = self.service.detector_mut().tick(now);

        report.launched = self.drive_launches(now);
        report.apps_loaded = self.collect_scan();
        report.metrics = self.drive_metrics(now);
        report
    }

    fn drain_requests(&mut self) -> usize {
        let Some(inbox) = self.inbox.as_ref() else {
            return 0;
        };
        let mut handled = 0;
        let mut disconnected = false;
        loop {
            match inbox.try_recv() {
                Ok(request) => {
                    let response = crate::transport::handle_json(&mut self.service, &request.payload);
                    request.respond(response);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected {
            self.inbox = None;
        }
        handled
    }

    fn drive_launches(&mut self, now: Instant) -> Option<LaunchOutcome> {
        if let Some(task) = self.launch_task.as_ref() {
            let success = match task.poll() {
                TaskPoll::Pending => return None,
                TaskPoll::Ready(success) => success,
                TaskPoll::Lost => {
                    log::error!(target: LOG_TARGET, "launch worker ended without a result");
                    false
                }
            };
            self.launch_task = None;
            return self.sequencer.complete(success, now);
        }

        let favourite = self.sequencer.poll_due(now)?;
        let orchestrator = self.service.orchestrator().clone();
        match worker::dispatch("startup-launch", move || orchestrator.test_favourite(&favourite)) {
            Ok(task) => {
                self.launch_task = Some(task);
                None
            }
            Err(error) => {
                log::error!(target: LOG_TARGET, "could not start launch worker: {error}");
                self.sequencer.complete(false, now)
            }
        }
    }

    fn drive_metrics(&mut self, now: Instant) -> Option<MetricsSnapshot> {
        if let Some(task) = self.metrics_task.as_ref() {
            let result = match task.poll() {
                TaskPoll::Pending => return None,
                TaskPoll::Ready(result) => result,
                TaskPoll::Lost => Err(MetricsError::Unavailable(
                    "metrics worker ended without a result".to_string(),
                )),
            };
            self.metrics_task = None;
            return match result {
                Ok(snapshot) => {
                    self.service.record_metrics(&snapshot);
                    Some(snapshot)
                }
                Err(error) => {
                    log::warn!(target: LOG_TARGET, "metrics sample failed: {error}");
                    None
                }
            };
        }

        let due = self.next_metrics_at?;
        if now < due {
            return None;
        }
        self.next_metrics_at = Some(now + SAMPLE_INTERVAL);
        let source = self.service.metrics_source();
        let job = move || {
            source
                .lock()
                .map_err(|_| MetricsError::Unavailable("metrics source lock poisoned".to_string()))
                .and_then(|mut source| source.sample())
        };
        match worker::dispatch("metrics-sample", job) {
            Ok(task) => self.metrics_task = Some(task),
            Err(error) => log::error!(target: LOG_TARGET, "could not start metrics worker: {error}"),
        }
        None
    }

    fn collect_scan(&mut self) -> Option<usize> {
        let task = self.scan_task.as_ref()?;
        let result = match task.poll() {
            TaskPoll::Pending => return None,
            TaskPoll::Ready(result) => result,
            TaskPoll::Lost => Err(ProviderError::new("app scan worker ended without a result")),
        };
        self.scan_task = None;

        match result {
            Ok(apps) => {
                let count = apps.len();
                self.service.set_installed_apps(apps);
                Some(count)
            }
            Err(error) => {
                log::error!(target: LOG_TARGET, "app scan failed: {error}");
                None
            }
        }
    }
}

fn runtime_mode() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows-event-loop"
    } else {
        "headless"
    }
}

#[cfg(target_os = "windows")]
fn sync_autostart(config: &AppConfig) {
    let wanted = config.admin.autostart_app;
    match crate::startup::is_enabled() {
        Ok(current) if current == wanted => {}
        Ok(_) => {
            let result = std::env::current_exe()
                .map_err(crate::startup::StartupError::from)
                .and_then(|exe| crate::startup::set_enabled(wanted, &exe));
            match result {
                Ok(()) => log::info!(target: LOG_TARGET, "autostart set to {wanted}"),
                Err(error) => log::warn!(target: LOG_TARGET, "autostart update failed: {error}"),
            }
        }
        Err(error) => log::warn!(target: LOG_TARGET, "autostart query failed: {error}"),
    }
}

#[cfg(target_os = "windows")]
struct SingleInstanceGuard {
    handle: windows_sys::Win32::Foundation::HANDLE,
}

#[cfg(target_os = "windows")]
impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        unsafe {
            windows_sys::Win32::Foundation::CloseHandle(self.handle);
        }
    }
}

#[cfg(target_os = "windows")]
fn acquire_single_instance_guard() -> Result<Option<SingleInstanceGuard>, String> {
    use windows_sys::Win32::Foundation::{GetLastError, ERROR_ALREADY_EXISTS};
    use windows_sys::Win32::System::Threading::CreateMutexW;

    let mutex_name: Vec<u16> = "Local\\StarterAppLauncherRuntime"
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    let handle = unsafe { CreateMutexW(std::ptr::null(), 0, mutex_name.as_ptr()) };
    if handle.is_null() {
        let error = unsafe { GetLastError() };
        return Err(format!("CreateMutexW failed with error {error}"));
    }

    let error = unsafe { GetLastError() };
    if error == ERROR_ALREADY_EXISTS {
        unsafe {
            windows_sys::Win32::Foundation::CloseHandle(handle);
        }
        return Ok(None);
    }

    Ok(Some(SingleInstanceGuard { handle }))
}
