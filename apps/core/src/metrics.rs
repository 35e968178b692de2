use std::collections::{HashSet, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

const LOG_TARGET: &str = "metrics";
/// One sample a minute, one hour kept.
pub const HISTORY_CAPACITY: usize = 60;
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    Unavailable(String),
    Command(String),
    UnsupportedPlatform,
}

impl Display for MetricsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "metrics unavailable: {message}"),
            Self::Command(message) => write!(f, "command error: {message}"),
            Self::UnsupportedPlatform => write!(f, "unsupported platform"),
        }
    }
}

impl std::error::Error for MetricsError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub ram_used_gb: f64,
    pub ram_total_gb: f64,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSample {
    pub at: DateTime<Utc>,
    pub cpu: f32,
    pub ram: f32,
}

impl From<&MetricsSnapshot> for MetricsSample {
    fn from(value: &MetricsSnapshot) -> Self {
        Self {
            at: value.taken_at,
            cpu: value.cpu_percent,
            ram: value.ram_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Main window title, for processes listed as running windows.
    pub title: Option<String>,
    pub memory_mb: f64,
    pub cpu_percent: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemInfo {
    pub boot_time: DateTime<Utc>,
    pub uptime: String,
    pub cpu_count: usize,
    pub total_processes: usize,
}

/// Where CPU, memory and process figures come from. Sampling may block for a
/// short while, so the event loop calls it from a worker.
pub trait MetricsSource: Send {
    fn sample(&mut self) -> Result<MetricsSnapshot, MetricsError>;
    fn system_info(&mut self) -> Result<SystemInfo, MetricsError>;
    fn processes(&mut self) -> Result<Vec<ProcessInfo>, MetricsError>;
    /// Processes that own a visible, titled top-level window.
    fn running_windows(&mut self) -> Result<Vec<ProcessInfo>, MetricsError>;
    /// `Ok(false)` when no such process exists.
    fn kill_process(&mut self, pid: u32) -> Result<bool, MetricsError>;
}

pub type SharedMetrics = Arc<Mutex<Box<dyn MetricsSource>>>;

pub fn shared(source: impl MetricsSource + 'static) -> SharedMetrics {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Bounded, oldest-first record of samples.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    samples: VecDeque<MetricsSample>,
    capacity: usize,
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, snapshot: &MetricsSnapshot) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(MetricsSample::from(snapshot));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricsSample> {
        self.samples.back()
    }

    /// True when nothing was recorded during the last sample interval.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let interval = TimeDelta::seconds(SAMPLE_INTERVAL.as_secs() as i64);
        match self.latest() {
            Some(latest) => now - latest.at > interval,
            None => true,
        }
    }

    pub fn within(&self, minutes: u32, now: DateTime<Utc>) -> Vec<MetricsSample> {
        let cutoff = now - TimeDelta::minutes(i64::from(minutes));
        self.samples
            .iter()
            .filter(|sample| sample.at >= cutoff)
            .cloned()
            .collect()
    }
}

/// `3d 4h 5m`, leaving out zero days and hours.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    parts.push(format!("{minutes}m"));
    parts.join(" ")
}

/// Live figures from the `sysinfo` crate.
pub struct SysinfoSource {
    system: System,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn process_info(&self, pid: Pid, title: Option<String>) -> Option<ProcessInfo> {
        let process = self.system.process(pid)?;
        Some(ProcessInfo {
            pid: pid.as_u32(),
            name: process.name().to_string(),
            title,
            memory_mb: process.memory() as f64 / BYTES_PER_MB,
            cpu_percent: process.cpu_usage(),
        })
    }
}

impl MetricsSource for SysinfoSource {
    fn sample(&mut self) -> Result<MetricsSnapshot, MetricsError> {
        // CPU usage is a delta between two refreshes.
        self.system.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(MetricsError::Unavailable("total memory reported as zero".to_string()));
        }
        let used = self.system.used_memory();
        Ok(MetricsSnapshot {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            ram_percent: (used as f64 / total as f64 * 100.0) as f32,
            ram_used_gb: used as f64 / BYTES_PER_GB,
            ram_total_gb: total as f64 / BYTES_PER_GB,
            taken_at: Utc::now(),
        })
    }

    fn system_info(&mut self) -> Result<SystemInfo, MetricsError> {
        self.system.refresh_cpu();
        self.system.refresh_processes();
        let boot_secs = i64::try_from(System::boot_time())
            .map_err(|_| MetricsError::Unavailable("boot time out of range".to_string()))?;
        let boot_time = DateTime::<Utc>::from_timestamp(boot_secs, 0)
            .ok_or_else(|| MetricsError::Unavailable("boot time out of range".to_string()))?;
        Ok(SystemInfo {
            boot_time,
            uptime: format_uptime(System::uptime()),
            cpu_count: self.system.cpus().len(),
            total_processes: self.system.processes().len(),
        })
    }

    fn processes(&mut self) -> Result<Vec<ProcessInfo>, MetricsError> {
        self.system.refresh_processes();
        let mut processes: Vec<ProcessInfo> = self
            .system
            .processes()
            .keys()
            .filter_map(|pid| self.process_info(*pid, None))
            .collect();
        processes.sort_by_key(|process| process.pid);
        Ok(processes)
    }

    fn running_windows(&mut self) -> Result<Vec<ProcessInfo>, MetricsError> {
        let windows = visible_windows()?;
        self.system.refresh_processes();

        let mut seen = HashSet::new();
        let mut apps: Vec<ProcessInfo> = windows
            .into_iter()
            .filter(|(pid, _)| seen.insert(*pid))
            .filter_map(|(pid, title)| self.process_info(Pid::from_u32(pid), Some(title)))
            .collect();
        apps.sort_by_key(|app| app.title.as_deref().unwrap_or_default().to_lowercase());
        Ok(apps)
    }

    fn kill_process(&mut self, pid: u32) -> Result<bool, MetricsError> {
        self.system.refresh_processes();
        if self.system.process(Pid::from_u32(pid)).is_none() {
            return Ok(false);
        }
        terminate(pid, &self.system)
    }
}

#[cfg(target_os = "windows")]
fn terminate(pid: u32, _system: &System) -> Result<bool, MetricsError> {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let output = std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .map_err(|error| MetricsError::Command(format!("taskkill failed to start: {error}")))?;
    if output.status.success() {
        log::info!(target: LOG_TARGET, "killed process {pid}");
        Ok(true)
    } else {
        Err(MetricsError::Command(format!(
            "taskkill exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(not(target_os = "windows"))]
fn terminate(pid: u32, system: &System) -> Result<bool, MetricsError> {
    let Some(process) = system.process(Pid::from_u32(pid)) else {
        return Ok(false);
    };
    if process.kill() {
        log::info!(target: LOG_TARGET, "killed process {pid}");
        Ok(true)
    } else {
        Err(MetricsError::Command(format!("could not signal process {pid}")))
    }
}

/// `(pid, title)` for every visible, unowned, titled top-level window.
#[cfg(target_os = "windows")]
fn visible_windows() -> Result<Vec<(u32, String)>, MetricsError> {
    use windows_sys::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindow, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
        IsWindowVisible, GW_OWNER,
    };

    unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let windows = &mut *(lparam as *mut Vec<(u32, String)>);
        if IsWindowVisible(hwnd) == 0 || !GetWindow(hwnd, GW_OWNER).is_null() {
            return 1;
        }
        let length = GetWindowTextLengthW(hwnd);
        if length <= 0 {
            return 1;
        }
        let mut buffer = vec![0_u16; length as usize + 1];
        let copied = GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
        if copied <= 0 {
            return 1;
        }
        let mut pid = 0_u32;
        GetWindowThreadProcessId(hwnd, &mut pid);
        windows.push((pid, String::from_utf16_lossy(&buffer[..copied as usize])));
        1
    }

    let mut windows: Vec<(u32, String)> = Vec::new();
    let ok = unsafe { EnumWindows(Some(collect), &mut windows as *mut Vec<(u32, String)> as LPARAM) };
    if ok == 0 {
        return Err(MetricsError::Unavailable("EnumWindows failed".to_string()));
    }
    Ok(windows)
}

#[cfg(not(target_os = "windows"))]
fn visible_windows() -> Result<Vec<(u32, String)>, MetricsError> {
    Err(MetricsError::UnsupportedPlatform)
}

#[derive(Debug)]
struct FixedState {
    snapshot: MetricsSnapshot,
    info: SystemInfo,
    processes: Vec<ProcessInfo>,
    windows: Vec<ProcessInfo>,
    samples_taken: usize,
    killed: Vec<u32>,
}

/// Canned figures for tests. Clones share state.
#[derive(Debug, Clone)]
pub struct FixedMetrics {
    state: Arc<Mutex<FixedState>>,
}

impl Default for FixedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedMetrics {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            state: Arc::new(Mutex::new(FixedState {
                snapshot: MetricsSnapshot {
                    cpu_percent: 12.5,
                    ram_percent: 50.0,
                    ram_used_gb: 8.0,
                    ram_total_gb: 16.0,
                    taken_at: now,
                },
                info: SystemInfo {
                    boot_time: now - TimeDelta::hours(5),
                    uptime: format_uptime(5 * 3_600),
                    cpu_count: 8,
                    total_processes: 0,
                },
                processes: Vec::new(),
                windows: Vec::new(),
                samples_taken: 0,
                killed: Vec::new(),
            })),
        }
    }

    pub fn with_processes(self, processes: Vec<ProcessInfo>) -> Self {
        self.with_state(|state| {
            state.info.total_processes = processes.len();
            state.processes = processes;
        });
        self
    }

    pub fn with_windows(self, windows: Vec<ProcessInfo>) -> Self {
        self.with_state(|state| state.windows = windows);
        self
    }

    pub fn set_cpu(&self, cpu_percent: f32) {
        self.with_state(|state| state.snapshot.cpu_percent = cpu_percent);
    }

    pub fn samples_taken(&self) -> usize {
        self.with_state(|state| state.samples_taken)
    }

    pub fn killed(&self) -> Vec<u32> {
        self.with_state(|state| state.killed.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FixedState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl MetricsSource for FixedMetrics {
    fn sample(&mut self) -> Result<MetricsSnapshot, MetricsError> {
        Ok(self.with_state(|state| {
            state.samples_taken += 1;
            MetricsSnapshot {
                taken_at: Utc::now(),
                ..state.snapshot.clone()
            }
        }))
    }

    fn system_info(&mut self) -> Result<SystemInfo, MetricsError> {
        Ok(self.with_state(|state| state.info.clone()))
    }

    fn processes(&mut self) -> Result<Vec<ProcessInfo>, MetricsError> {
        Ok(self.with_state(|state| state.processes.clone()))
    }

    fn running_windows(&mut self) -> Result<Vec<ProcessInfo>, MetricsError> {
        Ok(self.with_state(|state| state.windows.clone()))
    }

    fn kill_process(&mut self, pid: u32) -> Result<bool, MetricsError> {
        Ok(self.with_state(|state| {
            let before = state.processes.len();
            state.processes.retain(|process| process.pid != pid);
            state.windows.retain(|process| process.pid != pid);
            let existed = state.processes.len() != before;
            if existed {
                state.killed.push(pid);
            }
            existed
        }))
    }
}

/// Lower-cased process name without `.exe`.
pub fn process_stem(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}
