use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::metrics::{process_stem, ProcessInfo};

const LOG_TARGET: &str = "startup";

#[derive(Debug)]
pub enum StartupError {
    Io(std::io::Error),
    Command(String),
    /// Needs administrator rights, or the file is locked.
    PermissionDenied(String),
    /// The entry is not something this app will remove.
    Refused(String),
    UnsupportedPlatform,
}

impl Display for StartupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Command(error) => write!(f, "command error: {error}"),
            Self::PermissionDenied(error) => write!(f, "permission denied: {error}"),
            Self::Refused(error) => write!(f, "refused: {error}"),
            Self::UnsupportedPlatform => write!(f, "unsupported platform"),
        }
    }
}

impl std::error::Error for StartupError {}

impl From<std::io::Error> for StartupError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(target_os = "windows")]
const RUN_SUBKEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
#[cfg(target_os = "windows")]
const VALUE_NAME: &str = "StarterAppLauncher";
/// Flag the Run entry passes so the process knows it was started at login.
pub const STARTUP_ARG: &str = "--startup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupSource {
    RegistryUser,
    RegistrySystem,
    StartupFolderUser,
    StartupFolderCommon,
    TaskScheduler,
}

impl StartupSource {
    pub const ALL: [Self; 5] = [
        Self::RegistryUser,
        Self::RegistrySystem,
        Self::StartupFolderUser,
        Self::StartupFolderCommon,
        Self::TaskScheduler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistryUser => "registry_user",
            Self::RegistrySystem => "registry_system",
            Self::StartupFolderUser => "startup_folder_user",
            Self::StartupFolderCommon => "startup_folder_common",
            Self::TaskScheduler => "task_scheduler",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|source| source.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Running,
    Stopped,
    /// The process list could not be read.
    Unknown,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

/// Something Windows starts at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupEntry {
    pub name: String,
    pub source: StartupSource,
    pub command: String,
    pub status: EntryStatus,
    pub process_id: Option<u32>,
}

impl StartupEntry {
    pub fn new(name: impl Into<String>, source: StartupSource, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            command: command.into(),
            status: EntryStatus::Unknown,
            process_id: None,
        }
    }
}

pub fn startup_command_for_executable(executable_path: &Path) -> Result<String, StartupError> {
    if executable_path.as_os_str().is_empty() {
        return Err(StartupError::Command(
            "executable path is empty".to_string(),
        ));
    }
    if !executable_path.exists() {
        return Err(StartupError::Command(format!(
            "executable path does not exist: {}",
            executable_path.display()
        )));
    }
    if !executable_path.is_file() {
        return Err(StartupError::Command(format!(
            "executable path is not a file: {}",
            executable_path.display()
        )));
    }

    Ok(format!(
        "\"{}\" {}",
        executable_path.to_string_lossy(),
        STARTUP_ARG
    ))
}

/// Open handle to a hive's `Run` key, closed on drop.
#[cfg(target_os = "windows")]
struct RunKey(windows_sys::Win32::System::Registry::HKEY);

#[cfg(target_os = "windows")]
impl RunKey {
    /// `Ok(None)` when the key does not exist.
    fn open(
        hive: windows_sys::Win32::System::Registry::HKEY,
        access: u32,
    ) -> Result<Option<Self>, StartupError> {
        use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
        use windows_sys::Win32::System::Registry::RegOpenKeyExW;

        let subkey = to_wide(RUN_SUBKEY);
        let mut key = std::ptr::null_mut();
        let status = unsafe { RegOpenKeyExW(hive, subkey.as_ptr(), 0, access, &mut key) };
        match status {
            ERROR_SUCCESS => Ok(Some(Self(key))),
            ERROR_FILE_NOT_FOUND => Ok(None),
            other => Err(registry_error("open run key", other)),
        }
    }

    fn create_for_user() -> Result<Self, StartupError> {
        use windows_sys::Win32::Foundation::ERROR_SUCCESS;
        use windows_sys::Win32::System::Registry::{
            RegCreateKeyExW, HKEY_CURRENT_USER, KEY_SET_VALUE,
        };

        let subkey = to_wide(RUN_SUBKEY);
        let mut key = std::ptr::null_mut();
        let status = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                subkey.as_ptr(),
                0,
                std::ptr::null(),
                0,
                KEY_SET_VALUE,
                std::ptr::null(),
                &mut key,
                std::ptr::null_mut(),
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error("create run key", status));
        }
        Ok(Self(key))
    }
}

#[cfg(target_os = "windows")]
impl Drop for RunKey {
    fn drop(&mut self) {
        unsafe {
            windows_sys::Win32::System::Registry::RegCloseKey(self.0);
        }
    }
}

/// Whether this app's own value is present in the per-user `Run` key.
#[cfg(target_os = "windows")]
pub fn is_enabled() -> Result<bool, StartupError> {
    use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::{
        RegQueryValueExW, HKEY_CURRENT_USER, KEY_QUERY_VALUE,
    };

    let Some(key) = RunKey::open(HKEY_CURRENT_USER, KEY_QUERY_VALUE)? else {
        return Ok(false);
    };
    let value_name = to_wide(VALUE_NAME);
    let mut size = 0_u32;
    let status = unsafe {
        RegQueryValueExW(
            key.0,
            value_name.as_ptr(),
            std::ptr::null(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut size,
        )
    };
    match status {
        ERROR_SUCCESS => Ok(true),
        ERROR_FILE_NOT_FOUND => Ok(false),
        other => Err(registry_error("query run value", other)),
    }
}

/// Writes or removes this app's `Run` value. The command always carries
/// the startup flag so a login launch can be told apart from a manual one.
#[cfg(target_os = "windows")]
pub fn set_enabled(enabled: bool, executable_path: &Path) -> Result<(), StartupError> {
    use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::{
        RegDeleteValueW, RegSetValueExW, HKEY_CURRENT_USER, KEY_SET_VALUE, REG_SZ,
    };

    let value_name = to_wide(VALUE_NAME);

    if enabled {
        let command = to_wide(&startup_command_for_executable(executable_path)?);
        let key = RunKey::create_for_user()?;
        let status = unsafe {
            RegSetValueExW(
                key.0,
                value_name.as_ptr(),
                0,
                REG_SZ,
                command.as_ptr() as *const u8,
                (command.len() * std::mem::size_of::<u16>()) as u32,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error("set run value", status));
        }
        log::info!(target: LOG_TARGET, "registered login launch");
        return Ok(());
    }

    let Some(key) = RunKey::open(HKEY_CURRENT_USER, KEY_SET_VALUE)? else {
        return Ok(());
    };
    let status = unsafe { RegDeleteValueW(key.0, value_name.as_ptr()) };
    match status {
        ERROR_SUCCESS | ERROR_FILE_NOT_FOUND => {
            log::info!(target: LOG_TARGET, "removed login launch");
            Ok(())
        }
        other => Err(registry_error("delete run value", other)),
    }
}

/// Registry `Run` values of both hives, the user and common Startup folders
/// and logon-triggered scheduled tasks. Status is left `Unknown`; see
/// [`mark_running`].
#[cfg(target_os = "windows")]
pub fn list_entries() -> Result<Vec<StartupEntry>, StartupError> {
    use windows_sys::Win32::System::Registry::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};

    let mut entries = read_run_values(HKEY_CURRENT_USER, StartupSource::RegistryUser)?;
    match read_run_values(HKEY_LOCAL_MACHINE, StartupSource::RegistrySystem) {
        Ok(system) => entries.extend(system),
        Err(error) => log::warn!(target: LOG_TARGET, "could not read machine run key: {error}"),
    }

    for (dir, source) in startup_folders() {
        entries.extend(startup_folder_entries(&dir, source));
    }

    match query_scheduled_tasks() {
        Ok(tasks) => entries.extend(tasks),
        Err(error) => log::warn!(target: LOG_TARGET, "could not list scheduled tasks: {error}"),
    }
    Ok(entries)
}

#[cfg(not(target_os = "windows"))]
pub fn list_entries() -> Result<Vec<StartupEntry>, StartupError> {
    Err(StartupError::UnsupportedPlatform)
}

/// The user and common Startup folders that exist in the environment.
pub fn startup_folders() -> Vec<(PathBuf, StartupSource)> {
    let startup = Path::new("Microsoft")
        .join("Windows")
        .join("Start Menu")
        .join("Programs")
        .join("Startup");
    [
        ("APPDATA", StartupSource::StartupFolderUser),
        ("PROGRAMDATA", StartupSource::StartupFolderCommon),
    ]
    .into_iter()
    .filter_map(|(variable, source)| {
        let root = std::env::var_os(variable).filter(|value| !value.is_empty())?;
        Some((PathBuf::from(root).join(&startup), source))
    })
    .collect()
}

/// Shortcuts directly inside a Startup folder. A missing folder yields
/// nothing.
pub fn startup_folder_entries(dir: &Path, source: StartupSource) -> Vec<StartupEntry> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut entries: Vec<StartupEntry> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.path();
            if !is_shortcut(path) {
                return None;
            }
            Some(StartupEntry::new(
                path.file_stem()?.to_string_lossy(),
                source,
                path.to_string_lossy(),
            ))
        })
        .collect();
    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    entries
}

#[cfg(target_os = "windows")]
fn read_run_values(
    hive: windows_sys::Win32::System::Registry::HKEY,
    source: StartupSource,
) -> Result<Vec<StartupEntry>, StartupError> {
    use windows_sys::Win32::Foundation::{ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::{RegEnumValueW, KEY_READ, REG_EXPAND_SZ, REG_SZ};

    const MAX_VALUE_CHARS: usize = 16_384;

    let Some(key) = RunKey::open(hive, KEY_READ)? else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    let mut name = vec![0_u16; MAX_VALUE_CHARS];
    let mut data = vec![0_u16; MAX_VALUE_CHARS];
    for index in 0_u32.. {
        let mut name_len = name.len() as u32;
        let mut data_len = (data.len() * std::mem::size_of::<u16>()) as u32;
        let mut value_type = 0_u32;
        let status = unsafe {
            RegEnumValueW(
                key.0,
                index,
                name.as_mut_ptr(),
                &mut name_len,
                std::ptr::null(),
                &mut value_type,
                data.as_mut_ptr() as *mut u8,
                &mut data_len,
            )
        };
        match status {
            ERROR_SUCCESS => {}
            ERROR_NO_MORE_ITEMS => break,
            other => return Err(registry_error("enumerate run values", other)),
        }
        if value_type != REG_SZ && value_type != REG_EXPAND_SZ {
            continue;
        }

        let chars = (data_len as usize / std::mem::size_of::<u16>()).min(data.len());
        entries.push(StartupEntry::new(
            String::from_utf16_lossy(&name[..name_len as usize]),
            source,
            String::from_utf16_lossy(&data[..chars]).trim_end_matches('\0'),
        ));
    }
    Ok(entries)
}

#[cfg(not(target_os = "windows"))]
pub fn is_enabled() -> Result<bool, StartupError> {
    Err(StartupError::UnsupportedPlatform)
}

#[cfg(not(target_os = "windows"))]
pub fn set_enabled(_enabled: bool, _executable_path: &Path) -> Result<(), StartupError> {
    Err(StartupError::UnsupportedPlatform)
}

#[cfg(target_os = "windows")]
fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(target_os = "windows")]
fn registry_error(action: &str, status: u32) -> StartupError {
    if status == windows_sys::Win32::Foundation::ERROR_ACCESS_DENIED {
        return StartupError::PermissionDenied(format!("{action}: administrator rights required"));
    }
    StartupError::Command(format!("{action} failed with code {status}"))
}

fn is_shortcut(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("lnk"))
        .unwrap_or(false)
}

/// Logon-triggered tasks from `schtasks /Query /FO LIST /V` output. A task
/// with several triggers is listed once.
pub fn parse_scheduled_tasks(output: &str) -> Vec<StartupEntry> {
    let mut blocks: Vec<Vec<(&str, &str)>> = Vec::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("TaskName") {
            blocks.push(Vec::new());
        }
        if let Some(block) = blocks.last_mut() {
            block.push((key, value.trim()));
        }
    }

    let mut entries: Vec<StartupEntry> = Vec::new();
    for block in blocks {
        let at_logon = block.iter().any(|(_, value)| {
            let value = value.to_lowercase();
            value.contains("at log on") || value.contains("at logon") || value.contains("onlogon")
        });
        if !at_logon {
            continue;
        }
        let field = |name: &str| {
            block
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        };
        let Some(name) = field("TaskName")
            .map(|name| name.trim_start_matches('\\'))
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        if entries.iter().any(|entry| entry.name == name) {
            continue;
        }
        let command = field("Task To Run").unwrap_or_default();
        entries.push(StartupEntry::new(name, StartupSource::TaskScheduler, command));
    }
    entries
}

#[cfg(target_os = "windows")]
fn schtasks(args: &[&str]) -> Result<std::process::Output, StartupError> {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    std::process::Command::new("schtasks")
        .args(args)
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .map_err(|error| StartupError::Command(format!("schtasks failed to start: {error}")))
}

#[cfg(target_os = "windows")]
fn query_scheduled_tasks() -> Result<Vec<StartupEntry>, StartupError> {
    let output = schtasks(&["/Query", "/FO", "LIST", "/V"])?;
    if !output.status.success() {
        return Err(StartupError::Command(format!(
            "schtasks query exited with {}",
            output.status
        )));
    }
    Ok(parse_scheduled_tasks(&String::from_utf8_lossy(&output.stdout)))
}

/// Lower-cased file stem of the program a command line starts.
pub fn command_stem(command: &str) -> Option<String> {
    let trimmed = command.trim();
    let program = match trimmed.strip_prefix('"') {
        Some(rest) => rest.split('"').next().unwrap_or(rest),
        None => {
            let lower = trimmed.to_ascii_lowercase();
            match lower.find(".exe") {
                Some(end) => &trimmed[..end + 4],
                None => trimmed.split_whitespace().next().unwrap_or(trimmed),
            }
        }
    };
    let file = program.rsplit(|c: char| c == '\\' || c == '/').next().unwrap_or(program);
    let stem = match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    };
    let stem = stem.trim().to_lowercase();
    (!stem.is_empty()).then_some(stem)
}

/// Sets `status` and `process_id` from a process list. An entry runs when
/// a process has the same program stem as its command, or when one name
/// contains the other.
pub fn mark_running(entries: &mut [StartupEntry], processes: &[ProcessInfo]) {
    const MIN_NAME_MATCH: usize = 3;

    for entry in entries.iter_mut() {
        let program = command_stem(&entry.command);
        let name = entry.name.trim().to_lowercase();
        let found = processes.iter().find(|process| {
            let stem = process_stem(&process.name);
            if program.as_deref() == Some(stem.as_str()) {
                return true;
            }
            name.len() >= MIN_NAME_MATCH
                && stem.len() >= MIN_NAME_MATCH
                && (name.contains(&stem) || stem.contains(&name))
        });
        match found {
            Some(process) => {
                entry.status = EntryStatus::Running;
                entry.process_id = Some(process.pid);
            }
            None => {
                entry.status = EntryStatus::Stopped;
                entry.process_id = None;
            }
        }
    }
}

/// Removes one startup entry from wherever it lives. `Ok(false)` when it
/// was already gone.
pub fn remove_entry(entry: &StartupEntry) -> Result<bool, StartupError> {
    let removed = match entry.source {
        StartupSource::RegistryUser | StartupSource::RegistrySystem => remove_run_value(entry)?,
        StartupSource::StartupFolderUser | StartupSource::StartupFolderCommon => {
            let allowed: Vec<PathBuf> = startup_folders()
                .into_iter()
                .filter(|(_, source)| *source == entry.source)
                .map(|(dir, _)| dir)
                .collect();
            remove_folder_entry(entry, &allowed)?
        }
        StartupSource::TaskScheduler => delete_scheduled_task(&entry.name)?,
    };
    if removed {
        log::info!(
            target: LOG_TARGET,
            "removed startup entry {} ({})",
            entry.name,
            entry.source.as_str()
        );
    }
    Ok(removed)
}

/// Deletes a Startup folder shortcut. Only `.lnk` files directly inside one
/// of `allowed_dirs` are touched.
pub fn remove_folder_entry(entry: &StartupEntry, allowed_dirs: &[PathBuf]) -> Result<bool, StartupError> {
    let path = Path::new(&entry.command);
    if !is_shortcut(path) {
        return Err(StartupError::Refused(format!(
            "not a shortcut: {}",
            path.display()
        )));
    }
    let inside = path
        .parent()
        .map(|parent| allowed_dirs.iter().any(|dir| same_dir(dir, parent)))
        .unwrap_or(false);
    if !inside {
        return Err(StartupError::Refused(format!(
            "outside the startup folders: {}",
            path.display()
        )));
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => Err(
            StartupError::PermissionDenied(format!("{}: {error}", path.display())),
        ),
        Err(error) => Err(StartupError::Io(error)),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    matches!((a.canonicalize(), b.canonicalize()), (Ok(a), Ok(b)) if a == b)
}

#[cfg(target_os = "windows")]
fn remove_run_value(entry: &StartupEntry) -> Result<bool, StartupError> {
    use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::{
        RegDeleteValueW, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_SET_VALUE,
    };

    let hive = if entry.source == StartupSource::RegistryUser {
        HKEY_CURRENT_USER
    } else {
        HKEY_LOCAL_MACHINE
    };
    let Some(key) = RunKey::open(hive, KEY_SET_VALUE)? else {
        return Ok(false);
    };
    let value_name = to_wide(&entry.name);
    let status = unsafe { RegDeleteValueW(key.0, value_name.as_ptr()) };
    match status {
        ERROR_SUCCESS => Ok(true),
        ERROR_FILE_NOT_FOUND => Ok(false),
        other => Err(registry_error("delete run value", other)),
    }
}

#[cfg(not(target_os = "windows"))]
fn remove_run_value(_entry: &StartupEntry) -> Result<bool, StartupError> {
    Err(StartupError::UnsupportedPlatform)
}

#[cfg(target_os = "windows")]
fn delete_scheduled_task(name: &str) -> Result<bool, StartupError> {
    let output = schtasks(&["/Delete", "/TN", name, "/F"])?;
    if output.status.success() {
        return Ok(true);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let lower = stderr.to_lowercase();
    if lower.contains("access is denied") {
        Err(StartupError::PermissionDenied(format!("{name}: {stderr}")))
    } else if lower.contains("cannot find") || lower.contains("does not exist") {
        Ok(false)
    } else {
        Err(StartupError::Command(format!("schtasks delete {name}: {stderr}")))
    }
}

#[cfg(not(target_os = "windows"))]
fn delete_scheduled_task(_name: &str) -> Result<bool, StartupError> {
    Err(StartupError::UnsupportedPlatform)
}
