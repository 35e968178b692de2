use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[cfg(target_os = "windows")]
const LOG_TARGET: &str = "launcher";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    EmptyPath,
    MissingPath(PathBuf),
    LaunchFailed { message: String, code: Option<i64> },
    /// The host runs elevated and the requested launch cannot be
    /// de-elevated, so the caller must try its next mechanism.
    ElevatedHost,
    UnsupportedPlatform,
}

impl Display for LaunchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "empty path"),
            Self::MissingPath(path) => write!(f, "path does not exist: {}", path.display()),
            Self::LaunchFailed {
                message,
                code: Some(code),
            } => write!(f, "launch failed ({code}): {message}"),
            Self::LaunchFailed { message, code: None } => write!(f, "launch failed: {message}"),
            Self::ElevatedHost => write!(f, "host is elevated; refusing inherited-token launch"),
            Self::UnsupportedPlatform => write!(f, "launching is unsupported on this platform"),
        }
    }
}

impl std::error::Error for LaunchError {}

/// Checks that `path` is non-empty and exists on disk.
pub fn validate_target(path: &str) -> Result<PathBuf, LaunchError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(LaunchError::EmptyPath);
    }

    let candidate = Path::new(trimmed);
    if !candidate.exists() {
        return Err(LaunchError::MissingPath(candidate.to_path_buf()));
    }

    Ok(candidate.to_path_buf())
}

/// Maps a `.lnk` file to the path it points at. Implementations return the
/// input unchanged when resolution fails.
pub trait ShortcutResolver: Send + Sync {
    fn resolve(&self, shortcut: &Path) -> PathBuf;
}

pub trait ProcessLauncher: Send + Sync {
    /// Starts `target` with the interactive user's normal token, never the
    /// host's elevated one.
    fn launch_unelevated(&self, target: &Path, args: &[&str]) -> Result<(), LaunchError>;
    /// Hands `target` (a file path or URL) to the shell's file association.
    fn open_associated(&self, target: &str) -> Result<(), LaunchError>;
}

/// Resolves shortcuts through the `WScript.Shell` COM object in PowerShell.
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerShellResolver;

impl ShortcutResolver for PowerShellResolver {
    #[cfg(target_os = "windows")]
    fn resolve(&self, shortcut: &Path) -> PathBuf {
        use std::os::windows::process::CommandExt;

        const CREATE_NO_WINDOW: u32 = 0x0800_0000;

        let is_lnk = shortcut
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("lnk"))
            .unwrap_or(false);
        if !is_lnk {
            return shortcut.to_path_buf();
        }

        let quoted = shortcut.to_string_lossy().replace('\'', "''");
        let script = format!(
            "$shell = New-Object -ComObject WScript.Shell; $shell.CreateShortcut('{quoted}').TargetPath"
        );
        let output = std::process::Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .creation_flags(CREATE_NO_WINDOW)
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let target = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if target.is_empty() {
                    shortcut.to_path_buf()
                } else {
                    PathBuf::from(target)
                }
            }
            Ok(output) => {
                log::warn!(
                    target: LOG_TARGET,
                    "shortcut resolution exited with {} for {}",
                    output.status,
                    shortcut.display()
                );
                shortcut.to_path_buf()
            }
            Err(error) => {
                log::warn!(
                    target: LOG_TARGET,
                    "shortcut resolution failed for {}: {error}",
                    shortcut.display()
                );
                shortcut.to_path_buf()
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn resolve(&self, shortcut: &Path) -> PathBuf {
        shortcut.to_path_buf()
    }
}

/// Launches through `ShellExecuteW`, or through `explorer.exe` when the host
/// itself is elevated.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellLauncher;

#[cfg(target_os = "windows")]
impl ProcessLauncher for ShellLauncher {
    fn launch_unelevated(&self, target: &Path, args: &[&str]) -> Result<(), LaunchError> {
        if target.as_os_str().is_empty() {
            return Err(LaunchError::EmptyPath);
        }

        if is_process_elevated() {
            // explorer.exe re-parents the launch under the desktop's token but
            // cannot forward arguments.
            if !args.is_empty() {
                return Err(LaunchError::ElevatedHost);
            }
            return std::process::Command::new("explorer.exe")
                .arg(target)
                .spawn()
                .map(|_| ())
                .map_err(|error| LaunchError::LaunchFailed {
                    message: error.to_string(),
                    code: error.raw_os_error().map(i64::from),
                });
        }

        let parameters = join_arguments(args);
        shell_execute(&target.to_string_lossy(), parameters.as_deref())
    }

    fn open_associated(&self, target: &str) -> Result<(), LaunchError> {
        if target.trim().is_empty() {
            return Err(LaunchError::EmptyPath);
        }
        shell_execute(target.trim(), None)
    }
}

#[cfg(not(target_os = "windows"))]
impl ProcessLauncher for ShellLauncher {
    fn launch_unelevated(&self, _target: &Path, _args: &[&str]) -> Result<(), LaunchError> {
        Err(LaunchError::UnsupportedPlatform)
    }

    fn open_associated(&self, _target: &str) -> Result<(), LaunchError> {
        Err(LaunchError::UnsupportedPlatform)
    }
}

#[cfg(target_os = "windows")]
fn shell_execute(file: &str, parameters: Option<&str>) -> Result<(), LaunchError> {
    use windows_sys::Win32::UI::Shell::ShellExecuteW;
    use windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    let verb = to_wide("open");
    let file_wide = to_wide(file);
    let params_wide = parameters.map(to_wide);
    let params_ptr = params_wide
        .as_ref()
        .map(|value| value.as_ptr())
        .unwrap_or(std::ptr::null());

    let result = unsafe {
        ShellExecuteW(
            std::ptr::null_mut(),
            verb.as_ptr(),
            file_wide.as_ptr(),
            params_ptr,
            std::ptr::null(),
            SW_SHOWNORMAL,
        )
    };

    // Values above 32 signal success.
    let code = result as isize;
    if code > 32 {
        return Ok(());
    }
    Err(LaunchError::LaunchFailed {
        message: format!("ShellExecuteW could not open {file}"),
        code: Some(code as i64),
    })
}

#[cfg(target_os = "windows")]
fn is_process_elevated() -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut returned = 0_u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut TOKEN_ELEVATION as *mut core::ffi::c_void,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        CloseHandle(token);
        ok != 0 && elevation.TokenIsElevated != 0
    }
}

#[cfg(target_os = "windows")]
fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn join_arguments(args: &[&str]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    let joined = args
        .iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                (*arg).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined)
}

/// Resolver backed by a fixed shortcut-to-target table.
#[derive(Debug, Default, Clone)]
pub struct FixedResolver {
    targets: HashMap<PathBuf, PathBuf>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, shortcut: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.targets.insert(shortcut.into(), target.into());
        self
    }
}

impl ShortcutResolver for FixedResolver {
    fn resolve(&self, shortcut: &Path) -> PathBuf {
        self.targets
            .get(shortcut)
            .cloned()
            .unwrap_or_else(|| shortcut.to_path_buf())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchCall {
    Unelevated { target: PathBuf, args: Vec<String> },
    Open { target: String },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<LaunchCall>,
    fail_unelevated: Vec<PathBuf>,
    fail_open: Vec<String>,
    fail_all_unelevated: bool,
    fail_all_open: bool,
}

/// Records every launch request instead of starting processes.
#[derive(Debug, Default, Clone)]
pub struct MockLauncher {
    state: Arc<Mutex<MockState>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LaunchCall> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn fail_unelevated_for(&self, target: impl Into<PathBuf>) {
        let target = target.into();
        self.with_state(|state| state.fail_unelevated.push(target));
    }

    pub fn fail_open_for(&self, target: &str) {
        self.with_state(|state| state.fail_open.push(target.to_string()));
    }

    pub fn fail_all_unelevated(&self, fail: bool) {
        self.with_state(|state| state.fail_all_unelevated = fail);
    }

    pub fn fail_all_open(&self, fail: bool) {
        self.with_state(|state| state.fail_all_open = fail);
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl ProcessLauncher for MockLauncher {
    fn launch_unelevated(&self, target: &Path, args: &[&str]) -> Result<(), LaunchError> {
        self.with_state(|state| {
            state.calls.push(LaunchCall::Unelevated {
                target: target.to_path_buf(),
                args: args.iter().map(|arg| (*arg).to_string()).collect(),
            });
            if state.fail_all_unelevated || state.fail_unelevated.iter().any(|p| p == target) {
                return Err(LaunchError::LaunchFailed {
                    message: format!("simulated failure for {}", target.display()),
                    code: None,
                });
            }
            Ok(())
        })
    }

    fn open_associated(&self, target: &str) -> Result<(), LaunchError> {
        self.with_state(|state| {
            state.calls.push(LaunchCall::Open {
                target: target.to_string(),
            });
            if state.fail_all_open || state.fail_open.iter().any(|t| t == target) {
                return Err(LaunchError::LaunchFailed {
                    message: format!("simulated failure for {target}"),
                    code: None,
                });
            }
            Ok(())
        })
    }
}
