use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use log::{LevelFilter, Log, Metadata, Record};

const LOG_FILE_NAME: &str = "starter.log";
const ARCHIVE_PREFIX: &str = "starter-";
const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
const MAX_ARCHIVES: usize = 5;

static LOGGER: OnceLock<RotatingFileLogger> = OnceLock::new();
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

/// `log` backend writing `[time] [LEVEL] [target] message` lines to a size
/// capped file, keeping a bounded number of timestamped archives.
pub struct RotatingFileLogger {
    dir: PathBuf,
    path: PathBuf,
    file: Mutex<Option<File>>,
    level: LevelFilter,
    echo_stderr: bool,
    max_bytes: u64,
    max_archives: usize,
}

impl RotatingFileLogger {
    pub fn open(dir: &Path, level: LevelFilter, echo_stderr: bool) -> Result<Self, std::io::Error> {
        Self::open_with_limits(dir, level, echo_stderr, MAX_LOG_BYTES, MAX_ARCHIVES)
    }

    pub fn open_with_limits(
        dir: &Path,
        level: LevelFilter,
        echo_stderr: bool,
        max_bytes: u64,
        max_archives: usize,
    ) -> Result<Self, std::io::Error> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        rotate_if_needed(&path, dir, max_bytes, max_archives)?;
        let file = open_append(&path)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            file: Mutex::new(Some(file)),
            level,
            echo_stderr,
            max_bytes,
            max_archives,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Makes this the process-wide `log` backend. Only the first call wins.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        let logger = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    fn write_line(&self, line: &str) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let too_big = guard
            .as_ref()
            .and_then(|file| file.metadata().ok())
            .map(|meta| meta.len() >= self.max_bytes)
            .unwrap_or(false);
        if too_big {
            // Close before renaming so the rename works on Windows.
            *guard = None;
            let _ = rotate_if_needed(&self.path, &self.dir, self.max_bytes, self.max_archives);
        }
        if guard.is_none() {
            *guard = open_append(&self.path).ok();
        }

        if let Some(file) = guard.as_mut() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }
}

impl Log for RotatingFileLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            &chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            record.level(),
            record.target(),
            &record.args().to_string(),
        );
        if self.echo_stderr {
            eprint!("{line}");
        }
        self.write_line(&line);
    }

    fn flush(&self) {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            let _ = file.flush();
        }
    }
}

pub fn format_line(timestamp: &str, level: log::Level, target: &str, message: &str) -> String {
    format!("[{timestamp}] [{level}] [{target}] {message}\n")
}

pub fn logs_dir() -> PathBuf {
    crate::config::stable_app_data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join(LOG_FILE_NAME)
}

/// Installs the file logger in the default logs folder plus the panic hook.
pub fn init(verbose: bool) -> Result<(), std::io::Error> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = RotatingFileLogger::open(&logs_dir(), level, verbose)?;
    if logger.install().is_err() {
        log::warn!(target: "runtime", "a logger was already installed");
    }
    install_panic_hook();
    Ok(())
}

/// Last `count` lines of the current log file, newest first.
pub fn recent_lines(count: usize) -> Result<Vec<String>, std::io::Error> {
    recent_lines_in(&log_file_path(), count)
}

pub fn recent_lines_in(path: &Path, count: usize) -> Result<Vec<String>, std::io::Error> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error),
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    Ok(lines[start..].iter().rev().map(|line| (*line).to_string()).collect())
}

pub fn open_logs_folder() -> Result<(), String> {
    let dir = logs_dir();
    fs::create_dir_all(&dir).map_err(|e| format!("failed to create logs dir: {e}"))?;

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("explorer.exe")
            .arg(&dir)
            .spawn()
            .map_err(|e| format!("failed to open logs folder: {e}"))?;
    }

    Ok(())
}

fn open_append(path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotate_if_needed(
    log_path: &Path,
    log_dir: &Path,
    max_bytes: u64,
    max_archives: usize,
) -> Result<(), std::io::Error> {
    let meta = match fs::metadata(log_path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    if meta.len() < max_bytes {
        return Ok(());
    }

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    let archived = log_dir.join(format!("{ARCHIVE_PREFIX}{stamp}.log"));
    fs::rename(log_path, archived)?;
    prune_old_archives(log_dir, max_archives)?;
    Ok(())
}

fn prune_old_archives(log_dir: &Path, max_archives: usize) -> Result<(), std::io::Error> {
    let mut archives = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(ARCHIVE_PREFIX) && n.ends_with(".log"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    // Timestamped names sort oldest first.
    archives.sort();
    let excess = archives.len().saturating_sub(max_archives);
    for oldest in archives.iter().take(excess) {
        let _ = fs::remove_file(oldest);
    }
    Ok(())
}

fn install_panic_hook() {
    let _ = PANIC_HOOK_INSTALLED.get_or_init(|| {
        let prior = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let location = panic_info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown".to_string());
            let payload = panic_info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic payload unavailable".to_string());
            log::error!(target: "runtime", "panic at {location}: {payload}");
            log::logger().flush();
            prior(panic_info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::{format_line, logs_dir, prune_old_archives, recent_lines_in, RotatingFileLogger};
    use log::{Level, LevelFilter, Log, Record};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(label: &str) -> std::path::PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("starter-logging-{label}-{unique}"))
    }

    #[test]
    fn logs_dir_uses_stable_app_data_layout() {
        let dir = logs_dir();
        assert!(dir.to_string_lossy().contains("StarterAppLauncher"));
    }

    #[test]
    fn formats_level_and_target() {
        let line = format_line("2026-01-02 03:04:05", Level::Warn, "launcher", "open failed");
        assert_eq!(line, "[2026-01-02 03:04:05] [WARN] [launcher] open failed\n");
    }

    #[test]
    fn rotates_when_the_file_exceeds_its_cap() {
        let dir = temp_dir("rotate");
        let logger = RotatingFileLogger::open_with_limits(&dir, LevelFilter::Info, false, 64, 2).unwrap();

        for index in 0..20 {
            logger.log(
                &Record::builder()
                    .level(Level::Info)
                    .target("test")
                    .args(format_args!("line number {index}"))
                    .build(),
            );
        }

        let archives = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("starter-"))
            .count();
        assert!(archives >= 1);
        assert!(archives <= 2);
        assert!(std::fs::metadata(logger.path()).unwrap().len() < 200);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn prunes_oldest_archives() {
        let dir = temp_dir("prune");
        std::fs::create_dir_all(&dir).unwrap();
        for stamp in ["20260101-000000.000", "20260102-000000.000", "20260103-000000.000"] {
            std::fs::write(dir.join(format!("starter-{stamp}.log")), b"x").unwrap();
        }

        prune_old_archives(&dir, 2).unwrap();

        assert!(!dir.join("starter-20260101-000000.000.log").exists());
        assert!(dir.join("starter-20260103-000000.000.log").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn recent_lines_returns_the_tail() {
        let dir = temp_dir("tail");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("starter.log");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        assert_eq!(recent_lines_in(&path, 2).unwrap(), vec!["three", "two"]);
        assert!(recent_lines_in(&dir.join("missing.log"), 5).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }
}
