use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::action_executor::{
    PowerShellResolver, ProcessLauncher, ShellLauncher, ShortcutResolver,
};
use crate::model::Favourite;

const LOG_TARGET: &str = "launcher";

/// Delays between launch steps. Browsers have no "ready for new tabs"
/// signal, so these are heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPacing {
    pub browser_settle: Duration,
    pub url_spacing: Duration,
    pub batch_spacing: Duration,
}

impl Default for LaunchPacing {
    fn default() -> Self {
        Self {
            browser_settle: Duration::from_millis(500),
            url_spacing: Duration::from_millis(150),
            batch_spacing: Duration::from_millis(300),
        }
    }
}

impl LaunchPacing {
    pub fn immediate() -> Self {
        Self {
            browser_settle: Duration::ZERO,
            url_spacing: Duration::ZERO,
            batch_spacing: Duration::ZERO,
        }
    }
}

/// Starts favourites with normal user privileges, walking a fallback chain
/// of progressively more primitive mechanisms. Never returns an error: every
/// failure is logged and folded into a `false` result.
#[derive(Clone)]
pub struct LaunchOrchestrator {
    resolver: Arc<dyn ShortcutResolver>,
    launcher: Arc<dyn ProcessLauncher>,
    pacing: LaunchPacing,
}

impl LaunchOrchestrator {
    pub fn new(
        resolver: Arc<dyn ShortcutResolver>,
        launcher: Arc<dyn ProcessLauncher>,
        pacing: LaunchPacing,
    ) -> Self {
        Self {
            resolver,
            launcher,
            pacing,
        }
    }

    pub fn system() -> Self {
        Self::new(
            Arc::new(PowerShellResolver),
            Arc::new(ShellLauncher),
            LaunchPacing::default(),
        )
    }

    pub fn pacing(&self) -> LaunchPacing {
        self.pacing
    }

    pub fn launch_app(&self, lnk_path: &str) -> bool {
        let path = PathBuf::from(lnk_path.trim());
        if path.as_os_str().is_empty() {
            log::warn!(target: LOG_TARGET, "launch requested with an empty path");
            return false;
        }

        let resolved = if path.exists() {
            None
        } else {
            log::warn!(target: LOG_TARGET, "shortcut not found: {}", path.display());
            let resolved = self.resolver.resolve(&path);
            if resolved != path && resolved.exists() {
                log::info!(target: LOG_TARGET, "using resolved target {}", resolved.display());
                Some(resolved)
            } else {
                None
            }
        };
        let primary = resolved.as_deref().unwrap_or(path.as_path());

        match self.launcher.launch_unelevated(primary, &[]) {
            Ok(()) => {
                log::info!(target: LOG_TARGET, "launched {}", primary.display());
                return true;
            }
            Err(error) => {
                log::warn!(
                    target: LOG_TARGET,
                    "normal-user launch failed for {}: {error}",
                    primary.display()
                );
            }
        }

        if self.open(&primary.to_string_lossy()) {
            return true;
        }

        // Last resort: the shortcut exists but its association failed, so
        // try the executable it points at.
        if resolved.is_none() && path.exists() {
            let target = self.resolver.resolve(&path);
            if target != path && target.exists() {
                return self.open(&target.to_string_lossy());
            }
        }

        log::error!(target: LOG_TARGET, "all launch mechanisms failed for {}", path.display());
        false
    }

    pub fn launch_browser_urls(&self, browser_lnk: &str, urls: &[String]) -> bool {
        let Some((first, rest)) = urls.split_first() else {
            return false;
        };

        let shortcut = PathBuf::from(browser_lnk.trim());
        let mut opened = 0usize;

        let executable = self.resolver.resolve(&shortcut);
        let launched_with_exe = if is_executable(&executable) {
            match self.launcher.launch_unelevated(&executable, &[first.as_str()]) {
                Ok(()) => {
                    log::info!(
                        target: LOG_TARGET,
                        "launched browser {} with {first}",
                        executable.display()
                    );
                    true
                }
                Err(error) => {
                    log::warn!(
                        target: LOG_TARGET,
                        "browser launch failed for {}: {error}",
                        executable.display()
                    );
                    false
                }
            }
        } else {
            log::warn!(
                target: LOG_TARGET,
                "resolved browser path is not an executable: {}",
                executable.display()
            );
            false
        };

        if launched_with_exe {
            opened += 1;
        } else {
            if !shortcut.as_os_str().is_empty() {
                self.open(&shortcut.to_string_lossy());
            }
            if self.open(first) {
                opened += 1;
            }
        }

        if !rest.is_empty() {
            pause(self.pacing.browser_settle);
        }

        for (index, url) in rest.iter().enumerate() {
            if index > 0 {
                pause(self.pacing.url_spacing);
            }
            if self.open(url) {
                opened += 1;
            }
        }

        log::info!(
            target: LOG_TARGET,
            "opened {opened} of {} browser links",
            urls.len()
        );
        opened > 0
    }

    pub fn test_favourite(&self, favourite: &Favourite) -> bool {
        if favourite.opens_browser_links() {
            self.launch_browser_urls(&favourite.lnk_path, &favourite.browser_links)
        } else {
            self.launch_app(&favourite.lnk_path)
        }
    }

    /// Launches every favourite in order and returns how many succeeded.
    pub fn launch_selected(&self, favourites: &[Favourite]) -> usize {
        let mut launched = 0usize;
        for (index, favourite) in favourites.iter().enumerate() {
            if index > 0 {
                pause(self.pacing.batch_spacing);
            }
            if self.test_favourite(favourite) {
                launched += 1;
            } else {
                log::warn!(target: LOG_TARGET, "failed to launch favourite {}", favourite.name);
            }
        }
        launched
    }

    fn open(&self, target: &str) -> bool {
        match self.launcher.open_associated(target) {
            Ok(()) => {
                log::info!(target: LOG_TARGET, "opened {target}");
                true
            }
            Err(error) => {
                log::warn!(target: LOG_TARGET, "open failed for {target}: {error}");
                false
            }
        }
    }
}

fn is_executable(path: &Path) -> bool {
    path.exists()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("exe"))
            .unwrap_or(false)
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
