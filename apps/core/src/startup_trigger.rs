use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::launch_orchestrator::LaunchOrchestrator;
use crate::model::Favourite;

const LOG_TARGET: &str = "startup";

/// Pause between two launches of the startup batch.
pub const INTER_LAUNCH_PAUSE: Duration = Duration::from_millis(1500);

/// How the process was started. Only an explicit `--startup` launch counts
/// as a login launch; timing is never used to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOrigin {
    Startup,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSettings {
    pub enabled: bool,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Scheduled { count: usize, fire_at: Instant },
    AlreadyArmed,
    NotStartupLaunch,
    TriggerDisabled,
    NothingSelected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub favourite_id: String,
    pub name: String,
    pub success: bool,
}

/// Launches the selected favourites once after a login launch.
///
/// Like the change detector this owns no timers: the event loop asks for
/// the next due favourite with [`StartupSequencer::poll_due`], launches it
/// wherever it likes, then reports back through
/// [`StartupSequencer::complete`].
#[derive(Debug)]
pub struct StartupSequencer {
    armed: bool,
    queue: VecDeque<Favourite>,
    next_launch_at: Option<Instant>,
    in_flight: Option<Favourite>,
    inter_launch_pause: Duration,
    outcomes: Vec<LaunchOutcome>,
}

impl Default for StartupSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupSequencer {
    pub fn new() -> Self {
        Self::with_pause(INTER_LAUNCH_PAUSE)
    }

    pub fn with_pause(inter_launch_pause: Duration) -> Self {
        Self {
            armed: false,
            queue: VecDeque::new(),
            next_launch_at: None,
            in_flight: None,
            inter_launch_pause,
            outcomes: Vec::new(),
        }
    }

    /// Schedules the batch. Only the first qualifying call per sequencer has
    /// any effect, even when nothing ends up selected.
    pub fn arm(
        &mut self,
        origin: LaunchOrigin,
        settings: TriggerSettings,
        favourites: &[Favourite],
        now: Instant,
    ) -> ArmOutcome {
        if self.armed {
            return ArmOutcome::AlreadyArmed;
        }
        if origin != LaunchOrigin::Startup {
            return ArmOutcome::NotStartupLaunch;
        }
        if !settings.enabled {
            log::info!(target: LOG_TARGET, "startup trigger disabled; nothing scheduled");
            return ArmOutcome::TriggerDisabled;
        }
        self.armed = true;

        self.queue = favourites
            .iter()
            .filter(|favourite| favourite.selected)
            .cloned()
            .collect();
        if self.queue.is_empty() {
            log::info!(target: LOG_TARGET, "startup trigger enabled but no favourites selected");
            return ArmOutcome::NothingSelected;
        }

        let fire_at = now + settings.delay;
        self.next_launch_at = Some(fire_at);
        log::info!(
            target: LOG_TARGET,
            "scheduled {} favourites in {}s",
            self.queue.len(),
            settings.delay.as_secs()
        );
        ArmOutcome::Scheduled {
            count: self.queue.len(),
            fire_at,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_finished(&self) -> bool {
        self.armed && self.queue.is_empty() && self.in_flight.is_none()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            return None;
        }
        self.next_launch_at
    }

    /// Hands out the next favourite once its slot has come. Nothing else is
    /// handed out until the current one is completed.
    pub fn poll_due(&mut self, now: Instant) -> Option<Favourite> {
        if self.in_flight.is_some() {
            return None;
        }
        let due = self.next_launch_at?;
        if now < due {
            return None;
        }
        self.next_launch_at = None;

        let favourite = self.queue.pop_front()?;
        log::info!(target: LOG_TARGET, "launching {}", favourite.name);
        self.in_flight = Some(favourite.clone());
        Some(favourite)
    }

    pub fn complete(&mut self, success: bool, now: Instant) -> Option<LaunchOutcome> {
        let favourite = self.in_flight.take()?;
        if success {
            log::info!(target: LOG_TARGET, "launched {}", favourite.name);
        } else {
            log::warn!(target: LOG_TARGET, "failed to launch {}", favourite.name);
        }

        if self.queue.is_empty() {
            let launched = self.outcomes.iter().filter(|o| o.success).count()
                + usize::from(success);
            log::info!(
                target: LOG_TARGET,
                "startup batch finished: {launched} of {} launched",
                self.outcomes.len() + 1
            );
        } else {
            self.next_launch_at = Some(now + self.inter_launch_pause);
        }

        let outcome = LaunchOutcome {
            favourite_id: favourite.id,
            name: favourite.name,
            success,
        };
        self.outcomes.push(outcome.clone());
        Some(outcome)
    }

    /// Launches the due favourite on the calling thread.
    pub fn drive(&mut self, orchestrator: &LaunchOrchestrator, now: Instant) -> Option<LaunchOutcome> {
        let favourite = self.poll_due(now)?;
        let success = orchestrator.test_favourite(&favourite);
        self.complete(success, now)
    }

    pub fn outcomes(&self) -> &[LaunchOutcome] {
        &self.outcomes
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{ArmOutcome, LaunchOrigin, StartupSequencer, TriggerSettings};
    use crate::model::{Favourite, FavouriteKind};

    fn enabled(delay_secs: u64) -> TriggerSettings {
        TriggerSettings {
            enabled: true,
            delay: Duration::from_secs(delay_secs),
        }
    }

    #[test]
    fn manual_launch_never_arms() {
        let mut sequencer = StartupSequencer::new();
        let favourites = vec![Favourite::new("Notes", "C:/notes.lnk", FavouriteKind::App).selected(true)];

        let outcome = sequencer.arm(LaunchOrigin::Manual, enabled(1), &favourites, Instant::now());

        assert_eq!(outcome, ArmOutcome::NotStartupLaunch);
        assert!(!sequencer.is_armed());
    }

    #[test]
    fn empty_selection_still_consumes_the_guard() {
        let mut sequencer = StartupSequencer::new();
        let now = Instant::now();

        assert_eq!(
            sequencer.arm(LaunchOrigin::Startup, enabled(1), &[], now),
            ArmOutcome::NothingSelected
        );
        assert_eq!(
            sequencer.arm(LaunchOrigin::Startup, enabled(1), &[], now),
            ArmOutcome::AlreadyArmed
        );
        assert!(sequencer.is_finished());
    }
}
