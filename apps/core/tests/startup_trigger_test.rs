use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use starter_core::action_executor::{FixedResolver, MockLauncher};
use starter_core::launch_orchestrator::{LaunchOrchestrator, LaunchPacing};
use starter_core::model::{Favourite, FavouriteKind};
use starter_core::startup_trigger::{
    ArmOutcome, LaunchOrigin, StartupSequencer, TriggerSettings, INTER_LAUNCH_PAUSE,
};

fn trigger(enabled: bool, delay_secs: u64) -> TriggerSettings {
    TriggerSettings {
        enabled,
        delay: Duration::from_secs(delay_secs),
    }
}

fn favourites() -> Vec<Favourite> {
    vec![
        Favourite::new("Mail", "C:/Mail.lnk", FavouriteKind::App).selected(true),
        Favourite::new("Games", "C:/Games.lnk", FavouriteKind::App),
        Favourite::new("Editor", "C:/Editor.lnk", FavouriteKind::WorkingApp).selected(true),
    ]
}

fn unique_temp_path(label: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "starter-trigger-{label}-{}-{unique}.lnk",
        std::process::id()
    ))
}

#[test]
fn nothing_fires_before_the_configured_delay() {
    let mut sequencer = StartupSequencer::new();
    let t0 = Instant::now();

    let outcome = sequencer.arm(LaunchOrigin::Startup, trigger(true, 5), &favourites(), t0);
    assert_eq!(
        outcome,
        ArmOutcome::Scheduled {
            count: 2,
            fire_at: t0 + Duration::from_secs(5),
        }
    );

    assert!(sequencer.poll_due(t0 + Duration::from_millis(4_999)).is_none());
    let first = sequencer.poll_due(t0 + Duration::from_secs(5)).unwrap();
    assert_eq!(first.name, "Mail");
}

#[test]
fn launches_run_in_order_with_a_pause_between_them() {
    let mut sequencer = StartupSequencer::new();
    let t0 = Instant::now();
    sequencer.arm(LaunchOrigin::Startup, trigger(true, 1), &favourites(), t0);

    let t1 = t0 + Duration::from_secs(1);
    let first = sequencer.poll_due(t1).unwrap();
    assert!(sequencer.poll_due(t1).is_none(), "in-flight launch blocks the next one");
    assert_eq!(sequencer.remaining(), 2);

    let done = t1 + Duration::from_millis(200);
    let outcome = sequencer.complete(true, done).unwrap();
    assert_eq!(outcome.favourite_id, first.id);
    assert_eq!(sequencer.next_deadline(), Some(done + INTER_LAUNCH_PAUSE));

    assert!(sequencer.poll_due(done + Duration::from_millis(1_499)).is_none());
    let second = sequencer.poll_due(done + INTER_LAUNCH_PAUSE).unwrap();
    assert_eq!(second.name, "Editor");

    sequencer.complete(false, done + INTER_LAUNCH_PAUSE);
    assert!(sequencer.is_finished());
    assert_eq!(sequencer.next_deadline(), None);

    let results: Vec<(&str, bool)> = sequencer
        .outcomes()
        .iter()
        .map(|outcome| (outcome.name.as_str(), outcome.success))
        .collect();
    assert_eq!(results, vec![("Mail", true), ("Editor", false)]);
}

#[test]
fn arms_at_most_once() {
    let mut sequencer = StartupSequencer::with_pause(Duration::ZERO);
    let t0 = Instant::now();

    assert!(matches!(
        sequencer.arm(LaunchOrigin::Startup, trigger(true, 1), &favourites(), t0),
        ArmOutcome::Scheduled { count: 2, .. }
    ));
    assert_eq!(
        sequencer.arm(LaunchOrigin::Startup, trigger(true, 1), &favourites(), t0),
        ArmOutcome::AlreadyArmed
    );
    assert_eq!(sequencer.remaining(), 2);
}

#[test]
fn disabled_trigger_or_manual_launch_schedules_nothing() {
    let t0 = Instant::now();

    let mut disabled = StartupSequencer::new();
    assert_eq!(
        disabled.arm(LaunchOrigin::Startup, trigger(false, 1), &favourites(), t0),
        ArmOutcome::TriggerDisabled
    );
    assert!(disabled.poll_due(t0 + Duration::from_secs(60)).is_none());

    let mut manual = StartupSequencer::new();
    assert_eq!(
        manual.arm(LaunchOrigin::Manual, trigger(true, 1), &favourites(), t0),
        ArmOutcome::NotStartupLaunch
    );
    assert!(manual.next_deadline().is_none());
}

#[test]
fn completing_without_a_launch_is_a_no_op() {
    let mut sequencer = StartupSequencer::new();
    assert!(sequencer.complete(true, Instant::now()).is_none());
    assert!(sequencer.outcomes().is_empty());
}

#[test]
fn drive_launches_through_the_orchestrator() {
    let shortcut = unique_temp_path("drive");
    fs::write(&shortcut, b"stub").expect("should create temp file");
    let launcher = MockLauncher::new();
    let orchestrator = LaunchOrchestrator::new(
        Arc::new(FixedResolver::new()),
        Arc::new(launcher.clone()),
        LaunchPacing::immediate(),
    );
    let favourites =
        vec![Favourite::new("Notes", &shortcut.to_string_lossy(), FavouriteKind::App).selected(true)];

    let mut sequencer = StartupSequencer::new();
    let t0 = Instant::now();
    sequencer.arm(LaunchOrigin::Startup, trigger(true, 2), &favourites, t0);

    assert!(sequencer.drive(&orchestrator, t0).is_none());
    assert!(launcher.calls().is_empty());

    let outcome = sequencer.drive(&orchestrator, t0 + Duration::from_secs(2)).unwrap();
    assert!(outcome.success);
    assert_eq!(launcher.calls().len(), 1);
    assert!(sequencer.is_finished());

    fs::remove_file(&shortcut).expect("should clean temp file");
}
