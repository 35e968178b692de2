use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{TimeDelta, TimeZone, Utc};
use starter_core::action_executor::{FixedResolver, MockLauncher};
use starter_core::clipboard_access::MemoryClipboard;
use starter_core::clipboard_capture::ServiceState;
use starter_core::clipboard_store::ContentStore;
use starter_core::clock::ManualClock;
use starter_core::config::AppConfig;
use starter_core::core_service::CoreService;
use starter_core::discovery::FixtureProvider;
use starter_core::ipc::InboundRequest;
use starter_core::launch_orchestrator::{LaunchOrchestrator, LaunchPacing};
use starter_core::metrics::{FixedMetrics, SAMPLE_INTERVAL};
use starter_core::model::{Favourite, FavouriteKind};
use starter_core::runtime::{EventLoop, TurnReport};
use starter_core::startup_trigger::{ArmOutcome, LaunchOrigin, StartupSequencer};

struct Fixture {
    event_loop: EventLoop,
    clipboard: MemoryClipboard,
    launcher: MockLauncher,
    metrics: FixedMetrics,
    clock: Arc<ManualClock>,
    dir: PathBuf,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn fixture(label: &str, configure: impl FnOnce(&mut AppConfig, &PathBuf)) -> Fixture {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "starter-runtime-{label}-{}-{unique}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();

    let mut config = AppConfig::in_dir(&dir);
    configure(&mut config, &dir);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
    ));
    let store = ContentStore::open_with_clock(
        &config.history_db_path,
        config.clipboard.retention(),
        clock.clone(),
    )
    .unwrap();
    let clipboard = MemoryClipboard::new();
    let launcher = MockLauncher::new();
    let metrics = FixedMetrics::new();
    let orchestrator = LaunchOrchestrator::new(
        Arc::new(FixedResolver::new()),
        Arc::new(launcher.clone()),
        LaunchPacing::immediate(),
    );
    let service = CoreService::with_parts(
        config,
        store,
        Box::new(clipboard.clone()),
        orchestrator,
        Arc::new(FixtureProvider::deterministic_fixture()),
    )
    .unwrap()
    .with_metrics(metrics.clone());

    Fixture {
        event_loop: EventLoop::with_sequencer(service, StartupSequencer::with_pause(Duration::ZERO)),
        clipboard,
        launcher,
        metrics,
        clock,
        dir,
    }
}

/// Turns the loop until `done` accepts a report or roughly five seconds pass.
fn turn_until(
    event_loop: &mut EventLoop,
    start: Instant,
    mut done: impl FnMut(&TurnReport) -> bool,
) -> Option<TurnReport> {
    for step in 0..1_000u64 {
        let report = event_loop.turn(start + Duration::from_millis(step * 5));
        if done(&report) {
            return Some(report);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn clipboard_present_at_startup_is_not_captured() {
    let mut fx = fixture("baseline", |_, _| {});
    fx.event_loop.service_mut().detector_mut().start_listening();
    fx.clipboard.set_text("copied before launch");

    let t0 = Instant::now();
    assert!(fx.event_loop.turn(t0).stored.is_none());
    assert!(fx.event_loop.turn(t0 + Duration::from_secs(1)).stored.is_none());

    fx.clipboard.set_text("copied while running");
    let t1 = t0 + Duration::from_secs(2);
    assert!(fx.event_loop.turn(t1).stored.is_none());
    let stored = fx.event_loop.turn(t1 + Duration::from_millis(150)).stored;

    assert_eq!(
        stored.map(|item| item.content),
        Some("copied while running".to_string())
    );
    assert_eq!(fx.event_loop.service().store().count().unwrap(), 1);
}

#[test]
fn startup_launch_runs_selected_favourites_on_workers() {
    let mut fx = fixture("startup", |config, dir| {
        let shortcut = dir.join("Notes.lnk");
        std::fs::write(&shortcut, b"lnk").unwrap();
        config.starter_settings.trigger_selected_on_startup = true;
        config.starter_settings.delay_seconds = 1;
        config.favourites.push(
            Favourite::new("Notes", &shortcut.to_string_lossy(), FavouriteKind::App).selected(true),
        );
        config
            .favourites
            .push(Favourite::new("Skipped", "C:/Skipped.lnk", FavouriteKind::App));
    });

    let t0 = Instant::now();
    assert!(matches!(
        fx.event_loop.arm_startup(LaunchOrigin::Startup, t0),
        ArmOutcome::Scheduled { count: 1, .. }
    ));
    assert!(fx.event_loop.turn(t0).launched.is_none());
    assert!(!fx.event_loop.has_background_work());

    let report = turn_until(&mut fx.event_loop, t0 + Duration::from_secs(1), |report| {
        report.launched.is_some()
    })
    .expect("startup launch should finish");

    let outcome = report.launched.unwrap();
    assert_eq!(outcome.name, "Notes");
    assert!(outcome.success);
    assert_eq!(fx.launcher.calls().len(), 1);
    assert!(fx.event_loop.sequencer().is_finished());
    assert_eq!(
        fx.event_loop.arm_startup(LaunchOrigin::Startup, t0),
        ArmOutcome::AlreadyArmed
    );
}

#[test]
fn manual_launch_does_not_arm_the_trigger() {
    let mut fx = fixture("manual", |config, _| {
        config.starter_settings.trigger_selected_on_startup = true;
        config
            .favourites
            .push(Favourite::new("Notes", "C:/Notes.lnk", FavouriteKind::App).selected(true));
    });

    let t0 = Instant::now();
    assert_eq!(
        fx.event_loop.arm_startup(LaunchOrigin::Manual, t0),
        ArmOutcome::NotStartupLaunch
    );
    for step in 0..5 {
        assert!(fx.event_loop.turn(t0 + Duration::from_secs(step * 20)).launched.is_none());
    }
    assert!(fx.launcher.calls().is_empty());
}

#[test]
fn background_scan_loads_installed_apps() {
    let mut fx = fixture("scan", |_, _| {});
    assert!(fx.event_loop.start_scan());
    assert!(!fx.event_loop.start_scan());

    let report = turn_until(&mut fx.event_loop, Instant::now(), |report| {
        report.apps_loaded.is_some()
    })
    .expect("scan should finish");

    assert_eq!(report.apps_loaded, Some(2));
    assert_eq!(fx.event_loop.service().installed_apps().len(), 2);
    assert!(!fx.event_loop.has_background_work());
}

fn send(sender: &Sender<InboundRequest>, payload: &str) -> Receiver<String> {
    let (request, reply) = InboundRequest::new(payload);
    sender.send(request).unwrap();
    reply
}

#[test]
fn requests_reach_the_live_detector() {
    let mut fx = fixture("requests", |_, _| {});
    let sender = fx.event_loop.request_sender();
    fx.event_loop.service_mut().detector_mut().start_listening();
    let t0 = Instant::now();

    let reply = send(&sender, r#"{"kind":"capture_control","payload":{"action":"pause"}}"#);
    assert_eq!(fx.event_loop.turn(t0).requests, 1);
    assert!(reply.try_recv().unwrap().contains(r#""state":"PAUSED""#));
    assert_eq!(fx.event_loop.service().capture_state(), ServiceState::Paused);

    let reply = send(&sender, r#"{"kind":"capture_state"}"#);
    fx.event_loop.turn(t0 + Duration::from_millis(25));
    assert!(reply.try_recv().unwrap().contains(r#""state":"PAUSED""#));

    fx.clipboard.set_text("copied while paused");
    for step in 2..10 {
        assert!(fx.event_loop.turn(t0 + Duration::from_millis(step * 100)).stored.is_none());
    }
    assert_eq!(fx.event_loop.service().store().count().unwrap(), 0);
}

#[test]
fn recopy_through_the_loop_is_not_captured_again() {
    let mut fx = fixture("recopy", |_, _| {});
    let sender = fx.event_loop.request_sender();
    fx.event_loop.service_mut().detector_mut().start_listening();
    let t0 = Instant::now();
    fx.event_loop.turn(t0);

    fx.clipboard.set_text("secret");
    fx.event_loop.turn(t0 + Duration::from_millis(10));
    let item = fx
        .event_loop
        .turn(t0 + Duration::from_millis(160))
        .stored
        .expect("copy should be stored");

    // Past the duplicate window, so only the ignore flag keeps it out.
    fx.clock.advance(TimeDelta::hours(4));
    let reply = send(
        &sender,
        &format!(r#"{{"kind":"clipboard_recopy","payload":{{"id":"{}"}}}}"#, item.id),
    );
    let t1 = t0 + Duration::from_secs(1);
    assert_eq!(fx.event_loop.turn(t1).requests, 1);
    assert!(reply.try_recv().unwrap().starts_with(r#"{"status":"ok""#));
    assert_eq!(fx.clipboard.writes(), vec!["secret"]);
    assert!(!fx.event_loop.service().detector().is_ignoring_next_change());

    for step in 1..5 {
        assert!(fx.event_loop.turn(t1 + Duration::from_millis(step * 100)).stored.is_none());
    }
    assert_eq!(fx.event_loop.service().store().count().unwrap(), 1);
}

#[test]
fn dropped_sender_closes_the_inbox() {
    let mut fx = fixture("inbox-closed", |_, _| {});
    let sender = fx.event_loop.request_sender();
    drop(sender);
    assert_eq!(fx.event_loop.turn(Instant::now()).requests, 0);
    assert_eq!(fx.event_loop.turn(Instant::now()).requests, 0);
}

#[cfg(target_os = "windows")]
#[test]
fn windows_clipboard_smoke_roundtrip() {
    use starter_core::clipboard_access::{system_clipboard, ClipboardAccess};

    if std::env::var("STARTER_WINDOWS_RUNTIME_SMOKE").as_deref() != Ok("1") {
        eprintln!("skipping windows clipboard smoke (set STARTER_WINDOWS_RUNTIME_SMOKE=1 to enable)");
        return;
    }

    let clipboard = system_clipboard();
    let before = clipboard.change_token();
    clipboard
        .write_text("starter smoke")
        .expect("clipboard write should succeed");
    assert_eq!(
        clipboard.read_text().expect("clipboard read should succeed").as_deref(),
        Some("starter smoke")
    );
    assert_ne!(clipboard.change_token(), before);
}

#[test]
fn metrics_are_sampled_on_a_worker_once_per_interval() {
    let mut fx = fixture("metrics", |_, _| {});
    let t0 = Instant::now();
    assert!(fx.event_loop.turn(t0).metrics.is_none());
    assert!(!fx.event_loop.has_background_work());

    fx.event_loop.enable_metrics_sampling(t0);
    let report = turn_until(&mut fx.event_loop, t0, |report| report.metrics.is_some())
        .expect("sample should arrive");
    assert_eq!(report.metrics.map(|snapshot| snapshot.cpu_percent), Some(12.5));
    assert_eq!(fx.metrics.samples_taken(), 1);

    let history = fx.event_loop.service_mut().metrics_history(60).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(fx.metrics.samples_taken(), 1);

    fx.event_loop.turn(t0 + Duration::from_secs(30));
    assert!(!fx.event_loop.has_background_work());

    fx.metrics.set_cpu(80.0);
    let due = t0 + SAMPLE_INTERVAL + Duration::from_secs(6);
    fx.event_loop.turn(due);
    assert!(fx.event_loop.has_background_work());
    let report = turn_until(&mut fx.event_loop, due, |report| report.metrics.is_some())
        .expect("second sample should arrive");
    assert_eq!(report.metrics.map(|snapshot| snapshot.cpu_percent), Some(80.0));
}
