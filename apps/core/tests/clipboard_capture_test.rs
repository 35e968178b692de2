use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{TimeDelta, TimeZone, Utc};
use starter_core::clipboard_access::MemoryClipboard;
use starter_core::clipboard_capture::{
    CaptureEvent, CaptureSettings, ChangeDetector, ChannelObserver, ServiceState,
};
use starter_core::clipboard_store::{ContentStore, RetentionPolicy};
use starter_core::clock::ManualClock;

const DEBOUNCE: Duration = Duration::from_millis(150);

struct Harness {
    detector: ChangeDetector,
    clipboard: MemoryClipboard,
    clock: Arc<ManualClock>,
    db_path: std::path::PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

fn harness(label: &str) -> Harness {
    harness_with(label, CaptureSettings::default())
}

fn harness_with(label: &str, settings: CaptureSettings) -> Harness {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after epoch")
        .as_nanos();
    let db_path = std::env::temp_dir().join(format!(
        "starter-capture-{label}-{}-{unique}.sqlite3",
        std::process::id()
    ));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
    ));
    let store =
        ContentStore::open_with_clock(&db_path, RetentionPolicy::default(), clock.clone()).unwrap();
    let clipboard = MemoryClipboard::new();
    let detector = ChangeDetector::new(store, Box::new(clipboard.clone()), settings);
    Harness {
        detector,
        clipboard,
        clock,
        db_path,
    }
}

impl Harness {
    fn copy(&mut self, text: &str, at: Instant) {
        self.clipboard.set_text(text);
        self.detector.on_clipboard_changed(at);
    }

    fn stored(&self) -> Vec<String> {
        self.detector
            .store()
            .list_recent(100)
            .unwrap()
            .into_iter()
            .map(|item| item.content)
            .collect()
    }
}

#[test]
fn rapid_changes_coalesce_into_the_last_value() {
    let mut h = harness("debounce");
    h.detector.start_listening();
    let t0 = Instant::now();

    h.copy("a", t0);
    h.copy("ab", t0 + Duration::from_millis(50));
    h.copy("abc", t0 + Duration::from_millis(100));

    assert!(h.detector.tick(t0 + Duration::from_millis(200)).is_none());
    let stored = h.detector.tick(t0 + Duration::from_millis(100) + DEBOUNCE);

    assert_eq!(stored.map(|item| item.content), Some("abc".to_string()));
    assert_eq!(h.stored(), vec!["abc"]);
    assert!(!h.detector.has_pending());
}

#[test]
fn duplicates_inside_the_window_are_suppressed() {
    let mut h = harness("dupes");
    h.detector.start_listening();
    let t0 = Instant::now();

    h.copy("X", t0);
    assert!(h.detector.tick(t0 + DEBOUNCE).is_some());

    h.clock.advance(TimeDelta::hours(2));
    let t1 = t0 + Duration::from_secs(1);
    h.copy("X", t1);
    assert!(h.detector.tick(t1 + DEBOUNCE).is_none());
    assert_eq!(h.detector.store().count().unwrap(), 1);

    h.clock.advance(TimeDelta::hours(2));
    let t2 = t1 + Duration::from_secs(1);
    h.copy("X", t2);
    assert!(h.detector.tick(t2 + DEBOUNCE).is_some());
    assert_eq!(h.detector.store().count().unwrap(), 2);
}

#[test]
fn self_initiated_write_is_not_captured() {
    let mut h = harness("ignore");
    h.detector.start_listening();
    let t0 = Instant::now();

    h.detector.recopy("from history").unwrap();
    assert!(h.detector.is_ignoring_next_change());
    h.detector.on_clipboard_changed(t0);
    assert!(!h.detector.is_ignoring_next_change());
    assert!(h.detector.tick(t0 + DEBOUNCE).is_none());
    assert_eq!(h.clipboard.writes(), vec!["from history"]);

    let t1 = t0 + Duration::from_secs(1);
    h.copy("typed by the user", t1);
    assert!(h.detector.tick(t1 + DEBOUNCE).is_some());
    assert_eq!(h.stored(), vec!["typed by the user"]);
}

#[test]
fn failed_recopy_does_not_swallow_the_next_change() {
    let mut h = harness("recopy-fail");
    h.detector.start_listening();
    h.clipboard.fail_writes(true);

    assert!(h.detector.recopy("anything").is_err());
    assert!(!h.detector.is_ignoring_next_change());

    let t0 = Instant::now();
    h.copy("real copy", t0);
    assert!(h.detector.tick(t0 + DEBOUNCE).is_some());
}

#[test]
fn blank_oversized_and_unreadable_content_is_skipped() {
    let settings = CaptureSettings {
        max_chars: 10,
        ..CaptureSettings::default()
    };
    let mut h = harness_with("bounds", settings);
    h.detector.start_listening();
    let t0 = Instant::now();

    h.copy("   \n\t ", t0);
    assert!(!h.detector.has_pending());

    h.copy("this is far longer than ten", t0);
    assert!(!h.detector.has_pending());

    h.clipboard.set_text("ok");
    h.clipboard.fail_reads(true);
    h.detector.on_clipboard_changed(t0);
    assert!(!h.detector.has_pending());

    h.clipboard.fail_reads(false);
    h.copy("  short  ", t0);
    assert!(h.detector.has_pending());
    let stored = h.detector.tick(t0 + DEBOUNCE).unwrap();
    assert_eq!(stored.content, "short");
}

#[test]
fn changes_are_ignored_unless_running() {
    let mut h = harness("states");
    let t0 = Instant::now();

    h.copy("while idle", t0);
    assert!(!h.detector.has_pending());

    h.detector.start_listening();
    h.detector.pause();
    h.copy("while paused", t0);
    assert!(!h.detector.has_pending());

    h.detector.resume();
    h.copy("while running", t0);
    assert!(h.detector.tick(t0 + DEBOUNCE).is_some());
    assert_eq!(h.stored(), vec!["while running"]);
}

#[test]
fn stop_and_pause_cancel_the_pending_item() {
    let mut h = harness("cancel");
    h.detector.start_listening();
    let t0 = Instant::now();

    h.copy("pending", t0);
    assert!(h.detector.next_deadline().is_some());
    assert!(h.detector.pause());
    assert!(h.detector.next_deadline().is_none());
    assert!(h.detector.tick(t0 + DEBOUNCE).is_none());

    h.detector.resume();
    h.copy("pending again", t0);
    assert!(h.detector.stop_listening());
    assert!(h.detector.tick(t0 + DEBOUNCE).is_none());
    assert_eq!(h.detector.store().count().unwrap(), 0);
}

#[test]
fn state_machine_only_takes_legal_transitions() {
    let mut h = harness("transitions");
    let (observer, events) = ChannelObserver::channel();
    h.detector.subscribe(Box::new(observer));

    assert_eq!(h.detector.state(), ServiceState::Idle);
    assert!(!h.detector.pause());
    assert!(!h.detector.resume());
    assert!(!h.detector.stop_listening());

    assert!(h.detector.start_listening());
    assert!(!h.detector.start_listening());
    assert!(!h.detector.resume());
    assert!(h.detector.pause());
    assert!(!h.detector.start_listening());
    assert!(h.detector.resume());
    assert!(h.detector.stop_listening());
    assert_eq!(h.detector.state(), ServiceState::Idle);

    let seen: Vec<CaptureEvent> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            CaptureEvent::StateChanged(ServiceState::Running),
            CaptureEvent::StateChanged(ServiceState::Paused),
            CaptureEvent::StateChanged(ServiceState::Running),
            CaptureEvent::StateChanged(ServiceState::Idle),
        ]
    );
}

#[test]
fn observers_hear_about_stored_items() {
    let mut h = harness("observer");
    let (observer, events) = ChannelObserver::channel();
    h.detector.start_listening();
    h.detector.subscribe(Box::new(observer));
    let t0 = Instant::now();

    h.copy("notify me", t0);
    let stored = h.detector.tick(t0 + DEBOUNCE).unwrap();

    let seen: Vec<CaptureEvent> = events.try_iter().collect();
    assert_eq!(seen, vec![CaptureEvent::ItemAdded(stored)]);
}

#[test]
fn storage_outage_drops_the_capture_and_the_next_one_retries() {
    let mut h = harness("outage");
    h.detector.start_listening();
    let t0 = Instant::now();

    let aside = h.db_path.with_extension("aside");
    std::fs::rename(&h.db_path, &aside).unwrap();
    std::fs::create_dir(&h.db_path).unwrap();

    h.copy("lost while offline", t0);
    assert!(h.detector.tick(t0 + DEBOUNCE).is_none());
    assert_eq!(h.detector.state(), ServiceState::Running);
    assert!(!h.detector.has_pending());

    std::fs::remove_dir(&h.db_path).unwrap();
    std::fs::rename(&aside, &h.db_path).unwrap();

    let t1 = t0 + Duration::from_secs(1);
    h.copy("back online", t1);
    let stored = h.detector.tick(t1 + DEBOUNCE);

    assert_eq!(stored.map(|item| item.content), Some("back online".to_string()));
    assert_eq!(h.stored(), vec!["back online"]);
    assert_eq!(h.detector.state(), ServiceState::Running);
}
