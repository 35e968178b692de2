use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use starter_core::action_executor::{FixedResolver, LaunchCall, MockLauncher};
use starter_core::launch_orchestrator::{LaunchOrchestrator, LaunchPacing};
use starter_core::model::{Favourite, FavouriteKind};

fn unique_temp_path(label: &str, extension: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "starter-{label}-{}-{unique}.{extension}",
        std::process::id()
    ))
}

fn touch(label: &str, extension: &str) -> PathBuf {
    let path = unique_temp_path(label, extension);
    fs::write(&path, b"stub").expect("should create temp file");
    path
}

fn orchestrator(resolver: FixedResolver, launcher: &MockLauncher) -> LaunchOrchestrator {
    LaunchOrchestrator::new(
        Arc::new(resolver),
        Arc::new(launcher.clone()),
        LaunchPacing::immediate(),
    )
}

fn open_call(target: &str) -> LaunchCall {
    LaunchCall::Open {
        target: target.to_string(),
    }
}

#[test]
fn existing_shortcut_launches_unelevated_first() {
    let shortcut = touch("notes", "lnk");
    let launcher = MockLauncher::new();

    let launched = orchestrator(FixedResolver::new(), &launcher)
        .launch_app(&shortcut.to_string_lossy());

    assert!(launched);
    assert_eq!(
        launcher.calls(),
        vec![LaunchCall::Unelevated {
            target: shortcut.clone(),
            args: Vec::new(),
        }]
    );
    fs::remove_file(&shortcut).expect("should clean temp file");
}

#[test]
fn missing_shortcut_falls_back_to_resolved_target() {
    let shortcut = unique_temp_path("gone", "lnk");
    let target = touch("gone-target", "exe");
    let launcher = MockLauncher::new();
    let resolver = FixedResolver::new().with_target(&shortcut, &target);

    assert!(orchestrator(resolver, &launcher).launch_app(&shortcut.to_string_lossy()));
    assert_eq!(
        launcher.calls(),
        vec![LaunchCall::Unelevated {
            target: target.clone(),
            args: Vec::new(),
        }]
    );
    fs::remove_file(&target).expect("should clean temp file");
}

#[test]
fn failed_unelevated_launch_tries_the_shell_association() {
    let shortcut = touch("assoc", "lnk");
    let shortcut_text = shortcut.to_string_lossy().to_string();
    let launcher = MockLauncher::new();
    launcher.fail_all_unelevated(true);

    assert!(orchestrator(FixedResolver::new(), &launcher).launch_app(&shortcut_text));
    assert_eq!(launcher.calls().len(), 2);
    assert_eq!(launcher.calls()[1], open_call(&shortcut_text));
    fs::remove_file(&shortcut).expect("should clean temp file");
}

#[test]
fn last_resort_opens_the_shortcut_target() {
    let shortcut = touch("last-resort", "lnk");
    let shortcut_text = shortcut.to_string_lossy().to_string();
    let target = touch("last-resort-target", "exe");
    let target_text = target.to_string_lossy().to_string();
    let launcher = MockLauncher::new();
    launcher.fail_all_unelevated(true);
    launcher.fail_open_for(&shortcut_text);
    let resolver = FixedResolver::new().with_target(&shortcut, &target);

    assert!(orchestrator(resolver, &launcher).launch_app(&shortcut_text));
    assert_eq!(
        launcher.calls(),
        vec![
            LaunchCall::Unelevated {
                target: shortcut.clone(),
                args: Vec::new(),
            },
            open_call(&shortcut_text),
            open_call(&target_text),
        ]
    );
    fs::remove_file(&shortcut).expect("should clean temp file");
    fs::remove_file(&target).expect("should clean temp file");
}

#[test]
fn every_mechanism_failing_reports_false() {
    let shortcut = unique_temp_path("hopeless", "lnk");
    let launcher = MockLauncher::new();
    launcher.fail_all_unelevated(true);
    launcher.fail_all_open(true);

    assert!(!orchestrator(FixedResolver::new(), &launcher).launch_app(&shortcut.to_string_lossy()));
    assert_eq!(launcher.calls().len(), 2);
}

#[test]
fn empty_path_makes_no_calls() {
    let launcher = MockLauncher::new();
    assert!(!orchestrator(FixedResolver::new(), &launcher).launch_app("   "));
    assert!(launcher.calls().is_empty());
}

#[test]
fn browser_executable_gets_first_url_then_the_rest_open_as_tabs() {
    let shortcut = touch("chrome", "lnk");
    let browser = touch("chrome", "exe");
    let launcher = MockLauncher::new();
    let resolver = FixedResolver::new().with_target(&shortcut, &browser);
    let urls = vec![
        "https://a.example".to_string(),
        "https://b.example".to_string(),
        "https://c.example".to_string(),
    ];

    assert!(orchestrator(resolver, &launcher).launch_browser_urls(&shortcut.to_string_lossy(), &urls));
    assert_eq!(
        launcher.calls(),
        vec![
            LaunchCall::Unelevated {
                target: browser.clone(),
                args: vec!["https://a.example".to_string()],
            },
            open_call("https://b.example"),
            open_call("https://c.example"),
        ]
    );
    fs::remove_file(&shortcut).expect("should clean temp file");
    fs::remove_file(&browser).expect("should clean temp file");
}

#[test]
fn browser_without_executable_opens_shortcut_then_urls() {
    let shortcut = touch("edge", "lnk");
    let shortcut_text = shortcut.to_string_lossy().to_string();
    let launcher = MockLauncher::new();
    let urls = vec!["https://a.example".to_string(), "https://b.example".to_string()];

    assert!(orchestrator(FixedResolver::new(), &launcher).launch_browser_urls(&shortcut_text, &urls));
    assert_eq!(
        launcher.calls(),
        vec![
            open_call(&shortcut_text),
            open_call("https://a.example"),
            open_call("https://b.example"),
        ]
    );
    fs::remove_file(&shortcut).expect("should clean temp file");
}

#[test]
fn browser_with_no_urls_does_nothing() {
    let launcher = MockLauncher::new();
    assert!(!orchestrator(FixedResolver::new(), &launcher).launch_browser_urls("C:/chrome.lnk", &[]));
    assert!(launcher.calls().is_empty());
}

#[test]
fn browser_favourite_without_links_launches_like_an_app() {
    let shortcut = touch("bare-browser", "lnk");
    let launcher = MockLauncher::new();
    let favourite = Favourite::new("Firefox", &shortcut.to_string_lossy(), FavouriteKind::Browser);

    assert!(orchestrator(FixedResolver::new(), &launcher).test_favourite(&favourite));
    assert!(matches!(launcher.calls()[0], LaunchCall::Unelevated { .. }));
    fs::remove_file(&shortcut).expect("should clean temp file");
}

#[test]
fn launch_selected_counts_only_successes() {
    let working = touch("working", "lnk");
    let broken = touch("broken", "lnk");
    let broken_text = broken.to_string_lossy().to_string();
    let launcher = MockLauncher::new();
    launcher.fail_unelevated_for(&broken);
    launcher.fail_open_for(&broken_text);

    let favourites = vec![
        Favourite::new("Working", &working.to_string_lossy(), FavouriteKind::App),
        Favourite::new("Broken", &broken_text, FavouriteKind::WorkingApp),
    ];

    assert_eq!(
        orchestrator(FixedResolver::new(), &launcher).launch_selected(&favourites),
        1
    );
    fs::remove_file(&working).expect("should clean temp file");
    fs::remove_file(&broken).expect("should clean temp file");
}
