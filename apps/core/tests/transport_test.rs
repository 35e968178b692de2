use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use starter_core::action_executor::{FixedResolver, MockLauncher};
use starter_core::clipboard_access::MemoryClipboard;
use starter_core::clipboard_store::ContentStore;
use starter_core::config::AppConfig;
use starter_core::contract::{
    CoreRequest, CoreResponse, IdRequest, LimitRequest, LinkRequest, StarterSettingsRequest,
};
use starter_core::core_service::CoreService;
use starter_core::discovery::FixtureProvider;
use starter_core::launch_orchestrator::{LaunchOrchestrator, LaunchPacing};
use starter_core::transport::{handle_json, handle_request, ErrorCode, TransportResponse};

fn seeded_service(label: &str) -> (CoreService, PathBuf) {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "starter-transport-{label}-{}-{unique}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();

    let config = AppConfig::in_dir(&dir);
    let store = ContentStore::open(&config.history_db_path, config.clipboard.retention()).unwrap();
    store.add("seed snippet").unwrap();
    let orchestrator = LaunchOrchestrator::new(
        Arc::new(FixedResolver::new()),
        Arc::new(MockLauncher::new()),
        LaunchPacing::immediate(),
    );
    let service = CoreService::with_parts(
        config,
        store,
        Box::new(MemoryClipboard::new()),
        orchestrator,
        Arc::new(FixtureProvider::deterministic_fixture()),
    )
    .unwrap();
    (service, dir)
}

fn error_code(raw: &str) -> ErrorCode {
    let parsed: TransportResponse = serde_json::from_str(raw).unwrap();
    match parsed {
        TransportResponse::Err { error } => error.code,
        _ => panic!("expected error response, got {raw}"),
    }
}

#[test]
fn request_handler_returns_ok_transport_response() {
    let (mut service, dir) = seeded_service("ok");

    let response = handle_request(
        &mut service,
        CoreRequest::ClipboardRecent(LimitRequest { limit: Some(5) }),
    );

    match response {
        TransportResponse::Ok {
            response: CoreResponse::ClipboardItems(payload),
        } => {
            assert_eq!(payload.items.len(), 1);
            assert_eq!(payload.items[0].content, "seed snippet");
            let encoded = serde_json::to_string(&TransportResponse::Ok {
                response: CoreResponse::ClipboardItems(payload),
            })
            .unwrap();
            assert!(encoded.contains("\"status\":\"ok\""));
        }
        _ => panic!("expected clipboard items response"),
    }

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn json_handler_returns_invalid_json_error_code() {
    let (mut service, dir) = seeded_service("invalid-json");
    assert_eq!(error_code(&handle_json(&mut service, "{not-json")), ErrorCode::InvalidJson);
    assert_eq!(
        error_code(&handle_json(&mut service, r#"{"kind":"no_such_command"}"#)),
        ErrorCode::InvalidJson
    );
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn json_handler_returns_item_not_found_error_code() {
    let (mut service, dir) = seeded_service("not-found");
    let request = CoreRequest::ClipboardGet(IdRequest {
        id: "missing".into(),
    });

    let raw = handle_json(&mut service, &serde_json::to_string(&request).unwrap());
    assert_eq!(error_code(&raw), ErrorCode::ItemNotFound);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn json_handler_returns_invalid_request_error_code() {
    let (mut service, dir) = seeded_service("invalid-request");
    let request = CoreRequest::StarterSettingsUpdate(StarterSettingsRequest {
        trigger_selected_on_startup: None,
        delay_seconds: Some(0),
    });

    let raw = handle_json(&mut service, &serde_json::to_string(&request).unwrap());
    assert_eq!(error_code(&raw), ErrorCode::InvalidRequest);

    let link = CoreRequest::FavouriteAddLink(LinkRequest {
        id: "missing".into(),
        url: "not a url".into(),
    });
    let raw = handle_json(&mut service, &serde_json::to_string(&link).unwrap());
    assert_eq!(error_code(&raw), ErrorCode::InvalidRequest);
    std::fs::remove_dir_all(dir).unwrap();
}

#[cfg(not(target_os = "windows"))]
#[test]
fn startup_entries_report_startup_error_off_windows() {
    let (mut service, dir) = seeded_service("startup");
    let raw = handle_json(&mut service, r#"{"kind":"startup_entries"}"#);
    assert_eq!(error_code(&raw), ErrorCode::Startup);
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn delete_of_missing_item_is_acknowledged_unchanged() {
    let (mut service, dir) = seeded_service("delete");
    let raw = handle_json(
        &mut service,
        r#"{"kind":"clipboard_delete","payload":{"id":"missing"}}"#,
    );
    assert!(raw.contains("\"status\":\"ok\""));
    assert!(raw.contains("\"changed\":false"));
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn startup_remove_rejects_unknown_sources() {
    let (mut service, dir) = seeded_service("startup-remove");
    let raw = handle_json(
        &mut service,
        r#"{"kind":"startup_remove","payload":{"name":"Tray","source":"run_once"}}"#,
    );
    assert_eq!(error_code(&raw), ErrorCode::InvalidRequest);
    std::fs::remove_dir_all(dir).unwrap();
}

#[cfg(not(target_os = "windows"))]
#[test]
fn startup_remove_of_a_scheduled_task_is_a_startup_error_off_windows() {
    let (mut service, dir) = seeded_service("startup-task");
    let raw = handle_json(
        &mut service,
        r#"{"kind":"startup_remove","payload":{"name":"Vendor\\Tray","source":"task_scheduler"}}"#,
    );
    assert_eq!(error_code(&raw), ErrorCode::Startup);
    std::fs::remove_dir_all(dir).unwrap();
}
