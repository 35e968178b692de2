pub mod action_executor;
pub mod clipboard_access;
pub mod clipboard_capture;
pub mod clipboard_store;
pub mod clock;
pub mod config;
pub mod contract;
pub mod core_service;
pub mod discovery;
pub mod ipc;
pub mod launch_orchestrator;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod runtime;
pub mod search;
pub mod settings;
pub mod startup;
pub mod startup_trigger;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod tests {
    mod query_latency_test {
        include!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../tests/perf/query_latency_test.rs"
        ));
    }
}
