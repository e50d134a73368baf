// tests/common/mod.rs
// Shared setup helpers for engine integration tests.

#![allow(dead_code)]

use foreman::config::EngineConfig;
use foreman::dispatch::Dispatcher;
use foreman::engine::{FlowEngine, RegisterFlowPayload, RegisterTaskPayload, TaskStateUpdate};
use foreman::report::NoopReportSink;
use foreman::store::Store;
use std::sync::Arc;
use std::time::Duration;

pub struct TestHarness {
    pub engine: Arc<FlowEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Store,
}

/// Engine without background loops; tests drive ticks by hand.
pub async fn harness(store: Store) -> TestHarness {
    let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(10)));
    let engine = FlowEngine::load(
        store.clone(),
        dispatcher.clone(),
        Arc::new(NoopReportSink),
        EngineConfig::default(),
        false,
    )
    .await
    .expect("engine should load");
    TestHarness {
        engine,
        dispatcher,
        store,
    }
}

pub async fn memory_harness() -> TestHarness {
    harness(Store::open_in_memory().await.expect("in-memory store")).await
}

pub fn flow_payload(name: &str, tasks: &[(&str, i64)]) -> RegisterFlowPayload {
    RegisterFlowPayload {
        name: name.to_string(),
        description: String::new(),
        tags: Default::default(),
        tasks: tasks
            .iter()
            .map(|(task_name, estimated_ms)| RegisterTaskPayload {
                name: task_name.to_string(),
                description: None,
                estimated_ms: Some(*estimated_ms),
                crucial_pass: None,
            })
            .collect(),
        auto_trigger: false,
        auto_trigger_config: None,
    }
}

pub fn state_update(state: &str) -> TaskStateUpdate {
    TaskStateUpdate {
        state: state.to_string(),
        ..Default::default()
    }
}

pub fn completed(duration_ms: i64) -> TaskStateUpdate {
    TaskStateUpdate {
        state: "COMPLETED".to_string(),
        duration_ms: Some(duration_ms),
        ..Default::default()
    }
}
