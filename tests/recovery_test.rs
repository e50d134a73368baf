// tests/recovery_test.rs
// Restart recovery and the heartbeat watchdog.

mod common;

use common::*;
use foreman::config::EngineConfig;
use foreman::dispatch::Dispatcher;
use foreman::engine::FlowEngine;
use foreman::model::RunState;
use foreman::report::NoopReportSink;
use foreman::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn restart_fails_stuck_runs() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("foreman.db").display());
    let store = Store::open(&url).await.unwrap();

    {
        let h = harness(store.clone()).await;
        let flow = h
            .engine
            .register_flow(flow_payload("F", &[("A", 1000), ("B", 1000)]))
            .await
            .unwrap();
        let run_id = h
            .engine
            .trigger_flow(&flow.id, "default", None, None)
            .await
            .unwrap();
        h.engine
            .update_task_state(&run_id, 0, state_update("RUNNING"))
            .await
            .unwrap();
        // The process dies here without completing anything.
    }

    let h2 = harness(store.clone()).await;
    let runs = h2.engine.runs().await;
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.state, RunState::Failed);
    assert!(run.end_time.is_some());
    assert!(run.logs.iter().any(|l| l.message == "server restarted"));
    assert!(
        run.tasks.iter().all(|t| t.state == RunState::Failed),
        "every non-terminal task is failed on recovery"
    );

    // Recovery is idempotent: a third start finds only terminal runs and
    // adds nothing.
    let h3 = harness(store).await;
    let runs = h3.engine.runs().await;
    let restart_logs = runs[0]
        .logs
        .iter()
        .filter(|l| l.message == "server restarted")
        .count();
    assert_eq!(restart_logs, 1);
}

#[tokio::test]
async fn heartbeat_loss_fails_runs_exactly_once() {
    let store = Store::open_in_memory().await.unwrap();
    let config = EngineConfig {
        tick_interval: Duration::from_millis(10),
        liveness_interval: Duration::from_millis(20),
        heartbeat_timeout: Duration::from_millis(60),
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(config.heartbeat_timeout));
    let engine = FlowEngine::start(
        store.clone(),
        dispatcher.clone(),
        Arc::new(NoopReportSink),
        config,
        false,
    )
    .await
    .unwrap();

    let flow = engine
        .register_flow(flow_payload("F", &[("A", 1000)]))
        .await
        .unwrap();
    let run_id = engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();
    engine
        .update_task_state(&run_id, 0, state_update("RUNNING"))
        .await
        .unwrap();

    // One heartbeat, then silence past the timeout.
    dispatcher.heartbeat();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let run = engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Failed);
    let lost_logs = run
        .logs
        .iter()
        .filter(|l| l.message.contains("Lost connection"))
        .count();
    assert_eq!(lost_logs, 1, "the watchdog fires exactly once");

    engine.shutdown();
}

#[tokio::test]
async fn no_heartbeat_ever_means_no_watchdog() {
    let store = Store::open_in_memory().await.unwrap();
    let config = EngineConfig {
        tick_interval: Duration::from_millis(10),
        liveness_interval: Duration::from_millis(20),
        heartbeat_timeout: Duration::from_millis(40),
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(config.heartbeat_timeout));
    let engine = FlowEngine::start(
        store,
        dispatcher,
        Arc::new(NoopReportSink),
        config,
        false,
    )
    .await
    .unwrap();

    let flow = engine
        .register_flow(flow_payload("F", &[("A", 1000)]))
        .await
        .unwrap();
    let run_id = engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();

    // No worker ever connected; the watchdog must not fire.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let run = engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Running);

    engine.shutdown();
}
