// tests/supervisor_test.rs
// Worker subprocess supervision: spawn, output capture, reaping, stop.

mod common;

use common::*;
use foreman::model::RunState;
use foreman::worker::{ClientStatus, WorkerSupervisor};
use std::time::Duration;
use tempfile::TempDir;

fn write_clients(dir: &TempDir, command: &str, args: &[&str]) -> std::path::PathBuf {
    let path = dir.path().join("clients.json");
    let config = serde_json::json!([{
        "id": "bench",
        "name": "Bench rig",
        "workingDir": dir.path().to_string_lossy(),
        "command": command,
        "args": args,
    }]);
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

async fn wait_for_status(sup: &WorkerSupervisor, wanted: ClientStatus) -> bool {
    for _ in 0..100 {
        if sup.status().status == wanted {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn start_captures_output_and_reaps_exit() {
    let h = memory_harness().await;
    let dir = TempDir::new().unwrap();
    let path = write_clients(&dir, "sh", &["-c", "echo hello from worker"]);

    let sup = WorkerSupervisor::new(&path, h.engine.clone());
    sup.start("bench").await.unwrap();

    assert!(
        wait_for_status(&sup, ClientStatus::Stopped).await,
        "short-lived client should be reaped"
    );
    let status = sup.status();
    assert!(status.logs.iter().any(|l| l.contains("hello from worker")));
    assert!(status.logs.iter().any(|l| l.contains("client exited")));
}

#[tokio::test]
async fn unknown_client_id_is_an_error() {
    let h = memory_harness().await;
    let dir = TempDir::new().unwrap();
    let path = write_clients(&dir, "sh", &["-c", "true"]);

    let sup = WorkerSupervisor::new(&path, h.engine.clone());
    assert!(sup.start("nope").await.is_err());
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let h = memory_harness().await;
    let dir = TempDir::new().unwrap();
    let path = write_clients(&dir, "sh", &["-c", "sleep 5"]);

    let sup = WorkerSupervisor::new(&path, h.engine.clone());
    sup.start("bench").await.unwrap();
    assert!(sup.start("bench").await.is_err());

    sup.stop().await;
    assert!(wait_for_status(&sup, ClientStatus::Stopped).await);
}

#[tokio::test]
async fn stop_fails_inflight_runs_and_clears_active() {
    let h = memory_harness().await;
    let dir = TempDir::new().unwrap();
    let path = write_clients(&dir, "sh", &["-c", "sleep 5"]);

    let flow = h
        .engine
        .register_flow(flow_payload("F", &[("A", 1000)]))
        .await
        .unwrap();
    let run_id = h
        .engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();

    let sup = WorkerSupervisor::new(&path, h.engine.clone());
    sup.start("bench").await.unwrap();
    sup.stop().await;

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert!(run.logs.iter().any(|l| l.message == "user stopped"));
    assert!(sup.status().active_client.is_none());
}
