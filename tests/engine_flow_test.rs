// tests/engine_flow_test.rs
// Flow lifecycle: registration, triggering, task updates, completion,
// terminal guards, dynamic growth, deletion.

mod common;

use common::*;
use foreman::engine::TaskStateUpdate;
use foreman::error::{EngineError, UpdateOutcome};
use foreman::model::RunState;
use std::time::Duration;

#[tokio::test]
async fn cold_registration_trigger_complete() {
    let h = memory_harness().await;

    let flow = h
        .engine
        .register_flow(flow_payload("F", &[("A", 2000), ("B", 2000)]))
        .await
        .unwrap();
    assert_eq!(flow.tasks[0].weight, 0.5);
    assert_eq!(flow.tasks[1].weight, 0.5);

    let run_id = h
        .engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();

    // Library entries are single-shot: the trigger consumed the definition.
    assert!(h.engine.flows().await.is_empty());

    // The dispatch request is waiting for the worker.
    let req = h
        .dispatcher
        .poll(Duration::from_millis(50))
        .await
        .expect("request should be dispatched");
    assert_eq!(req.run_id, run_id);
    assert_eq!(req.flow_name, "F");
    assert_eq!(req.configuration, "default");

    h.engine
        .update_task_state(&run_id, 0, state_update("RUNNING"))
        .await
        .unwrap();
    h.engine
        .update_task_state(&run_id, 0, completed(1000))
        .await
        .unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Running);
    assert_eq!(run.progress, 50.0, "half the weighted work is earned");

    h.engine
        .update_task_state(&run_id, 1, state_update("RUNNING"))
        .await
        .unwrap();
    h.engine
        .update_task_state(&run_id, 1, completed(1000))
        .await
        .unwrap();
    h.engine.complete_flow(&run_id, 2).await.unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.progress, 100.0);
    assert!(run.end_time.is_some());

    for task_name in ["A", "B"] {
        let stats = h
            .store
            .get_task_stats("F", task_name)
            .await
            .unwrap()
            .expect("first sample folds");
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.avg_ms, 1000.0);
        assert_eq!(stats.m2, 0.0);
    }

    let flow_stats = h
        .store
        .get_flow_stats("F")
        .await
        .unwrap()
        .expect("clean run folds into flow stats");
    assert_eq!(flow_stats.sample_count, 1);

    let learned = h.store.get_learned_structure("F").await.unwrap();
    assert_eq!(
        learned,
        vec![("A".to_string(), 1000), ("B".to_string(), 1000)]
    );
}

#[tokio::test]
async fn register_is_idempotent_on_name() {
    let h = memory_harness().await;
    let first = h
        .engine
        .register_flow(flow_payload("F", &[("A", 1000)]))
        .await
        .unwrap();
    let second = h
        .engine
        .register_flow(flow_payload("F", &[("A", 9999), ("B", 9999)]))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.tasks.len(), 1, "second payload must not replace the first");
    assert_eq!(h.engine.flows().await.len(), 1);
}

#[tokio::test]
async fn learned_structure_seeds_next_run() {
    let h = memory_harness().await;

    let flow = h
        .engine
        .register_flow(flow_payload("F", &[("A", 2000), ("B", 2000)]))
        .await
        .unwrap();
    let run_id = h
        .engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();
    h.engine
        .update_task_state(&run_id, 0, completed(800))
        .await
        .unwrap();
    h.engine
        .update_task_state(&run_id, 1, completed(1200))
        .await
        .unwrap();
    h.engine.complete_flow(&run_id, 2).await.unwrap();

    // Re-register with wildly different estimates; the learned structure
    // from the successful run wins.
    let flow = h
        .engine
        .register_flow(flow_payload("F", &[("A", 5000), ("B", 5000)]))
        .await
        .unwrap();
    let run_id = h
        .engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.tasks[0].estimated_ms, 800);
    assert_eq!(run.tasks[1].estimated_ms, 1200);
    let total: f64 = run.tasks.iter().map(|t| t.weight).sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!((run.tasks[0].weight - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn trigger_unknown_flow_is_not_found() {
    let h = memory_harness().await;
    let err = h
        .engine
        .trigger_flow("no-such-flow", "default", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn stop_then_late_completion_is_ignored() {
    let h = memory_harness().await;
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
    h.engine
        .update_task_state(&run_id, 0, state_update("RUNNING"))
        .await
        .unwrap();

    h.engine.fail_all_running("user stopped").await;

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.tasks[0].state, RunState::Failed);
    assert!(run.logs.iter().any(|l| l.message == "user stopped"));

    // The lagging worker reports completion anyway.
    let outcome = h
        .engine
        .update_task_state(&run_id, 0, completed(900))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Ignored);

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.tasks[0].state, RunState::Failed);
    assert!(
        h.store.get_task_stats("F", "A").await.unwrap().is_none(),
        "ignored update must not touch statistics"
    );
}

#[tokio::test]
async fn completed_slot_ignores_further_updates() {
    let h = memory_harness().await;
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
        .update_task_state(&run_id, 0, completed(1000))
        .await
        .unwrap();
    let outcome = h
        .engine
        .update_task_state(&run_id, 0, completed(2000))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Ignored);

    let stats = h.store.get_task_stats("F", "A").await.unwrap().unwrap();
    assert_eq!(stats.sample_count, 1);
    assert_eq!(stats.avg_ms, 1000.0);
}

#[tokio::test]
async fn stop_leaves_pending_tasks_pending() {
    let h = memory_harness().await;
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

    h.engine.fail_all_running("user stopped").await;

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.tasks[0].state, RunState::Failed, "the running task fails");
    assert_eq!(
        run.tasks[1].state,
        RunState::Pending,
        "never-attempted tasks stay pending"
    );
}

#[tokio::test]
async fn failed_task_fails_the_run() {
    let h = memory_harness().await;
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
        .update_task_state(&run_id, 0, completed(500))
        .await
        .unwrap();
    h.engine
        .update_task_state(&run_id, 1, state_update("FAILED"))
        .await
        .unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert!(run.end_time.is_some());
    assert!(run.progress < 100.0);
}

#[tokio::test]
async fn worker_grows_task_list() {
    let h = memory_harness().await;
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

    let update = TaskStateUpdate {
        state: "RUNNING".to_string(),
        task_name: Some("B".to_string()),
        estimated_ms: Some(500),
        ..Default::default()
    };
    h.engine
        .update_task_state(&run_id, 1, update)
        .await
        .unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.tasks.len(), 2);
    assert_eq!(run.tasks[1].name, "B");
    assert_eq!(run.tasks[1].estimated_ms, 500);
    assert_eq!(run.tasks[1].state, RunState::Running);
    let total: f64 = run.tasks.iter().map(|t| t.weight).sum();
    assert!((total - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn growth_without_task_name_is_an_error() {
    let h = memory_harness().await;
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

    let err = h
        .engine
        .update_task_state(&run_id, 5, state_update("RUNNING"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn skipped_slots_get_identical_placeholders() {
    let h = memory_harness().await;
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

    let update = TaskStateUpdate {
        state: "RUNNING".to_string(),
        task_name: Some("D".to_string()),
        estimated_ms: Some(400),
        ..Default::default()
    };
    h.engine
        .update_task_state(&run_id, 3, update)
        .await
        .unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.tasks.len(), 4);
    assert_eq!(run.tasks[1].name, "D");
    assert_eq!(run.tasks[2].name, "D");
    assert_eq!(run.tasks[3].name, "D");
    assert_ne!(run.tasks[1].id, run.tasks[2].id, "placeholder slots keep fresh ids");
    assert_eq!(run.tasks[1].state, RunState::Pending);
    assert_eq!(run.tasks[3].state, RunState::Running);
}

#[tokio::test]
async fn completion_drops_unvisited_tail() {
    let h = memory_harness().await;
    let flow = h
        .engine
        .register_flow(flow_payload("F", &[("A", 1000), ("B", 1000), ("C", 1000)]))
        .await
        .unwrap();
    let run_id = h
        .engine
        .trigger_flow(&flow.id, "default", None, None)
        .await
        .unwrap();

    h.engine
        .update_task_state(&run_id, 0, completed(500))
        .await
        .unwrap();
    h.engine
        .update_task_state(&run_id, 1, completed(700))
        .await
        .unwrap();
    h.engine.complete_flow(&run_id, 2).await.unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.tasks.len(), 2, "the predicted tail is dropped");
    let total: f64 = run.tasks.iter().map(|t| t.weight).sum();
    assert!((total - 1.0).abs() < 1e-6);

    let learned = h.store.get_learned_structure("F").await.unwrap();
    assert_eq!(learned.len(), 2);
}

#[tokio::test]
async fn completion_with_larger_count_keeps_shape() {
    let h = memory_harness().await;
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
    h.engine
        .update_task_state(&run_id, 0, completed(500))
        .await
        .unwrap();
    h.engine.complete_flow(&run_id, 10).await.unwrap();

    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.tasks.len(), 1);
    assert_eq!(run.state, RunState::Completed);
}

#[tokio::test]
async fn create_run_does_not_dispatch() {
    let h = memory_harness().await;
    let flow = h
        .engine
        .register_flow(flow_payload("F", &[("A", 1000)]))
        .await
        .unwrap();
    h.engine
        .create_run(&flow.id, "default", None, None)
        .await
        .unwrap();
    assert_eq!(h.dispatcher.pending(), 0);
    assert!(h.dispatcher.poll(Duration::from_millis(20)).await.is_none());
}

#[tokio::test]
async fn delete_refuses_active_then_purges_statistics() {
    let h = memory_harness().await;
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

    let err = h.engine.delete_run(&run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    h.engine
        .update_task_state(&run_id, 0, completed(500))
        .await
        .unwrap();
    h.engine.complete_flow(&run_id, 1).await.unwrap();
    assert!(h.store.get_task_stats("F", "A").await.unwrap().is_some());

    h.engine.delete_run(&run_id).await.unwrap();
    assert!(h.engine.runs().await.is_empty());
    assert!(
        h.store.get_task_stats("F", "A").await.unwrap().is_none(),
        "statistics go with the last run of the name"
    );
    assert!(h.store.get_flow_stats("F").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_state_is_a_validation_error() {
    let h = memory_harness().await;
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

    let err = h
        .engine
        .update_task_state(&run_id, 0, state_update("EXPLODED"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn state_parsing_is_case_insensitive() {
    let h = memory_harness().await;
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

    h.engine
        .update_task_state(&run_id, 0, state_update("running"))
        .await
        .unwrap();
    let run = h.engine.run(&run_id).await.unwrap();
    assert_eq!(run.tasks[0].state, RunState::Running);
}

#[tokio::test]
async fn listeners_receive_change_signals() {
    let h = memory_harness().await;
    let mut rx = h.engine.subscribe();

    h.engine
        .register_flow(flow_payload("F", &[("A", 1000)]))
        .await
        .unwrap();
    rx.recv().await.expect("registration should signal listeners");
}
