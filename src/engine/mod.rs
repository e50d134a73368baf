// src/engine/mod.rs
// The flow/run state machine. One engine value is constructed at startup and
// injected into handlers; every mutating operation takes the exclusive guard
// for one logical operation, writes through to the store, releases, then
// signals listeners.

pub mod progress;
mod ticker;

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, EngineResult, UpdateOutcome};
use crate::model::{
    ExecutionRequest, FlowDefinition, FlowRun, LogEntry, PerformanceWarning, RunState, StatRecord,
    TaskDefinition, TaskResult, TaskRun,
};
use crate::report::ReportSink;
use crate::stats::{self, Sensitivity};
use crate::store::Store;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use progress::{recompute_weights, weighted_progress, weights_from_estimates};

/// Registration payload sent by a worker (or the UI).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFlowPayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub tasks: Vec<RegisterTaskPayload>,
    #[serde(default)]
    pub auto_trigger: bool,
    #[serde(default)]
    pub auto_trigger_config: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTaskPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "estimatedTime")]
    pub estimated_ms: Option<i64>,
    #[serde(default)]
    pub crucial_pass: Option<bool>,
}

/// A single task-state update from the worker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStateUpdate {
    pub state: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default, rename = "estimatedTime")]
    pub estimated_ms: Option<i64>,
    #[serde(default)]
    pub crucial_pass: Option<bool>,
}

struct EngineInner {
    /// Registered definitions, single-shot: consumed when triggered.
    flows: Vec<FlowDefinition>,
    /// Runs, newest first.
    runs: Vec<FlowRun>,
    sensitivity: Sensitivity,
}

pub struct FlowEngine {
    inner: RwLock<EngineInner>,
    store: Store,
    dispatcher: Arc<Dispatcher>,
    reports: Arc<dyn ReportSink>,
    changes: broadcast::Sender<()>,
    shutdown: watch::Sender<bool>,
    config: EngineConfig,
    simulate: bool,
}

impl FlowEngine {
    /// Load persisted state, fail any run a dead process left in flight, and
    /// start the background loops. Store errors here abort startup.
    pub async fn start(
        store: Store,
        dispatcher: Arc<Dispatcher>,
        reports: Arc<dyn ReportSink>,
        config: EngineConfig,
        simulate: bool,
    ) -> anyhow::Result<Arc<Self>> {
        let engine = Self::load(store, dispatcher, reports, config, simulate).await?;
        ticker::spawn(engine.clone());
        Ok(engine)
    }

    /// Same as `start` but without background loops. Tests drive the tick and
    /// watchdog by hand.
    pub async fn load(
        store: Store,
        dispatcher: Arc<Dispatcher>,
        reports: Arc<dyn ReportSink>,
        config: EngineConfig,
        simulate: bool,
    ) -> anyhow::Result<Arc<Self>> {
        let flows = store.load_all_flows().await?;
        let runs = store.load_all_runs().await?;
        info!("Loaded {} flows and {} runs", flows.len(), runs.len());

        let (changes, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);
        let sensitivity = config.sensitivity;

        let engine = Arc::new(Self {
            inner: RwLock::new(EngineInner {
                flows,
                runs,
                sensitivity,
            }),
            store,
            dispatcher,
            reports,
            changes,
            shutdown,
            config,
            simulate,
        });

        engine.recover_stuck_runs().await;
        Ok(engine)
    }

    /// Stop the background loops.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn simulate(&self) -> bool {
        self.simulate
    }

    /// State-change fan-out. Every mutation ends with one zero-byte signal,
    /// sent after the guard is released.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        let _ = self.changes.send(());
    }

    /// Slow-outlier sensitivity, normally set from the active client config.
    pub async fn set_sensitivity(&self, sensitivity: Sensitivity) {
        self.inner.write().await.sensitivity = sensitivity;
    }

    // === Snapshots ===

    pub async fn flows(&self) -> Vec<FlowDefinition> {
        self.inner.read().await.flows.clone()
    }

    /// Deep snapshots, newest start first.
    pub async fn runs(&self) -> Vec<FlowRun> {
        let mut runs = self.inner.read().await.runs.clone();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        runs
    }

    pub async fn run(&self, run_id: &str) -> Option<FlowRun> {
        self.inner
            .read()
            .await
            .runs
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
    }

    // === Lifecycle recovery ===

    /// Any run still Pending/Running at load time belonged to a process that
    /// died. Fail it forward so no non-terminal run exists in memory unless
    /// the current process owns it.
    async fn recover_stuck_runs(&self) {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut recovered = 0usize;

        for run in inner.runs.iter_mut() {
            if run.state.is_terminal() {
                continue;
            }
            run.state = RunState::Failed;
            run.end_time = Some(now);
            run.logs.push(LogEntry::now("server restarted"));
            for task in run.tasks.iter_mut() {
                if !task.state.is_terminal() {
                    task.state = RunState::Failed;
                    task.end_time = Some(now);
                }
            }
            run.progress = weighted_progress(&run.tasks).min(99.0);
            Self::attach_report(&*self.reports, run).await;
            self.persist_run(run).await;
            recovered += 1;
        }
        drop(inner);

        if recovered > 0 {
            warn!("Failed {} stuck run(s) from a previous process", recovered);
            self.notify();
        }
    }

    // === Flow registration ===

    /// Register a flow definition. Idempotent on name: a second registration
    /// returns the live definition untouched. Estimates come from statistics
    /// once two samples exist, otherwise from the payload.
    pub async fn register_flow(
        &self,
        payload: RegisterFlowPayload,
    ) -> EngineResult<FlowDefinition> {
        if payload.name.trim().is_empty() {
            return Err(EngineError::validation("flow name must not be empty"));
        }

        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.flows.iter().find(|f| f.name == payload.name) {
            debug!("Flow '{}' already registered, returning it", payload.name);
            return Ok(existing.clone());
        }

        let known_stats = self
            .store
            .get_flow_task_stats(&payload.name)
            .await
            .unwrap_or_default();

        let mut tasks: Vec<TaskDefinition> = payload
            .tasks
            .iter()
            .map(|t| {
                let estimated_ms = match known_stats.get(&t.name) {
                    Some(s) if s.sample_count >= 2 => s.avg_ms.round() as i64,
                    _ => t.estimated_ms.unwrap_or(self.config.default_estimate_ms),
                }
                .max(1);
                TaskDefinition {
                    id: Uuid::new_v4().to_string(),
                    name: t.name.clone(),
                    estimated_ms,
                    weight: 0.0,
                    crucial_pass: t.crucial_pass.unwrap_or(false),
                }
            })
            .collect();

        let estimates: Vec<i64> = tasks.iter().map(|t| t.estimated_ms).collect();
        for (task, w) in tasks.iter_mut().zip(weights_from_estimates(&estimates)) {
            task.weight = w;
        }

        let def = FlowDefinition {
            id: Uuid::new_v4().to_string(),
            name: payload.name,
            description: payload.description,
            tags: payload.tags,
            tasks,
            created_at: Utc::now(),
        };

        inner.flows.push(def.clone());
        if let Err(e) = self.store.save_flow(&def).await {
            warn!("Failed to persist flow '{}': {}", def.name, e);
            crate::metrics::record_persistence_failure("flow");
        }
        drop(inner);

        info!("Registered flow '{}' ({} tasks)", def.name, def.tasks.len());
        self.notify();
        Ok(def)
    }

    // === Triggering ===

    /// Materialize a run and hand its execution request to the worker channel.
    pub async fn trigger_flow(
        &self,
        flow_id: &str,
        configuration: &str,
        client_color: Option<String>,
        client_name: Option<String>,
    ) -> EngineResult<String> {
        let (run_id, request) = self
            .construct_run(flow_id, configuration, client_color, client_name)
            .await?;
        self.dispatcher.enqueue(request);
        Ok(run_id)
    }

    /// Materialize a run without dispatching; used when the worker initiates
    /// the run itself.
    pub async fn create_run(
        &self,
        flow_id: &str,
        configuration: &str,
        client_color: Option<String>,
        client_name: Option<String>,
    ) -> EngineResult<String> {
        let (run_id, _) = self
            .construct_run(flow_id, configuration, client_color, client_name)
            .await?;
        Ok(run_id)
    }

    async fn construct_run(
        &self,
        flow_id: &str,
        configuration: &str,
        client_color: Option<String>,
        client_name: Option<String>,
    ) -> EngineResult<(String, ExecutionRequest)> {
        let mut inner = self.inner.write().await;
        let idx = inner
            .flows
            .iter()
            .position(|f| f.id == flow_id)
            .ok_or_else(|| EngineError::not_found(format!("flow {}", flow_id)))?;
        let def = inner.flows[idx].clone();

        let learned = self
            .store
            .get_learned_structure(&def.name)
            .await
            .unwrap_or_default();
        let known_stats = self
            .store
            .get_flow_task_stats(&def.name)
            .await
            .unwrap_or_default();

        // Learned structure wins over the registration's task list; either
        // way estimates are refreshed from current statistics.
        let blueprint: Vec<(String, i64, bool)> = if !learned.is_empty() {
            learned
                .into_iter()
                .map(|(name, est)| {
                    let crucial = def
                        .tasks
                        .iter()
                        .find(|t| t.name == name)
                        .map(|t| t.crucial_pass)
                        .unwrap_or(false);
                    (name, est, crucial)
                })
                .collect()
        } else {
            def.tasks
                .iter()
                .map(|t| (t.name.clone(), t.estimated_ms, t.crucial_pass))
                .collect()
        };

        let mut tasks: Vec<TaskRun> = blueprint
            .into_iter()
            .map(|(name, est, crucial)| {
                let estimated_ms = match known_stats.get(&name) {
                    Some(s) if s.sample_count >= 2 => s.avg_ms.round() as i64,
                    _ => est,
                }
                .max(1);
                TaskRun::pending(name, estimated_ms, crucial)
            })
            .collect();
        recompute_weights(&mut tasks);

        let run = FlowRun {
            id: Uuid::new_v4().to_string(),
            flow_id: def.id.clone(),
            flow_name: def.name.clone(),
            state: RunState::Running,
            start_time: Utc::now(),
            end_time: None,
            configuration: configuration.to_string(),
            tags: def.tags.clone(),
            tasks,
            progress: 0.0,
            client_color,
            client_name,
            report_path: None,
            logs: Vec::new(),
        };
        let run_id = run.id.clone();

        inner.runs.insert(0, run);
        self.persist_run(&inner.runs[0]).await;

        // Library entries are single-shot: the trigger consumes the
        // definition, re-registration is required to trigger again.
        inner.flows.remove(idx);
        if let Err(e) = self.store.delete_flow(&def.id).await {
            warn!("Failed to delete consumed flow '{}': {}", def.name, e);
            crate::metrics::record_persistence_failure("flow");
        }
        drop(inner);

        info!("Run {} created for flow '{}'", run_id, def.name);
        self.notify();
        Ok((
            run_id.clone(),
            ExecutionRequest {
                run_id,
                flow_name: def.name,
                configuration: configuration.to_string(),
            },
        ))
    }

    // === Task state updates ===

    /// Apply one worker update to a task slot. Returns `Ignored` when the
    /// slot (or the whole run) is already terminal.
    pub async fn update_task_state(
        &self,
        run_id: &str,
        task_index: usize,
        mut update: TaskStateUpdate,
    ) -> EngineResult<UpdateOutcome> {
        let new_state = RunState::parse(&update.state)
            .ok_or_else(|| EngineError::validation(format!("unknown state '{}'", update.state)))?;

        let mut inner = self.inner.write().await;
        let sensitivity = inner.sensitivity;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| EngineError::not_found(format!("run {}", run_id)))?;

        if run.state.is_terminal() {
            debug!("Update for terminal run {} ignored", run_id);
            return Ok(UpdateOutcome::Ignored);
        }
        let flow_name = run.flow_name.clone();

        // A worker may report a task index past the known list; grow it, but
        // only when the update names the task.
        if task_index >= run.tasks.len() {
            let name = update.task_name.clone().ok_or_else(|| {
                EngineError::not_found(format!("run {} has no task {}", run_id, task_index))
            })?;
            let known = self
                .store
                .get_task_stats(&flow_name, &name)
                .await
                .unwrap_or_default();
            let estimated_ms = match known {
                Some(s) if s.sample_count >= 2 => s.avg_ms.round() as i64,
                _ => update
                    .estimated_ms
                    .unwrap_or(self.config.default_estimate_ms),
            }
            .max(1);
            let crucial = update.crucial_pass.unwrap_or(false);
            // Intermediate slots the worker skipped get the same placeholder
            // attributes as the reported task.
            while run.tasks.len() <= task_index {
                run.tasks.push(TaskRun::pending(name.clone(), estimated_ms, crucial));
            }
            recompute_weights(&mut run.tasks);
        }

        if let Some(name) = &update.task_name {
            if run.tasks[task_index].name != *name {
                run.tasks[task_index].name = name.clone();
            }
        }

        if run.tasks[task_index].state.is_terminal() {
            debug!(
                "Update for terminal task {}[{}] ignored",
                run_id, task_index
            );
            return Ok(UpdateOutcome::Ignored);
        }

        let task_name = run.tasks[task_index].name.clone();
        let known_stats = self
            .store
            .get_task_stats(&flow_name, &task_name)
            .await
            .unwrap_or_default();

        let now = Utc::now();
        let mut fold_duration: Option<i64> = None;
        {
            let slot = &mut run.tasks[task_index];
            if let Some(crucial) = update.crucial_pass {
                slot.crucial_pass = crucial;
            }
            if let Some(result) = update.result.take() {
                slot.result = Some(result);
            }

            match new_state {
                RunState::Pending => {
                    slot.state = RunState::Pending;
                }
                RunState::Running => {
                    slot.state = RunState::Running;
                    if slot.start_time.is_none() {
                        // Freshly started: the supplied progress is the only
                        // information we have.
                        slot.start_time = Some(now);
                        slot.progress = update.progress.unwrap_or(0.0).clamp(0.0, 99.0);
                    } else {
                        let start = slot.start_time.unwrap_or(now);
                        let elapsed = (now - start).num_milliseconds() as f64;
                        let est = slot.estimated_ms.max(1) as f64;
                        slot.progress = (100.0 * elapsed / est).clamp(0.0, 99.0);
                    }
                    let elapsed =
                        (now - slot.start_time.unwrap_or(now)).num_milliseconds() as f64;
                    slot.performance_warning =
                        detect_against(&known_stats, elapsed, sensitivity);
                }
                RunState::Completed => {
                    slot.state = RunState::Completed;
                    slot.end_time = Some(now);
                    slot.progress = 100.0;
                    if let Some(d) = update.duration_ms {
                        slot.duration_ms = Some(d);
                    } else if let Some(start) = slot.start_time {
                        slot.duration_ms = Some((now - start).num_milliseconds());
                    }
                    if let Some(d) = update.duration_ms {
                        match detect_against(&known_stats, d as f64, sensitivity) {
                            Some(warning) => {
                                // Outlier durations carry the flag and are
                                // never folded into statistics.
                                slot.performance_warning = Some(warning);
                            }
                            None => {
                                slot.performance_warning = None;
                                fold_duration = Some(d);
                            }
                        }
                    }
                }
                RunState::Failed => {
                    slot.state = RunState::Failed;
                    slot.end_time = Some(now);
                    if let Some(d) = update.duration_ms {
                        slot.duration_ms = Some(d);
                    }
                }
            }
        }

        if let Some(d) = fold_duration {
            if let Err(e) = self.store.update_task_stats(&flow_name, &task_name, d).await {
                warn!("Failed to update task stats for {}/{}: {}", flow_name, task_name, e);
                crate::metrics::record_persistence_failure("task_stats");
            }
        }

        // Rollup. A failed task fails the whole run; completion is a
        // separate explicit signal because the worker may register fewer
        // tasks than predicted.
        let any_failed = run.tasks.iter().any(|t| t.state == RunState::Failed);
        if any_failed {
            run.state = RunState::Failed;
            run.end_time = Some(now);
            run.progress = weighted_progress(&run.tasks).min(99.0);
            Self::attach_report(&*self.reports, run).await;
        } else {
            run.progress = weighted_progress(&run.tasks).min(99.0);
        }
        self.persist_run(run).await;
        drop(inner);

        self.notify();
        Ok(UpdateOutcome::Applied)
    }

    // === Flow completion ===

    /// Explicit completion signal from the worker, carrying the number of
    /// tasks it actually executed.
    pub async fn complete_flow(
        &self,
        run_id: &str,
        actual_task_count: usize,
    ) -> EngineResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| EngineError::not_found(format!("run {}", run_id)))?;

        if run.state.is_terminal() {
            debug!("Completion for terminal run {} ignored", run_id);
            return Ok(UpdateOutcome::Ignored);
        }
        let flow_name = run.flow_name.clone();
        let now = Utc::now();

        // Drop the predicted tail the worker never visited.
        if actual_task_count < run.tasks.len() {
            run.tasks.truncate(actual_task_count);
            recompute_weights(&mut run.tasks);
        }

        let any_failed = run.tasks.iter().any(|t| t.state == RunState::Failed);
        let all_completed = run.tasks.iter().all(|t| t.state == RunState::Completed);

        if all_completed && !any_failed {
            run.state = RunState::Completed;
            run.progress = 100.0;
            if run.end_time.is_none() {
                run.end_time = Some(now);
            }
            Self::attach_report(&*self.reports, run).await;

            let duration_ms = (run.end_time.unwrap_or(now) - run.start_time).num_milliseconds();
            let any_warning = run
                .tasks
                .iter()
                .any(|t| t.performance_warning.is_some());
            if !any_warning {
                if let Err(e) = self.store.update_flow_stats(&flow_name, duration_ms).await {
                    warn!("Failed to update flow stats for {}: {}", flow_name, e);
                    crate::metrics::record_persistence_failure("flow_stats");
                }
            }

            // Remember the observed shape for the next run of this name.
            let structure: Vec<(String, i64)> = run
                .tasks
                .iter()
                .map(|t| (t.name.clone(), t.duration_ms.unwrap_or(t.estimated_ms)))
                .collect();
            if let Err(e) = self
                .store
                .save_learned_structure(&flow_name, &structure)
                .await
            {
                warn!("Failed to save learned structure for {}: {}", flow_name, e);
                crate::metrics::record_persistence_failure("structure");
            }
            info!("Run {} completed", run_id);
        } else if any_failed {
            run.state = RunState::Failed;
            if run.end_time.is_none() {
                run.end_time = Some(now);
            }
            run.progress = weighted_progress(&run.tasks).min(99.0);
            Self::attach_report(&*self.reports, run).await;
        } else {
            run.progress = weighted_progress(&run.tasks).min(99.0);
        }

        self.persist_run(run).await;
        drop(inner);

        self.notify();
        Ok(UpdateOutcome::Applied)
    }

    // === Stop / watchdog ===

    /// Fail every non-terminal run. Only the currently Running task of each
    /// run is failed; Pending tasks were never attempted and stay Pending.
    pub async fn fail_all_running(&self, reason: &str) {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut touched = false;

        for run in inner.runs.iter_mut() {
            if run.state.is_terminal() {
                continue;
            }
            run.state = RunState::Failed;
            run.end_time = Some(now);
            run.logs.push(LogEntry::now(reason));
            for task in run.tasks.iter_mut() {
                if task.state == RunState::Running {
                    task.state = RunState::Failed;
                    task.end_time = Some(now);
                }
            }
            run.progress = weighted_progress(&run.tasks).min(99.0);
            Self::attach_report(&*self.reports, run).await;
            self.persist_run(run).await;
            touched = true;
        }
        drop(inner);

        if touched {
            warn!("Failed all in-flight runs: {}", reason);
            self.notify();
        }
    }

    // === Logs ===

    /// Append to a run's flow-level log. Terminal runs are left untouched.
    pub async fn append_run_log(&self, run_id: &str, message: &str) -> EngineResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| EngineError::not_found(format!("run {}", run_id)))?;
        if run.state.is_terminal() {
            return Ok(UpdateOutcome::Ignored);
        }
        run.logs.push(LogEntry::now(message));
        self.persist_run(run).await;
        drop(inner);
        self.notify();
        Ok(UpdateOutcome::Applied)
    }

    /// Append to one task slot's log.
    pub async fn append_task_log(
        &self,
        run_id: &str,
        task_index: usize,
        message: &str,
    ) -> EngineResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| EngineError::not_found(format!("run {}", run_id)))?;
        if run.state.is_terminal() {
            return Ok(UpdateOutcome::Ignored);
        }
        let slot = run.tasks.get_mut(task_index).ok_or_else(|| {
            EngineError::not_found(format!("run {} has no task {}", run_id, task_index))
        })?;
        if slot.state.is_terminal() {
            return Ok(UpdateOutcome::Ignored);
        }
        slot.logs.push(LogEntry::now(message));
        self.persist_run(run).await;
        drop(inner);
        self.notify();
        Ok(UpdateOutcome::Applied)
    }

    // === Deletion ===

    /// Remove a terminal run. When the last run of a flow name goes away,
    /// its statistics go with it.
    pub async fn delete_run(&self, run_id: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let idx = inner
            .runs
            .iter()
            .position(|r| r.id == run_id)
            .ok_or_else(|| EngineError::not_found(format!("run {}", run_id)))?;
        if !inner.runs[idx].state.is_terminal() {
            return Err(EngineError::validation("run is still active"));
        }

        let run = inner.runs.remove(idx);
        if let Err(e) = self.store.delete_run(&run.id).await {
            warn!("Failed to delete run {}: {}", run.id, e);
            crate::metrics::record_persistence_failure("run");
        }

        let name_still_used = inner.runs.iter().any(|r| r.flow_name == run.flow_name);
        if !name_still_used {
            if let Err(e) = self.store.purge_flow_statistics(&run.flow_name).await {
                warn!("Failed to purge statistics for {}: {}", run.flow_name, e);
                crate::metrics::record_persistence_failure("statistics");
            }
        }
        drop(inner);

        self.notify();
        Ok(())
    }

    // === Tick ===

    /// Re-evaluate outlier warnings for every running task. Warnings are not
    /// persisted here; they ride along on the next rollup save.
    pub async fn tick(&self) {
        let mut changed = false;
        {
            let mut inner = self.inner.write().await;
            let sensitivity = inner.sensitivity;
            let now = Utc::now();

            for run in inner.runs.iter_mut() {
                if run.state != RunState::Running {
                    continue;
                }
                let flow_name = run.flow_name.clone();
                for slot in run.tasks.iter_mut() {
                    if slot.state != RunState::Running {
                        continue;
                    }
                    let Some(start) = slot.start_time else {
                        continue;
                    };
                    let elapsed = (now - start).num_milliseconds() as f64;
                    let known = self
                        .store
                        .get_task_stats(&flow_name, &slot.name)
                        .await
                        .unwrap_or_default();
                    let warning = detect_against(&known, elapsed, sensitivity);
                    if warning != slot.performance_warning {
                        slot.performance_warning = warning;
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.notify();
        }
    }

    /// UI-development mode: autonomously advance running tasks and complete
    /// them. Never active unless explicitly enabled.
    pub(crate) async fn advance_simulation(&self) {
        use rand::Rng;

        let mut finished: Vec<(String, usize)> = Vec::new();
        {
            let mut inner = self.inner.write().await;
            let now = Utc::now();
            let mut rng = rand::rng();

            for run in inner.runs.iter_mut() {
                if run.state != RunState::Running {
                    continue;
                }
                let has_running = run.tasks.iter().any(|t| t.state == RunState::Running);
                if !has_running {
                    if let Some(slot) =
                        run.tasks.iter_mut().find(|t| t.state == RunState::Pending)
                    {
                        slot.state = RunState::Running;
                        slot.start_time = Some(now);
                        slot.progress = 0.0;
                    }
                }
                for slot in run.tasks.iter_mut() {
                    if slot.state != RunState::Running {
                        continue;
                    }
                    slot.progress = (slot.progress + rng.random_range(1.0..6.0)).min(99.0);
                    if slot.progress >= 95.0 && rng.random_bool(0.3) {
                        slot.state = RunState::Completed;
                        slot.end_time = Some(now);
                        slot.progress = 100.0;
                        slot.duration_ms = slot
                            .start_time
                            .map(|s| (now - s).num_milliseconds());
                    }
                }
                run.progress = weighted_progress(&run.tasks).min(99.0);
                if run.tasks.iter().all(|t| t.state == RunState::Completed) {
                    finished.push((run.id.clone(), run.tasks.len()));
                }
            }
        }
        self.notify();

        for (run_id, count) in finished {
            let _ = self.complete_flow(&run_id, count).await;
        }
    }

    // === Write-through helpers ===

    /// Best-effort persistence: a failed write is logged and counted, and the
    /// in-memory mutation stands.
    async fn persist_run(&self, run: &FlowRun) {
        if let Err(e) = self.store.save_run(run).await {
            warn!("Failed to persist run {}: {}", run.id, e);
            crate::metrics::record_persistence_failure("run");
        }
    }

    async fn attach_report(reports: &dyn ReportSink, run: &mut FlowRun) {
        match reports.generate(run).await {
            Ok(path) => run.report_path = Some(path),
            Err(e) => warn!("Report generation failed for run {}: {}", run.id, e),
        }
    }
}

fn detect_against(
    known: &Option<StatRecord>,
    actual_ms: f64,
    sensitivity: Sensitivity,
) -> Option<PerformanceWarning> {
    known.as_ref().and_then(|s| {
        stats::detect_slow_outlier(
            actual_ms,
            s.avg_ms,
            stats::stddev(s.sample_count, s.m2),
            s.sample_count,
            sensitivity,
        )
    })
}
