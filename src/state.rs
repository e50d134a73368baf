// src/state.rs
// Application state shared across handlers

use crate::dispatch::Dispatcher;
use crate::engine::FlowEngine;
use crate::store::Store;
use crate::worker::WorkerSupervisor;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers. One engine value, injected
/// everywhere; no process-wide mutable reference.
pub struct AppState {
    pub engine: Arc<FlowEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Store,
    pub supervisor: Arc<WorkerSupervisor>,
    pub poll_timeout: Duration,
}
