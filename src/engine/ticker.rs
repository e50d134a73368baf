// src/engine/ticker.rs
// Background loops: the 100 ms outlier tick and the 1 s dispatcher watchdog.
// Both stop when the engine's shutdown channel flips.

use super::FlowEngine;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

pub(crate) fn spawn(engine: Arc<FlowEngine>) {
    spawn_tick_loop(engine.clone());
    spawn_liveness_loop(engine);
}

fn spawn_tick_loop(engine: Arc<FlowEngine>) {
    let mut shutdown = engine.shutdown_rx();
    tokio::spawn(async move {
        let mut ticker = interval(engine.config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    engine.tick().await;
                    if engine.simulate() {
                        engine.advance_simulation().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn spawn_liveness_loop(engine: Arc<FlowEngine>) {
    let mut shutdown = engine.shutdown_rx();
    tokio::spawn(async move {
        let mut ticker = interval(engine.config().liveness_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if engine.dispatcher().liveness_check() {
                        warn!("Worker heartbeat lost, failing all in-flight runs");
                        crate::metrics::record_worker_lost();
                        engine.fail_all_running("Lost connection to client").await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
