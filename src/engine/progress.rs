// src/engine/progress.rs
// Weight and progress arithmetic shared by definitions and runs.

use crate::model::{RunState, TaskRun};

/// weight_i = estimate_i / sum(estimates); uniform when the sum is zero.
pub fn weights_from_estimates(estimates: &[i64]) -> Vec<f64> {
    if estimates.is_empty() {
        return Vec::new();
    }
    let total: i64 = estimates.iter().sum();
    if total <= 0 {
        let uniform = 1.0 / estimates.len() as f64;
        return vec![uniform; estimates.len()];
    }
    estimates
        .iter()
        .map(|&e| e as f64 / total as f64)
        .collect()
}

/// Recompute every slot weight from the current estimates.
pub fn recompute_weights(tasks: &mut [TaskRun]) {
    let estimates: Vec<i64> = tasks.iter().map(|t| t.estimated_ms).collect();
    for (task, w) in tasks.iter_mut().zip(weights_from_estimates(&estimates)) {
        task.weight = w;
    }
}

/// floor(sum(w_i * p_i) / sum(w_i)). Completed slots earn 100, Running and
/// Failed slots earn their current progress, Pending slots earn nothing.
pub fn weighted_progress(tasks: &[TaskRun]) -> f64 {
    let total_weight: f64 = tasks.iter().map(|t| t.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let earned: f64 = tasks
        .iter()
        .map(|t| {
            let p = match t.state {
                RunState::Completed => 100.0,
                RunState::Running | RunState::Failed => t.progress,
                RunState::Pending => 0.0,
            };
            t.weight * p
        })
        .sum();
    (earned / total_weight).floor()
}
