// src/worker/mod.rs
// Worker subprocess supervisor: spawns the configured client executable,
// pumps its output into a log ring, and tears it down on request.

use crate::engine::FlowEngine;
use crate::stats::Sensitivity;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

const LOG_RING_CAPACITY: usize = 500;
const LOG_TAIL: usize = 50;
const KILL_GRACE: Duration = Duration::from_secs(5);

/// One entry from the packaged clients.json file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub working_dir: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub performance_sensitivity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub status: ClientStatus,
    pub logs: Vec<String>,
    pub active_client: Option<ClientConfig>,
}

#[derive(Debug)]
struct SupervisorState {
    status: ClientStatus,
    active: Option<ClientConfig>,
    pid: Option<i32>,
}

pub struct WorkerSupervisor {
    clients_file: PathBuf,
    engine: Arc<FlowEngine>,
    state: Arc<Mutex<SupervisorState>>,
    logs: Arc<Mutex<VecDeque<String>>>,
}

impl WorkerSupervisor {
    pub fn new(clients_file: impl Into<PathBuf>, engine: Arc<FlowEngine>) -> Self {
        Self {
            clients_file: clients_file.into(),
            engine,
            state: Arc::new(Mutex::new(SupervisorState {
                status: ClientStatus::Stopped,
                active: None,
                pid: None,
            })),
            logs: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY))),
        }
    }

    pub async fn load_configs(&self) -> Result<Vec<ClientConfig>> {
        let raw = tokio::fs::read_to_string(&self.clients_file)
            .await
            .with_context(|| format!("reading {}", self.clients_file.display()))?;
        let configs: Vec<ClientConfig> =
            serde_json::from_str(&raw).context("parsing client configs")?;
        Ok(configs)
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = self.state.lock();
        let logs = self.logs.lock();
        let tail = logs.len().saturating_sub(LOG_TAIL);
        SupervisorStatus {
            status: state.status,
            logs: logs.iter().skip(tail).cloned().collect(),
            active_client: state.active.clone(),
        }
    }

    /// Spawn the configured client executable and begin streaming its output.
    pub async fn start(&self, client_id: &str) -> Result<()> {
        let configs = self.load_configs().await?;
        let config = configs
            .into_iter()
            .find(|c| c.id == client_id)
            .with_context(|| format!("unknown client '{}'", client_id))?;

        {
            let mut state = self.state.lock();
            if matches!(state.status, ClientStatus::Starting | ClientStatus::Running) {
                anyhow::bail!("a client is already running");
            }
            state.status = ClientStatus::Starting;
            state.active = Some(config.clone());
        }

        if let Some(sensitivity) = config
            .performance_sensitivity
            .as_deref()
            .and_then(Sensitivity::parse)
        {
            self.engine.set_sensitivity(sensitivity).await;
        }

        info!(
            "Spawning client '{}': {} {:?}",
            config.id, config.command, config.args
        );
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .current_dir(&config.working_dir)
            // Line-prompt output from the subprocess, so the log ring streams.
            .env("PYTHONUNBUFFERED", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let mut state = self.state.lock();
                state.status = ClientStatus::Error;
                state.pid = None;
                drop(state);
                push_ring(&self.logs, format!("spawn failed: {}", e));
                return Err(e).context("Failed to spawn client process");
            }
        };

        let pid = child.id().map(|p| p as i32);
        {
            let mut state = self.state.lock();
            state.status = ClientStatus::Running;
            state.pid = pid;
        }

        if let Some(stdout) = child.stdout.take() {
            let logs = self.logs.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    push_ring(&logs, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let logs = self.logs.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    push_ring(&logs, format!("[stderr] {}", line));
                }
            });
        }

        // The monitor task owns the child; stop() signals it by pid.
        let state = self.state.clone();
        let logs = self.logs.clone();
        tokio::spawn(async move {
            let exit = child.wait().await;
            {
                let mut state = state.lock();
                state.pid = None;
                if state.status != ClientStatus::Error {
                    state.status = ClientStatus::Stopped;
                }
            }
            match exit {
                Ok(status) => push_ring(&logs, format!("client exited: {}", status)),
                Err(e) => push_ring(&logs, format!("client wait failed: {}", e)),
            }
        });

        Ok(())
    }

    /// Stop the client. The engine fails all in-flight runs first, so a
    /// worker update racing the stop hits the terminal guard; the process
    /// then gets SIGTERM with a force-kill escalation.
    pub async fn stop(&self) {
        self.engine.fail_all_running("user stopped").await;

        let pid = {
            let mut state = self.state.lock();
            state.active = None;
            state.pid
        };

        let Some(pid) = pid else {
            self.state.lock().status = ClientStatus::Stopped;
            return;
        };

        info!("Stopping client process {}", pid);
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }

        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(KILL_GRACE).await;
            let still_alive = state.lock().pid == Some(pid);
            if still_alive {
                warn!("Client {} ignored SIGTERM, force-killing", pid);
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        });
    }
}

fn push_ring(logs: &Mutex<VecDeque<String>>, line: String) {
    let mut logs = logs.lock();
    if logs.len() >= LOG_RING_CAPACITY {
        logs.pop_front();
    }
    logs.push_back(line);
}
