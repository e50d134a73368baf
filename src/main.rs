// src/main.rs
// Workflow-execution coordinator server.

use anyhow::Result;
use clap::Parser;
use foreman::dispatch::Dispatcher;
use foreman::engine::FlowEngine;
use foreman::report::{HtmlReportWriter, ReportSink};
use foreman::store::Store;
use foreman::worker::WorkerSupervisor;
use foreman::AppState;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "foreman", about = "Workflow-execution coordinator")]
struct Args {
    #[arg(long, env = "FOREMAN_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "FOREMAN_PORT", default_value_t = 3001)]
    port: u16,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://data/foreman.db")]
    database_url: String,

    #[arg(long, env = "FOREMAN_CLIENTS_FILE", default_value = "clients.json")]
    clients_file: String,

    #[arg(long, env = "FOREMAN_REPORTS_DIR", default_value = "Reports")]
    reports_dir: String,

    /// Autonomously advance task progress; UI development only.
    #[arg(long, env = "FOREMAN_SIMULATE")]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!("Starting foreman...");

    foreman::metrics::init_metrics();

    if let Some(parent) = Path::new(args.database_url.trim_start_matches("sqlite://")).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // A store that will not open is the one startup error we do not ride out.
    let store = Store::open(&args.database_url).await?;

    let config = foreman::CONFIG.clone();
    let dispatcher = Arc::new(Dispatcher::new(config.heartbeat_timeout));
    let reports: Arc<dyn ReportSink> = Arc::new(HtmlReportWriter::new(&args.reports_dir));

    let engine = FlowEngine::start(
        store.clone(),
        dispatcher.clone(),
        reports,
        config.clone(),
        args.simulate,
    )
    .await?;

    let supervisor = Arc::new(WorkerSupervisor::new(&args.clients_file, engine.clone()));

    let state = Arc::new(AppState {
        engine: engine.clone(),
        dispatcher,
        store,
        supervisor,
        poll_timeout: config.poll_timeout,
    });

    let app = foreman::api::http::build_router(state, Path::new(&args.reports_dir));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await?;

    Ok(())
}

async fn shutdown_signal(engine: Arc<FlowEngine>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
    engine.shutdown();
}
