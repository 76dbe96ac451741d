use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};

use pharmacy_fulfillment as app;
use app::services::prescriptions::{InMemoryPrescriptions, PrescriptionRecord};

#[derive(Parser, Debug)]
#[command(name = "pharmacy-fulfillment", version, about = "Pharmacy stock reservation and order fulfillment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve JSON command messages from stdin and run the expiry worker until shutdown
    Run {
        /// JSON file with prescription records for the in-memory lookup
        #[arg(long)]
        prescriptions: Option<PathBuf>,
    },
    /// Run a single reservation expiry sweep and exit
    Sweep,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = app::config::load_config()?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = app::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;

    let command = cli.command.unwrap_or(Commands::Run {
        prescriptions: None,
    });

    if matches!(command, Commands::Migrate) || cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    if matches!(command, Commands::Migrate) {
        info!("Migrations applied");
        app::db::close_pool(db_pool).await?;
        return Ok(());
    }

    let prescriptions = Arc::new(InMemoryPrescriptions::new());
    if let Commands::Run {
        prescriptions: Some(path),
    } = &command
    {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let records: Vec<PrescriptionRecord> =
            serde_json::from_str(&raw).context("invalid prescription file")?;
        info!(count = records.len(), "Loaded prescription records");
        for record in records {
            prescriptions.insert(record);
        }
    }

    let db_arc = Arc::new(db_pool);
    let (event_sender, event_rx) = app::events::EventSender::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(event_sender);
    let events_task = tokio::spawn(app::events::process_events(event_rx));

    let state = app::AppState::new(db_arc.clone(), cfg.clone(), event_sender, prescriptions);

    if matches!(command, Commands::Sweep) {
        let summary = state
            .reservation_service()
            .expire_reservations(chrono::Utc::now())
            .await?;
        info!(
            expired = summary.expired,
            skipped = summary.skipped,
            failed = summary.failed,
            "Expiry sweep complete"
        );
        drop(state);
        let _ = events_task.await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(app::services::expiry_worker::run_expiry_worker(
        state.reservation_service(),
        cfg.expiry_sweep_interval(),
        shutdown_rx,
    ));

    info!(environment = %cfg.environment, "Pharmacy fulfillment ready; reading commands from stdin");

    tokio::select! {
        _ = serve_stdin(&state) => info!("Command input closed"),
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        warn!("Expiry worker did not stop cleanly: {}", e);
    }

    info!("Shutting down");
    Ok(())
}

/// One JSON command per line in, one JSON response per line out.
async fn serve_stdin(state: &app::AppState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed reading command input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = app::handlers::handle_message(state, &line).await;
        let mut out = response.to_string();
        out.push('\n');
        if let Err(e) = stdout.write_all(out.as_bytes()).await {
            error!("Failed writing response: {}", e);
            break;
        }
        let _ = stdout.flush().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
