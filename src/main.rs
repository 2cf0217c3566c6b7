//! Kiosk - satisfaction feedback terminal
//!
//! Reads taps from standard input and delivers them to the feedback API,
//! queueing them on disk while the API is unreachable.
//!
//! ## Input
//!
//! One command per line:
//!
//! - `1` / `2` / `3` (or a grade name): record a tap
//! - `flush`: drain the pending queue now
//! - `status`: show pending count, connectivity and the latest summary
//! - `quit`: stop
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `KIOSK_API_URL`: feedback API base URL (default: http://localhost:5000)
//! - `KIOSK_DATA_DIR`: directory for the pending queue (default: ./kiosk-data)
//! - `KIOSK_FLUSH_INTERVAL_SECS`: seconds between periodic drains (default: 10)
//! - `KIOSK_SUMMARY_INTERVAL_SECS`: seconds between summary refreshes (default: 30)
//! - `KIOSK_PROBE_INTERVAL_SECS`: seconds between health probes (default: 5)
//! - `KIOSK_REQUEST_TIMEOUT_SECS`: deadline per submission (default: 10)
//! - `KIOSK_TAP_COOLDOWN_MS`: button lock after a tap (default: 3000)
//! - `KIOSK_REFRESH_SUMMARY_ON_DELIVERY`: refresh the summary after deliveries (default: true)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kiosk_feedback::client::FeedbackClient;
use kiosk_feedback::config::Config;
use kiosk_feedback::connectivity::{probe_task, Connectivity};
use kiosk_feedback::coordinator::{
    CoordinatorSettings, DeliveryCoordinator, DeliveryStatus, SubmitOutcome,
};
use kiosk_feedback::event::SatisfactionGrade;
use kiosk_feedback::storage::FileSlotStore;

/// How long shutdown waits for the final flush
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting kiosk...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                api_url = %config.api_url,
                data_dir = %config.data_dir.display(),
                flush_interval_secs = config.flush_interval.as_secs(),
                request_timeout_secs = config.request_timeout.as_secs(),
                tap_cooldown_ms = config.tap_cooldown.as_millis() as u64,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let client = match FeedbackClient::new(&config) {
        Ok(client) => {
            info!(feedback_url = %client.feedback_url(), "HTTP client initialized");
            Arc::new(client)
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let store = match FileSlotStore::open(&config.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to open data directory");
            std::process::exit(1);
        }
    };

    let connectivity = Connectivity::new(true);
    let coordinator = Arc::new(DeliveryCoordinator::new(
        client.clone(),
        store,
        connectivity.clone(),
        CoordinatorSettings::from(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator_handle = tokio::spawn(coordinator.clone().run(shutdown_rx.clone()));
    let probe_handle = tokio::spawn(probe_task(
        client,
        connectivity,
        config.probe_interval,
        shutdown_rx.clone(),
    ));
    let status_handle = tokio::spawn(report_status(coordinator.clone(), shutdown_rx));

    info!(
        pending = coordinator.pending(),
        "Kiosk ready. Enter 1 (muito satisfeito), 2 (satisfeito) or 3 (insatisfeito)."
    );

    read_taps(&coordinator).await;

    // Graceful shutdown
    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [
        ("coordinator", coordinator_handle),
        ("probe", probe_handle),
        ("status", status_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task panicked during shutdown");
        }
    }

    match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, coordinator.flush()).await {
        Ok(report) => info!(
            delivered = report.delivered,
            remaining = report.remaining,
            "Final flush finished"
        ),
        Err(_) => warn!(
            "Final flush timed out after {:?}, pending feedback stays on disk",
            SHUTDOWN_FLUSH_TIMEOUT
        ),
    }

    info!("Kiosk stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// A parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Tap(SatisfactionGrade),
    Flush,
    Status,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let command = match line.to_ascii_lowercase().as_str() {
        "flush" => Command::Flush,
        "status" => Command::Status,
        "quit" | "exit" | "q" => Command::Quit,
        other => match other.parse() {
            Ok(grade) => Command::Tap(grade),
            Err(_) => Command::Unknown(line.to_string()),
        },
    };
    Some(command)
}

/// Read commands from stdin until EOF, `quit` or Ctrl+C.
async fn read_taps(coordinator: &DeliveryCoordinator) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping...");
                return;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input closed, stopping...");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to read input");
                return;
            }
        };

        match parse_command(&line) {
            None => {}
            Some(Command::Tap(grade)) => show_outcome(coordinator.submit(grade).await),
            Some(Command::Flush) => {
                let report = coordinator.flush().await;
                println!(
                    "Flush: {} delivered, {} pending ({:?})",
                    report.delivered, report.remaining, report.outcome
                );
            }
            Some(Command::Status) => {
                let status = coordinator.status();
                println!("{}", describe_status(&status));
                if let Some(summary) = coordinator.subscribe_summary().borrow().as_ref() {
                    println!(
                        "Today ({}): {} total, {} muito satisfeito, {} satisfeito, {} insatisfeito; all time: {}",
                        summary.date,
                        summary.today_total,
                        summary.today.muito_satisfeito,
                        summary.today.satisfeito,
                        summary.today.insatisfeito,
                        summary.total
                    );
                }
            }
            Some(Command::Quit) => return,
            Some(Command::Unknown(input)) => {
                println!("Unknown input '{}'. Use 1, 2, 3, flush, status or quit.", input)
            }
        }
    }
}

fn show_outcome(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Delivered {
            server_id, message, ..
        } => {
            let message = message.unwrap_or_else(|| "Obrigado pelo seu feedback!".to_string());
            match server_id {
                Some(id) => println!("{} (#{})", message, id),
                None => println!("{}", message),
            }
        }
        SubmitOutcome::Queued { pending } => {
            println!("Obrigado pelo seu feedback! ({} pending delivery)", pending)
        }
        SubmitOutcome::Rejected { message } => {
            println!("Erro ao registrar feedback: {}", message)
        }
        SubmitOutcome::Throttled => {}
    }
}

fn describe_status(status: &DeliveryStatus) -> String {
    let mut line = format!(
        "{} | {} pending{}",
        if status.online { "online" } else { "offline" },
        status.pending,
        if status.draining { " | sending" } else { "" }
    );
    if let Some(error) = &status.last_error {
        line.push_str(&format!(" | last error: {}", error));
    }
    line
}

/// Log status indicator changes until shutdown.
async fn report_status(coordinator: Arc<DeliveryCoordinator>, mut shutdown: watch::Receiver<bool>) {
    let mut status_rx = coordinator.subscribe_status();

    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                info!(
                    online = status.online,
                    pending = status.pending,
                    draining = status.draining,
                    "Status changed"
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}
