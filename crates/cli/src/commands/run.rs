//! `run` command implementation.

use std::io::{BufRead, ErrorKind};
use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::{DispatchReport, NotifierConfig};
use delivery::MockBroker;
use dispatcher::{create_dispatcher, ChangeNotifier, Dispatcher, DispatcherBuilder};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::ingest;

const STDIN_CHANNEL_CAPACITY: usize = 1024;

/// Execute the `run` command
pub async fn run_notifier(args: &RunArgs) -> Result<()> {
    let config = load_config(args)?;

    info!(
        broker = %config.broker_addr(),
        enabled = config.enabled,
        workers = config.worker_count,
        prefixes = config.path_prefixes.len(),
        dry_broker = args.dry_broker,
        "Configuration loaded"
    );
    if !config.enabled {
        warn!("Notifications are disabled; requests will be read but no jobs submitted");
    }

    let dispatcher = if args.dry_broker {
        DispatcherBuilder::new(config.clone())
            .start(Arc::new(MockBroker::new()))
            .context("Failed to start dispatcher")?
    } else {
        create_dispatcher(config.clone())
            .await
            .context("Failed to start dispatcher")?
    };

    let input = spawn_stdin_reader().context("Failed to start stdin reader")?;
    let read = read_requests(dispatcher.notifier(), input);
    let shutdown_signal = setup_shutdown_signal();

    tokio::select! {
        lines = read => {
            info!(lines, "Input closed, shutting down");
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, shutting down...");
        }
    }

    let report = shutdown(dispatcher, &config).await;
    print_report(&report);

    info!("Change notifier finished");
    Ok(())
}

/// Load the config file (or defaults) and apply CLI overrides
fn load_config(args: &RunArgs) -> Result<NotifierConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path).into());
            }
            info!(config = %path.display(), "Loading configuration");
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            NotifierConfig::default()
        }
    };

    if let Some(ref host) = args.host {
        info!(host = %host, "Overriding job server host from CLI");
        config.broker_host = host.clone();
    }
    if let Some(port) = args.port {
        info!(port = %port, "Overriding job server port from CLI");
        config.broker_port = port;
    }
    if args.enable {
        config.enabled = true;
    }

    config_loader::validate(&config).context("Invalid configuration after CLI overrides")?;
    Ok(config)
}

/// Read stdin on a dedicated thread; a blocked read must not hold up exit
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<std::io::Result<String>>> {
    let (tx, rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                // a bad line is consumed and reading goes on; other errors end input
                let fatal = matches!(&line, Err(e) if e.kind() != ErrorKind::InvalidData);
                if tx.blocking_send(line).is_err() || fatal {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Feed input lines to the notifier until EOF. Returns lines read.
///
/// Unreadable lines are logged and skipped so buffered events still
/// reach shutdown.
async fn read_requests(
    notifier: ChangeNotifier,
    mut lines: mpsc::Receiver<std::io::Result<String>>,
) -> usize {
    let mut line_no = 0;

    while let Some(line) = lines.recv().await {
        line_no += 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unreadable input line");
                continue;
            }
        };
        match ingest::parse_line(line_no, &line) {
            Ok(Some(request)) => {
                notifier
                    .on_request(
                        &request.method,
                        &request.path,
                        request.destination.as_deref(),
                    )
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping input line"),
        }
    }
    line_no
}

async fn shutdown(dispatcher: Dispatcher, config: &NotifierConfig) -> DispatchReport {
    let metrics = Arc::clone(dispatcher.metrics());
    let report = dispatcher.shutdown(config.shutdown_timeout()).await;

    let snapshot = metrics.snapshot();
    info!(
        enqueued = snapshot.enqueued,
        duplicates = snapshot.duplicates,
        rejected = snapshot.rejected,
        retries = snapshot.retries,
        attempts = %metrics.attempts_summary(),
        "Dispatch statistics"
    );
    for (path, err) in metrics.last_errors() {
        error!(path = %path, error = %err, "Last delivery error");
    }
    report
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

fn print_report(report: &DispatchReport) {
    println!("\n=== Dispatch Report ===\n");
    println!("  Delivered: {}", report.delivered);
    println!("  Dropped:   {}", report.dropped);
    println!("  Failed:    {}", report.failed);
    println!("  Pending:   {}", report.pending);
    println!("  Total:     {}", report.total());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn args() -> RunArgs {
        RunArgs {
            config: None,
            host: None,
            port: None,
            enable: false,
            metrics_port: 0,
            dry_broker: true,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        let config = load_config(&args()).unwrap();
        assert_eq!(config, NotifierConfig::default());
    }

    #[test]
    fn test_overrides_apply_on_top_of_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "broker_host = \"from-file\"\nworker_count = 2").unwrap();

        let config = load_config(&RunArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(4999),
            enable: true,
            ..args()
        })
        .unwrap();

        assert_eq!(config.broker_host, "from-file");
        assert_eq!(config.broker_port, 4999);
        assert_eq!(config.worker_count, 2);
        assert!(config.enabled);
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(&RunArgs {
            config: Some("/nonexistent/change-notifier.toml".into()),
            ..args()
        })
        .unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }

    #[tokio::test]
    async fn test_unreadable_line_is_skipped() {
        let broker = Arc::new(MockBroker::new());
        let config = NotifierConfig {
            enabled: true,
            ..NotifierConfig::default()
        };
        let dispatcher = DispatcherBuilder::new(config)
            .start(Arc::clone(&broker))
            .unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("PUT /a".to_string())).await.unwrap();
        tx.send(Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "stream did not contain valid UTF-8",
        )))
        .await
        .unwrap();
        tx.send(Ok("PUT /b".to_string())).await.unwrap();
        drop(tx);

        let lines = read_requests(dispatcher.notifier(), rx).await;
        assert_eq!(lines, 3);

        let report = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pending, 0);
        let mut payloads: Vec<String> = broker
            .submissions()
            .into_iter()
            .map(|s| s.payload)
            .collect();
        payloads.sort();
        assert_eq!(payloads, vec!["/a", "/b"]);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = load_config(&RunArgs {
            host: Some(String::new()),
            ..args()
        });
        assert!(result.is_err());
    }
}
