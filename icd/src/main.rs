//! incidentd - incident coordinator
//!
//! CLI entry point for running the coordinator and the bus broker, and for
//! talking to a running coordinator.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::sync::watch;
use tracing::{info, warn};

use incidentd::bus::{self, Broker, BusEndpoint, channels};
use incidentd::cli::{Cli, Command, OutputFormat};
use incidentd::config::Config;
use incidentd::coordinator::{Coordinator, LookupClient};
use incidentd::domain::{EnrichedAlert, RawAlert};

fn setup_logging(verbose: bool, log_stderr: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if log_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("incidentd")
            .join("logs");
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
        let log_file = fs::File::create(log_dir.join("incidentd.log")).context("Failed to create log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_stderr).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(endpoint = %config.bus.endpoint, "incidentd loaded config");

    match cli.command {
        Command::Run => cmd_run(config).await,
        Command::Broker => cmd_broker(&config).await,
        Command::Submit { input } => cmd_submit(&config, &input).await,
        Command::Lookup {
            alert_id,
            timeout_secs,
            format,
        } => cmd_lookup(&config, &alert_id, timeout_secs, format).await,
        Command::Config => cmd_config(&config),
    }
}

/// Resolve once SIGINT or SIGTERM arrives
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

/// Run the coordinator in the foreground
async fn cmd_run(config: Config) -> Result<()> {
    config.validate()?;
    let bus = bus::connect(&config.bus).context("Failed to set up message bus")?;
    let coordinator = Coordinator::open(config, bus).await?;
    let handle = coordinator.handle();
    let mut task = tokio::spawn(coordinator.run());

    tokio::select! {
        joined = &mut task => {
            return joined.context("Coordinator task panicked")?;
        }
        signal = wait_for_signal() => signal?,
    }

    info!("Coordinator shutting down...");
    handle.shutdown();
    task.await.context("Coordinator task panicked")?
}

/// Run the unix socket broker in the foreground
async fn cmd_broker(config: &Config) -> Result<()> {
    let endpoint: BusEndpoint = config.bus.endpoint.parse().map_err(|e: String| eyre!(e))?;
    let path = match endpoint {
        BusEndpoint::Unix(path) => path,
        BusEndpoint::Memory => return Err(eyre!("The memory bus runs in-process and needs no broker")),
    };

    let broker = Broker::bind(&path, config.bus.subscription_buffer)?;
    println!("Broker listening on {}", broker.socket_path().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task = tokio::spawn(broker.run(shutdown_rx));

    tokio::select! {
        joined = &mut task => {
            return joined.context("Broker task panicked")?;
        }
        signal = wait_for_signal() => signal?,
    }

    info!("Broker shutting down...");
    shutdown_tx.send_replace(true);
    task.await.context("Broker task panicked")?
}

/// Publish one raw alert document to the alerts channel
async fn cmd_submit(config: &Config, input: &str) -> Result<()> {
    let content = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read alert from stdin")?;
        buf
    } else {
        fs::read_to_string(input).context(format!("Failed to read alert from {}", input))?
    };

    let alert: RawAlert = serde_json::from_str(&content).context("Alert is not a JSON object")?;
    let alert_id = alert.resolve_id();

    let bus = bus::connect(&config.bus).context("Failed to set up message bus")?;
    bus::publish_json(bus.as_ref(), channels::ALERTS, &alert)
        .await
        .context("Failed to publish alert")?;

    println!("Submitted alert {}", alert_id);
    Ok(())
}

/// Ask a running coordinator for an alert's data
async fn cmd_lookup(config: &Config, alert_id: &str, timeout_secs: Option<u64>, format: OutputFormat) -> Result<()> {
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.coordinator.lookup_timeout());

    let bus = bus::connect(&config.bus).context("Failed to set up message bus")?;
    let client = LookupClient::new(Arc::clone(&bus), timeout);
    let found = client.lookup(alert_id).await.context("Lookup failed")?;

    match (found, format) {
        (Some(alert), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&alert)?);
            Ok(())
        }
        (Some(alert), OutputFormat::Text) => {
            print_alert(&alert);
            Ok(())
        }
        (None, OutputFormat::Json) => {
            println!("{}", serde_json::json!({ "status": "not_found", "alert_id": alert_id }));
            Err(eyre!("Alert {} not found", alert_id))
        }
        (None, OutputFormat::Text) => {
            println!("{} {}", "Not found:".red(), alert_id);
            Err(eyre!("Alert {} not found", alert_id))
        }
    }
}

fn print_alert(alert: &EnrichedAlert) {
    println!("{} {}", "Alert:".green().bold(), alert.alert_id);
    println!("  Received:  {}", alert.received_at.to_rfc3339());
    println!("  Priority:  {}", alert.priority);
    if let Some(name) = alert.alert.name() {
        println!("  Name:      {}", name);
    }
    if let Some(primary) = alert.primary_responder {
        println!("  Primary:   {}", primary);
    }
    if !alert.secondary_responders.is_empty() {
        let secondary: Vec<String> = alert.secondary_responders.iter().map(|r| r.to_string()).collect();
        println!("  Secondary: {}", secondary.join(", "));
    }
    let context = &alert.search_context;
    if let Some(service) = &context.service {
        println!("  Service:   {}", service);
    }
    if let Some(namespace) = &context.namespace {
        println!("  Namespace: {}", namespace);
    }
    if !context.keywords.is_empty() {
        println!("  Keywords:  {}", context.keywords.join(", ").dimmed());
    }
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
