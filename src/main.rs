//! Notify Listener - Main Entry Point
//!
//! Listens on the configured topics and prints each notification as one JSON
//! line on stdout until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use notify_listener::config::ListenerConfig;
use notify_listener::logging::init_logging_from_env;
use notify_listener::transport::mqtt::MqttConnector;
use notify_listener::{HandlerError, Listener, Notification};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resilient MQTT notification listener
#[derive(Parser)]
#[command(name = "notify-listener")]
#[command(about = "Listen on MQTT topics and print notifications as JSON lines")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging_from_env(cli.verbose);

    info!("Starting notify-listener v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_listener(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&std::path::Path>,
) -> Result<ListenerConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ListenerConfig::load_from_file(path)?);
    }

    let default_paths = ["notify-listener.toml", "config/notify-listener.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ListenerConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create notify-listener.toml".into())
}

async fn run_listener(config: ListenerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let connector = MqttConnector::new(config.mqtt.clone())?;
    let mut listener = Listener::new(connector)
        .with_backoff(config.backoff_policy())
        .with_backlog_failure_policy(config.listener.backlog_failure);

    for topic in &config.listener.topics {
        listener.handle_fn(topic.clone(), |notification, _shutdown| async move {
            print_notification(&notification)
        });
    }

    // Set up signal handling for graceful shutdown
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
        trigger.cancel();
    });

    info!(
        broker = %config.mqtt.broker_url,
        topics = ?config.listener.topics,
        "Listening for notifications"
    );
    listener.listen(shutdown).await;

    Ok(())
}

fn print_notification(notification: &Notification) -> Result<(), HandlerError> {
    let line = serde_json::to_string(notification)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

fn handle_config_command(
    config: &ListenerConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
