//! MIDI Remote - hardware MIDI control for presentation software
//!
//! Maps buttons, pads and knobs of a MIDI controller to application actions.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_remote::cli;
use midi_remote::config::{AppConfig, ConfigWatcher, Properties};
use midi_remote::invoker::{ActionEvent, ActionInvoker, ChannelInvoker, ConsoleInvoker};
use midi_remote::midi::{MessageType, ShortMessage};
use midi_remote::paths::AppPaths;
use midi_remote::{DeviceRegistry, MidiController, MidirBackend};

/// MIDI Remote - drive presentation actions from a MIDI controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI devices
    #[arg(long)]
    list_ports: bool,

    /// Capture the next inbound event as the binding for ACTION
    #[arg(long, value_name = "ACTION")]
    learn: Option<String>,

    /// Seconds to wait in learn mode
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Send the message bound to ACTION and exit
    #[arg(long, value_name = "ACTION")]
    send: Option<String>,

    /// Value byte used with --send
    #[arg(long, default_value = "127", value_parser = clap::value_parser!(u8).range(0..=127))]
    value: u8,

    /// Send a test tone (middle C) to the output device and exit
    #[arg(long)]
    tone: bool,

    /// Write the active bindings to a properties file and exit
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Start the interactive shell
    #[arg(long)]
    repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting MIDI Remote v{}...", env!("CARGO_PKG_VERSION"));

    let registry = DeviceRegistry::new(Arc::new(MidirBackend::default()));

    if args.list_ports {
        cli::list_ports_formatted(&registry);
        return Ok(());
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            let paths = AppPaths::detect();
            paths.ensure_config().await?;
            paths.config
        }
    };
    info!("Configuration file: {}", config_path.display());

    let (config_watcher, config) = ConfigWatcher::new(&config_path).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    if args.learn.is_some() || args.send.is_some() || args.tone || args.export.is_some() || args.repl {
        return run_tool(args, registry, config).await;
    }

    run_app(registry, config, config_watcher, shutdown_signal()).await?;

    info!("MIDI Remote shutdown complete");
    Ok(())
}

/// One-shot and interactive modes: actions are logged, not forwarded
async fn run_tool(args: Args, registry: DeviceRegistry, config: AppConfig) -> Result<()> {
    let invoker: Arc<dyn ActionInvoker> = Arc::new(ConsoleInvoker::new("console"));
    let mut controller = MidiController::start(&config.midi, registry, invoker);
    if let Some(reason) = controller.disabled_reason() {
        warn!("MIDI control disabled: {}", reason);
    }

    if let Some(action) = args.send {
        controller.session().send_action(&action, args.value)?;
        println!("{} {} ({})", "sent".green(), action, args.value);
    }

    if args.tone {
        let tone = ShortMessage::new(MessageType::NoteOn, 0, 60, 93)?;
        controller.session().send_raw(&tone.encode())?;
        println!("{} {}", "sent".green(), tone);
    }

    if let Some(path) = &args.export {
        let updates = controller.session().table().snapshot().to_properties();
        Properties::export(path, &updates).await?;
        println!("{} {}", "exported to".green(), path.display());
    }

    if let Some(action) = args.learn {
        let timeout = Duration::from_secs(args.timeout);
        let (controller_back, result) = tokio::task::spawn_blocking(move || {
            let result = cli::learn(&controller, &action, timeout);
            (controller, result)
        })
        .await?;
        controller = controller_back;

        let binding = result?;
        println!("{}", "Add this to midi.actions in your config:".bold());
        println!("  {}: \"{}\"", binding.action(), binding.config_string());
    }

    if args.repl {
        let runtime = tokio::runtime::Handle::current();
        controller = tokio::task::spawn_blocking(move || {
            let result = cli::run_repl(&mut controller, runtime);
            (controller, result)
        })
        .await
        .map(|(controller, result)| result.map(|()| controller))??;
    }

    controller.shutdown();
    Ok(())
}

async fn run_app(
    registry: DeviceRegistry,
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    use tracing::debug;

    info!("Starting main application loop...");

    // Matched actions leave the MIDI thread through this channel
    let (action_tx, mut action_rx) = mpsc::channel::<ActionEvent>(256);
    let invoker: Arc<dyn ActionInvoker> = Arc::new(ChannelInvoker::new(action_tx));
    let mut controller = MidiController::start(&config.midi, registry, invoker);

    let console = ConsoleInvoker::new("app");
    info!("{}", controller.status());
    info!("Ready to process MIDI events!");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = action_rx.recv() => {
                debug!("Action event: {:?}", event);
                console.invoke_action(&event.action, event.value);
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, reloading...");
                controller.apply_config(&new_config.midi);
                match controller.disabled_reason() {
                    None => info!("✅ Configuration applied"),
                    Some(reason) => warn!("⚠️  MIDI control disabled after reload: {}", reason),
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    controller.shutdown();
    info!("Handled {} actions", console.execution_count());

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
