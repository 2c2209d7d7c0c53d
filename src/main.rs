//! Binary entrypoint for the Meshrelay CLI.
//!
//! Commands:
//! - `start [--port <path>] [--console]` - run the relay on a serial device, or on the
//!   console when no device is given
//! - `init` - create a starter `config.toml`
//! - `status` - print a summary of the loaded configuration
//!
//! See the library crate docs for module‑level details: `meshrelay::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

use meshrelay::audit::AuditLog;
use meshrelay::config::Config;
use meshrelay::meshtastic::console::ConsoleTransport;
use meshrelay::meshtastic::{InboundPacket, Transport};
use meshrelay::metrics::RelayMetrics;
use meshrelay::relay::{Dispatcher, RelayServer};
use meshrelay::services::adventure::Adventure;
use meshrelay::services::board::BulletinBoard;
use meshrelay::services::generation::OpenAiBackend;
use meshrelay::services::CommandHandler;

const INBOUND_BUFFER: usize = 64;

#[derive(Parser)]
#[command(name = "meshrelay")]
#[command(about = "A conversational LLM relay for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Use stdin/stdout instead of a radio, even if a port is configured
        #[arg(long)]
        console: bool,
    },
    /// Write a default configuration file
    Init,
    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port, console } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            config.validate()?;
            info!("Starting Meshrelay v{}", env!("CARGO_PKG_VERSION"));

            let chosen_port = match port {
                Some(cli_port) => Some(cli_port),
                None if !config.meshtastic.port.is_empty() => Some(config.meshtastic.port.clone()),
                None => None,
            };
            let (transport, inbound) = open_transport(&config, chosen_port, console).await?;
            run_relay(config, transport, inbound).await?;
        }
        Commands::Init => {
            info!("Initializing new relay configuration");
            if std::path::Path::new(&cli.config).exists() {
                return Err(anyhow!(
                    "Refusing to overwrite existing config file {}",
                    cli.config
                ));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            println!(
                "Set {} (or generation.api_key) before running `meshrelay start`.",
                meshrelay::config::ENV_API_KEY
            );
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            print_status(&config);
        }
    }

    Ok(())
}

async fn open_transport(
    config: &Config,
    port: Option<String>,
    console: bool,
) -> Result<(Arc<dyn Transport>, mpsc::Receiver<InboundPacket>)> {
    if console {
        info!("Console mode requested; not opening a device");
    } else if let Some(port_path) = port {
        #[cfg(feature = "serial")]
        {
            use meshrelay::meshtastic::serial::SerialTransport;
            let (transport, inbound) = SerialTransport::open(
                &port_path,
                config.meshtastic.baud_rate,
                config.meshtastic.primary_channel,
                config.meshtastic.hop_limit,
                INBOUND_BUFFER,
            )
            .await?;
            info!("Connected to Meshtastic device on {}", port_path);
            return Ok((Arc::new(transport), inbound));
        }
        #[cfg(not(feature = "serial"))]
        {
            let _ = config;
            log::warn!(
                "Port {} given but this build lacks the 'serial' feature; using console",
                port_path
            );
        }
    } else {
        info!("No --port specified and no configured device port set; using console.");
    }
    let (transport, inbound) = ConsoleTransport::open(INBOUND_BUFFER);
    Ok((Arc::new(transport), inbound))
}

async fn run_relay(
    config: Config,
    transport: Arc<dyn Transport>,
    inbound: mpsc::Receiver<InboundPacket>,
) -> Result<()> {
    let metrics = Arc::new(RelayMetrics::new());
    let backend = Arc::new(OpenAiBackend::new(config.generation.clone())?);
    let audit = Arc::new(AuditLog::new(
        &config.logging.audit_dir,
        config.logging.redact_audit_content,
    ));

    let mut handlers: Vec<Arc<dyn CommandHandler>> = vec![
        Arc::new(BulletinBoard::new(&config.board.data_dir)),
        Arc::new(Adventure::new()),
    ];
    #[cfg(feature = "weather")]
    {
        use meshrelay::services::weather::WeatherService;
        handlers.push(Arc::new(WeatherService::new(config.weather.clone())?));
    }
    let dispatcher = Dispatcher::new(
        &config,
        transport,
        backend,
        handlers,
        audit,
        metrics.clone(),
    );
    info!("Relay server starting...");
    RelayServer::new(&config, dispatcher, inbound, metrics)
        .run()
        .await
}

fn print_status(config: &Config) {
    println!("Meshrelay v{}", env!("CARGO_PKG_VERSION"));
    println!("  handle:           {}", config.relay.handle);
    if config.relay.respond_channels.is_empty() {
        println!("  respond channels: (DMs only)");
    } else {
        println!("  respond channels: {:?}", config.relay.respond_channels);
    }
    let port = if config.meshtastic.port.is_empty() {
        "(console)"
    } else {
        config.meshtastic.port.as_str()
    };
    println!("  device:           {} @ {}", port, config.meshtastic.baud_rate);
    println!(
        "  backend:          {} ({})",
        config.generation.api_base, config.generation.model
    );
    println!(
        "  api key:          {}",
        if config.generation.api_key.is_some() {
            "set"
        } else {
            "missing"
        }
    );
    println!(
        "  workers:          {} (+{} queued)",
        config.workers.max_workers, config.workers.max_queue_size
    );
    println!(
        "  frames:           {}B direct / {}B channel, {} attempts",
        config.sender.chunk_bytes, config.sender.channel_chunk_bytes, config.sender.max_attempts
    );
    println!("  audit log:        {}", config.logging.audit_dir);
    if let Err(e) = config.validate() {
        println!("  config problem:   {}", e);
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok());
    let base_level = match (verbosity, configured) {
        (0, Some(level)) => level,
        (0, None) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Tee to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
