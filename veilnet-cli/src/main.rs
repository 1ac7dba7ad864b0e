use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use veilnet_core::core_identity::{ContactPolicy, Ed25519Verifier, SigningCapability};
use veilnet_core::core_router::metrics;
use veilnet_core::logging::{init_logging_with_config, LogConfig};
use veilnet_core::{
    Clock, Identity, Router, RouterConfig, RouterContact, RouterHandle, SystemClock,
    TransportAction,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "veilnet")]
#[command(author, version, about = "Onion overlay router", long_about = None)]
struct Args {
    /// Router configuration file (TOML). Falls back to VEILNET_* variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a keyfile (or reuse an existing one) and print the router id
    Keygen {
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print the effective configuration as TOML
    ShowConfig,

    /// Verify a JSON router contact and print its fields
    InspectContact { file: PathBuf },

    /// Run the router until ctrl-c
    Run,
}

fn load_config(path: Option<&Path>) -> Result<RouterConfig> {
    let mut config = match path {
        Some(path) => RouterConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RouterConfig::default(),
    };
    config.apply_env().context("applying VEILNET_* overrides")?;
    config.validate()?;
    Ok(config)
}

fn init_cli_logging(args: &Args, config: &RouterConfig) -> Result<()> {
    let log_config = LogConfig::from_config(&config.logging)?
        .override_level(args.log_level.as_deref())
        .context("invalid --log-level")?
        .json_format(args.json_logs || config.logging.json_format);
    init_logging_with_config(log_config)?;
    Ok(())
}

fn keygen(out: &Path) -> Result<()> {
    let identity = Identity::load_or_generate(out)
        .with_context(|| format!("keyfile {}", out.display()))?;
    println!("{}", identity.router_id().to_hex());
    Ok(())
}

fn show_config(config: &RouterConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("rendering config")?;
    print!("{}", rendered);
    Ok(())
}

fn inspect_contact(file: &Path, config: &RouterConfig) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let contact: RouterContact = serde_json::from_str(&contents).context("parsing contact")?;

    let policy = ContactPolicy::from_config(&config.router);
    let now = SystemClock::new().now_ms();

    println!("router_id:      {}", contact.router_id.to_hex());
    println!("encryption_key: {}", hex::encode(contact.encryption_key));
    println!("version:        {}", contact.version);
    println!("timestamp_ms:   {}", contact.timestamp_ms);
    println!("expires_at_ms:  {}", contact.expires_at(&policy));
    for addr in &contact.addresses {
        println!("address:        {}", addr);
    }

    match contact.verify(&Ed25519Verifier, now, &policy) {
        Ok(()) => {
            println!("status:         valid");
            Ok(())
        }
        Err(e) => bail!("contact rejected: {}", e),
    }
}

async fn log_transport_actions(mut actions: mpsc::UnboundedReceiver<TransportAction>) {
    // No physical transport is wired in; actions are surfaced for operators.
    while let Some(action) = actions.recv().await {
        match action {
            TransportAction::Dial { contact } => {
                info!(router = %contact.router_id, addresses = ?contact.addresses, "dial requested");
            }
            TransportAction::Transmit { to, frame } => {
                debug!(router = %to, bytes = frame.len(), "frame ready for transmit");
            }
            TransportAction::Close { router } => {
                info!(router = %router, "close requested");
            }
        }
    }
}

async fn run(config: RouterConfig) -> Result<()> {
    metrics::init_metrics();
    let clock = Arc::new(SystemClock::new());
    let router = Router::from_config(config, clock).context("starting router")?;
    info!(router = %router.identity().router_id(), "router started");

    let (handle, actions, join) = RouterHandle::spawn(router);
    let action_task = tokio::spawn(log_transport_actions(actions));

    let mut status_interval = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                match handle.status().await {
                    Ok(status) => info!(
                        connected = status.connected,
                        own_paths = status.own_paths,
                        transit_hops = status.transit_hops,
                        known_contacts = status.known_contacts,
                        "status"
                    ),
                    Err(e) => {
                        warn!(error = %e, "router task stopped");
                        break;
                    }
                }
            }
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for ctrl-c")?;
                info!("shutdown requested");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        debug!(error = %e, "router already stopped");
    }
    join.await.context("router task panicked")?;
    action_task.abort();
    info!("router stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_cli_logging(&args, &config)?;

    match &args.command {
        Command::Keygen { out } => keygen(out),
        Command::ShowConfig => show_config(&config),
        Command::InspectContact { file } => inspect_contact(file, &config),
        Command::Run => run(config).await,
    }
}
