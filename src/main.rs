use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whep_client::config::{NegotiationConfig, RelayServer};
use whep_client::session::{LoggingSink, SessionState, WhepSession};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// whep-client command line arguments
#[derive(Parser, Debug)]
#[command(name = "whep-client")]
#[command(version, about = "Receive a WebRTC stream from a WHEP endpoint", long_about = None)]
struct CliArgs {
    /// WHEP endpoint URL (overrides config file)
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Delay between signaling attempts in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Upper bound on ICE gathering in milliseconds
    #[arg(long, value_name = "MS")]
    ice_gather_timeout_ms: Option<u64>,

    /// TURN server URL, e.g. turn:turn.example.com:3478
    #[arg(long, value_name = "URL")]
    turn_url: Option<String>,

    /// TURN username
    #[arg(long, value_name = "USER", requires = "turn_url")]
    turn_username: Option<String>,

    /// TURN credential
    #[arg(long, value_name = "SECRET", requires = "turn_url")]
    turn_credential: Option<String>,

    /// Bearer token for the endpoint
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting whep-client v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    tracing::info!(
        "Endpoint: {} (poll {} ms, ICE gather timeout {} ms, {} relay servers)",
        config.endpoint_url,
        config.poll_interval_ms,
        config.ice_gather_timeout_ms,
        config.relay_servers.len()
    );

    let sink = Arc::new(LoggingSink::new());
    let session = WhepSession::with_webrtc(config, sink)?;

    let mut states = session.subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!("Session {}", state);
            if state == SessionState::Closed {
                break;
            }
        }
    });

    // Setup retries until the endpoint answers, so Ctrl-C must be able to interrupt it
    tokio::select! {
        result = session.setup() => {
            let outcome = result?;
            match outcome.location() {
                Some(location) => tracing::info!("Session resource: {}", location),
                None if outcome.is_connected() => tracing::info!("Session established"),
                None => tracing::info!("Session setup aborted"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            session.close().await;
            return Ok(());
        }
    }

    if session.is_connected() {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown signal received");
    }

    session.close().await;
    tracing::info!("Bye");
    Ok(())
}

/// Config file (or defaults) with command line overrides applied
fn build_config(args: &CliArgs) -> anyhow::Result<NegotiationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config from {}", path.display());
            NegotiationConfig::load(path)?
        }
        None => NegotiationConfig::default(),
    };

    if let Some(ref endpoint) = args.endpoint {
        config.endpoint_url = endpoint.clone();
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = args.ice_gather_timeout_ms {
        config.ice_gather_timeout_ms = ms;
    }
    if let Some(ref url) = args.turn_url {
        config.relay_servers.push(RelayServer::new(
            url.clone(),
            args.turn_username.clone().unwrap_or_default(),
            args.turn_credential.clone().unwrap_or_default(),
        ));
    }
    if let Some(ref token) = args.token {
        config.bearer_token = Some(token.clone());
    }

    if config.endpoint_url.is_empty() {
        anyhow::bail!("No endpoint given, use --endpoint or set endpoint_url in the config file");
    }
    config.validate()?;
    Ok(config)
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "whep_client=error,webrtc=error",
        LogLevel::Warn => "whep_client=warn,webrtc=warn",
        LogLevel::Info => "whep_client=info,webrtc=warn",
        LogLevel::Verbose => "whep_client=debug,webrtc=warn",
        LogLevel::Debug => "whep_client=debug,webrtc=info",
        LogLevel::Trace => "whep_client=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
