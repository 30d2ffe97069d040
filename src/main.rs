//! Spindle - An In-Memory Key-Value Server
//!
//! This is the main entry point for the Spindle server.
//! It sets up the timing wheel, storage engine, and TCP listener.

use clap::Parser;
use spindle::server;
use spindle::{Dispatcher, ServerConfig, StorageEngine, TimingWheel, WheelConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spindle", version, about = "In-memory key-value server speaking RESP")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "SPINDLE_HOST", default_value = spindle::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "SPINDLE_PORT", default_value_t = spindle::DEFAULT_PORT)]
    port: u16,

    /// Duration of one timing wheel tick, in milliseconds
    #[arg(long, env = "SPINDLE_TICK_MS", default_value_t = 1)]
    tick_ms: u64,

    /// Number of buckets in the timing wheel
    #[arg(long, env = "SPINDLE_WHEEL_SIZE", default_value_t = 1000)]
    wheel_size: usize,

    /// Maximum number of concurrent clients. Default: unlimited
    #[arg(long, env = "SPINDLE_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Seconds to wait for open connections on shutdown before closing them
    #[arg(long, env = "SPINDLE_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    shutdown_timeout_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_connections: args.max_connections,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            wheel: WheelConfig {
                tick: Duration::from_millis(args.tick_ms),
                size: args.wheel_size,
            },
        }
    }
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
   ____     _         ____
  / __/__  (_)__  ___/ / /__
 _\ \/ _ \/ / _ \/ _  / / -_)
/___/ .__/_/_//_/\_,_/_/\__/
   /_/

Spindle v{} - In-Memory Key-Value Server
──────────────────────────────────────────
Server started on {}
Timing wheel: {} buckets x {:?}

Use Ctrl+C to shutdown gracefully.
"#,
        spindle::VERSION,
        config.bind_address(),
        config.wheel.size,
        config.wheel.tick,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from(Args::parse());

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    print_banner(&config);

    // The wheel owns every expiry timer; its driver task advances it.
    let wheel = Arc::new(TimingWheel::new(config.wheel));
    let driver = wheel.start()?;

    let storage = Arc::new(StorageEngine::with_wheel(Arc::clone(&wheel)));
    let dispatcher = Dispatcher::with_builtin(Arc::clone(&storage));
    info!("Storage engine initialized with 64 shards");

    let listener = TcpListener::bind(config.bind_address()).await?;

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    server::run(listener, dispatcher, &config, shutdown).await?;

    driver.shutdown().await;

    let stats = storage.stats();
    info!(
        keys = stats.keys,
        expired = stats.expired,
        "Server shutdown complete"
    );
    Ok(())
}
