use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, LoggingConfig, StoreConfig, TurnstileConfig};
use turnstile::ratelimit::{Limiter, Method, RequestContext};
use turnstile::store::{CounterStore, MemoryStore, RedisStore};

/// Evaluate rate limit decisions against a configured counter store.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request method
    #[arg(short, long, default_value = "get")]
    method: Method,

    /// Route path template
    #[arg(short, long)]
    path: String,

    /// Caller identity, passed as the request credentials
    #[arg(short, long)]
    identity: Option<String>,

    /// Number of requests to evaluate
    #[arg(short = 'n', long, default_value_t = 1)]
    repeat: u32,

    /// Pause between requests in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    init_tracing(&config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn CounterStore> = match &config.store {
        StoreConfig::Memory { sweep_interval_secs } => {
            let store = Arc::new(MemoryStore::new());
            store.spawn_sweeper(Duration::from_secs(*sweep_interval_secs));
            info!("Using in-memory counter store");
            store
        }
        StoreConfig::Redis {
            url,
            response_timeout_ms,
        } => {
            let store = RedisStore::connect(url, Duration::from_millis(*response_timeout_ms)).await?;
            info!(url = %url, "Connected to Redis counter store");
            Arc::new(store)
        }
    };

    let limiter = Limiter::builder(store)
        .configure(&config)?
        .on_store_error(|e| warn!(error = %e, "Store error reported"))
        .build();
    limiter.initialize().await?;

    let mut request = RequestContext::builder(args.method, args.path.clone());
    if let Some(identity) = &args.identity {
        request = request.credentials(identity.clone());
    }
    let request = request.build();

    let run = async {
        for i in 0..args.repeat {
            if i > 0 && args.interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
            }
            let decision = limiter.decide(&request).await?;
            println!("{}", serde_json::to_string(&decision)?);
        }
        anyhow::Ok(())
    };

    tokio::select! {
        result = run => result?,
        _ = shutdown_signal() => {}
    }

    info!("Turnstile stopped");
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` takes precedence over the config.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_thread_ids(true).init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
