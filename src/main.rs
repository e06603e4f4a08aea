use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recast::collaborators::{ApiClient, Collaborators};
use recast::config::Config;
use recast::control::{ControlPlane, ControlServer, DiscoveryTarget};
use recast::metrics;
use recast::store::{CoordinationStore, RedisStore};
use recast::worker::{ControlAction, MultiQueueWorker};

#[derive(Parser)]
#[command(
    name = "recast",
    version,
    about = "Discover, rewrite and schedule posts across social platforms",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the multi-queue worker
    Worker {
        /// Also serve the control API
        #[arg(long, default_value = "false")]
        serve: bool,
    },

    /// Serve the control API only
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Enqueue a manual discovery run
    Enqueue {
        /// Owner of the monitors to scan; omit for every user
        #[arg(short, long)]
        user: Option<String>,

        /// Scan only this monitor (requires --user)
        #[arg(short, long)]
        monitor: Option<String>,
    },

    /// Send a control signal to the worker
    Signal {
        /// pause, resume or restart
        action: String,
    },

    /// Show worker liveness, queue depths and recent activity
    Status {
        /// Number of activity entries to show
        #[arg(short, long, default_value = "10")]
        activities: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Worker { serve } => {
            tracing::info!(serve = %serve, "Starting worker command");
            worker(config, serve).await?;
        }

        Commands::Serve { bind } => {
            tracing::info!(bind = ?bind, "Starting serve command");
            serve(config, bind).await?;
        }

        Commands::Enqueue { user, monitor } => {
            enqueue(config, user, monitor).await?;
        }

        Commands::Signal { action } => {
            signal(config, &action).await?;
        }

        Commands::Status { activities } => {
            status(config, activities).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("recast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("recast={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }

    Ok(())
}

async fn connect_store(config: &Config) -> Result<Arc<dyn CoordinationStore>> {
    let store = RedisStore::connect(&config.store)
        .await
        .with_context(|| format!("Failed to connect to {}", config.store.url))?;
    Ok(Arc::new(store))
}

async fn worker(config: Config, serve: bool) -> Result<()> {
    metrics::init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {e}"))?;

    let store = connect_store(&config).await?;
    let client = Arc::new(ApiClient::new(&config.api)?);
    let worker = MultiQueueWorker::from_config(&config, store.clone(), Collaborators::from_api(client));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let api = if serve {
        let server = ControlServer::new(ControlPlane::from_config(&config, store), &config.control)?;
        let mut rx = stop_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server.serve(shutdown).await {
                tracing::error!(error = %e, "Control API failed");
            }
        }))
    } else {
        None
    };

    let result = worker.run().await;
    let _ = stop_tx.send(true);
    if let Some(handle) = api {
        let _ = handle.await;
    }

    result.context("Worker stopped with an error")
}

async fn serve(mut config: Config, bind: Option<String>) -> Result<()> {
    metrics::init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {e}"))?;
    if let Some(bind) = bind {
        config.control.bind_address = bind;
    }

    let store = connect_store(&config).await?;
    let server = ControlServer::new(ControlPlane::from_config(&config, store), &config.control)?;
    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn enqueue(config: Config, user: Option<String>, monitor: Option<String>) -> Result<()> {
    let target = DiscoveryTarget::from_parts(user, monitor)?;
    let plane = ControlPlane::from_config(&config, connect_store(&config).await?);
    let task = plane.enqueue_discovery(target).await?;
    println!("Enqueued {} task {}", task.kind(), task.id);
    Ok(())
}

async fn signal(config: Config, action: &str) -> Result<()> {
    let action: ControlAction = action.parse()?;
    let plane = ControlPlane::from_config(&config, connect_store(&config).await?);
    let signal = plane.send_signal(action).await?;
    println!("Sent {} at {}", signal.action, signal.issued_at);
    Ok(())
}

async fn status(config: Config, activities: usize) -> Result<()> {
    let plane = ControlPlane::from_config(&config, connect_store(&config).await?);
    let status = plane.status().await?;

    println!("Worker");
    println!("{:-<40}", "");
    match status.last_heartbeat {
        Some(at) => println!("Alive:          yes (heartbeat {at})"),
        None => println!("Alive:          no"),
    }
    if let Some(paused) = status.stats.get("paused") {
        println!("Paused:         {paused}");
    }
    for (queue, depth) in &status.queues {
        println!("{queue:<32}{depth}");
    }
    println!("{:<32}{}", "delayed", status.delayed);

    let mut stats: Vec<_> = status.stats.iter().collect();
    stats.sort();
    if !stats.is_empty() {
        println!();
        println!("Counters");
        println!("{:-<40}", "");
        for (name, value) in stats {
            println!("{name:<32}{value}");
        }
    }

    if activities > 0 {
        println!();
        println!("Recent activity");
        println!("{:-<40}", "");
        for entry in plane.activities(activities).await? {
            println!("{}  {:?}  {}", entry.created_at, entry.kind, entry.message);
        }
    }

    Ok(())
}
