//! Command-line entry point for the courier mail delivery subsystem.
//!
//! Subcommands cover the operational surface: a synchronous test send, the
//! queue worker, and inspection/maintenance of the pending and failed
//! lists.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use courier::{Mailer, Worker};
use courier_common::config::Config;
use courier_common::{EventBus, Signal, SystemClock};
use courier_message::ContentKind;
use courier_queue::{MemoryStore, Queue, RedisStore, Store};
use courier_ratelimit::RateLimiter;

/// Manage outbound mail delivery and its queue
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Send mail and manage the delivery queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "courier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a test message synchronously
    Test {
        /// Recipient address
        email: String,
    },
    /// Run the queue worker until signalled
    Work {
        /// Queue name (defaults to the configured default queue)
        queue: Option<String>,
    },
    /// Print the pending job count
    List {
        /// Queue name
        queue: Option<String>,
    },
    /// List failed jobs
    Failed,
    /// Move failed job(s) back onto the active queue
    Retry {
        /// Failed job id
        id: Option<String>,

        /// Retry every failed job
        #[arg(long)]
        all: bool,
    },
    /// Delete all pending jobs
    Clear {
        /// Queue name
        queue: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete all failed jobs
    Flush {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete all pending and failed jobs
    Purge {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Test { email } => cmd_test(&config, &email).await,
        Commands::Work { queue } => cmd_work(&config, queue).await,
        Commands::List { queue } => {
            let queue_handle = connect_queue(&config).await?;
            let pending = queue_handle.size(queue.as_deref()).await?;
            println!(
                "{} pending job(s) on '{}'",
                pending,
                queue.as_deref().unwrap_or(&config.queue.default_queue)
            );
            Ok(())
        }
        Commands::Failed => cmd_failed(&config).await,
        Commands::Retry { id, all } => cmd_retry(&config, id, all).await,
        Commands::Clear { queue, yes } => {
            let name = queue
                .clone()
                .unwrap_or_else(|| config.queue.default_queue.clone());
            if !yes && !confirm(&format!("Delete all pending jobs on '{name}'?"))? {
                return Ok(());
            }
            let queue_handle = connect_queue(&config).await?;
            let existed = queue_handle.clear(queue.as_deref()).await?;
            println!(
                "{}",
                if existed {
                    "pending jobs deleted"
                } else {
                    "queue was already empty"
                }
            );
            Ok(())
        }
        Commands::Flush { yes } => {
            if !yes && !confirm("Delete all failed jobs?")? {
                return Ok(());
            }
            let queue_handle = connect_queue(&config).await?;
            let existed = queue_handle.clear_failed().await?;
            println!(
                "{}",
                if existed {
                    "failed jobs deleted"
                } else {
                    "failed list was already empty"
                }
            );
            Ok(())
        }
        Commands::Purge { yes } => {
            if !yes && !confirm("Delete all pending AND failed jobs?")? {
                return Ok(());
            }
            let queue_handle = connect_queue(&config).await?;
            queue_handle.clear(None).await?;
            queue_handle.clear_failed().await?;
            println!("queue purged");
            Ok(())
        }
    }
}

/// Builds a mailer wired to the given store.
fn build_mailer(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<(Arc<Mailer>, Arc<Queue>, EventBus)> {
    let clock = SystemClock::shared();
    let events = EventBus::new();
    let queue = Arc::new(Queue::new(store, Arc::clone(&clock), &config.queue));
    let limiter = Arc::new(
        RateLimiter::new(&config.rate_limiter, Arc::clone(&clock))
            .context("initialising rate limiter")?,
    );
    let mailer = Arc::new(
        Mailer::new(config, Arc::clone(&queue), limiter, clock, events.clone())
            .context("building mail transport")?,
    );
    Ok((mailer, queue, events))
}

async fn connect_queue(config: &Config) -> anyhow::Result<Queue> {
    let store = RedisStore::connect(&config.queue.connection)
        .await
        .context("connecting to the queue store")?;
    Ok(Queue::new(
        Arc::new(store),
        SystemClock::shared(),
        &config.queue,
    ))
}

async fn cmd_test(config: &Config, email: &str) -> anyhow::Result<()> {
    // The test send never touches the queue; an in-memory store keeps the
    // wiring intact without requiring a live Redis.
    let (mailer, _, _) = build_mailer(config, Arc::new(MemoryStore::new()))?;

    mailer
        .send(
            email,
            "Courier test message",
            "<p>This is a test message from the courier mail subsystem.</p>\
             <p>If you are reading it, transport configuration works.</p>",
            ContentKind::Html,
            Vec::new(),
        )
        .await
        .context("sending test message")?;

    println!("test message sent to {email}");
    Ok(())
}

async fn cmd_work(config: &Config, queue_name: Option<String>) -> anyhow::Result<()> {
    let store = RedisStore::connect(&config.queue.connection)
        .await
        .context("connecting to the queue store")?;
    let (mailer, queue, events) = build_mailer(config, Arc::new(store))?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_signal_listener(shutdown_tx);

    let worker = Worker::new(
        mailer,
        queue,
        config.queue.worker,
        queue_name,
        events,
        shutdown_rx,
    );
    let processed = worker.run().await;
    println!("worker stopped after {processed} job(s)");
    Ok(())
}

fn spawn_signal_listener(shutdown: broadcast::Sender<Signal>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::error!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("termination signal received, finishing in-flight work");
        let _ = shutdown.send(Signal::Shutdown);
    });
}

async fn cmd_failed(config: &Config) -> anyhow::Result<()> {
    let queue = connect_queue(config).await?;
    let failed = queue.failed_jobs(50).await?;
    if failed.is_empty() {
        println!("no failed jobs");
        return Ok(());
    }

    for record in failed {
        let failed_at = chrono::DateTime::from_timestamp(record.failed_at as i64, 0)
            .map_or_else(|| record.failed_at.to_string(), |t| t.to_rfc3339());
        println!(
            "{}  {}  [{}] {}  ({})",
            record.id, failed_at, record.error.kind, record.error.message, record.job.job_class
        );
    }
    Ok(())
}

async fn cmd_retry(config: &Config, id: Option<String>, all: bool) -> anyhow::Result<()> {
    let queue = connect_queue(config).await?;
    match (id, all) {
        (_, true) => {
            let replayed = queue.retry_all_failed().await?;
            println!("{replayed} job(s) moved back to the active queue");
            Ok(())
        }
        (Some(id), false) => {
            if queue.retry_failed(&id).await? {
                println!("job {id} moved back to the active queue");
                Ok(())
            } else {
                anyhow::bail!("no failed job with id {id}");
            }
        }
        (None, false) => anyhow::bail!("pass a job id or --all"),
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let confirmed = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    if !confirmed {
        println!("aborted");
    }
    Ok(confirmed)
}
