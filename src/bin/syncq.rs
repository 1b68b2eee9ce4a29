//! syncq CLI: operator interface to the add-on's sync queue.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use syncqueue::config::Config;
use syncqueue::telemetry::{TelemetryConfig, init_telemetry};
use syncqueue::{QueueOptions, SqliteQueue};

#[derive(Parser)]
#[command(name = "syncq", about = "Inspect and drive the durable sync queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a JSON document
    Append {
        /// Payload as JSON, e.g. '{"action":"scrobble"}'
        payload: String,
    },
    /// Dequeue the head entry
    Get {
        /// Wait up to this many seconds for an entry
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Show the head entry without removing it
    Peek,
    /// Print the number of queued entries
    Size,
    /// Print every queued entry in order
    List,
    /// Delete every queued entry
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _telemetry = init_telemetry(TelemetryConfig::from_config(&config, "syncq"))?;

    let options = QueueOptions {
        busy_timeout: config.busy_timeout,
        ..QueueOptions::default()
    };
    let queue = Arc::new(SqliteQueue::open_with(config.queue_path(), options)?);
    tracing::debug!(path = %queue.path().display(), "using queue");

    match cli.command {
        Command::Append { payload } => cmd_append(&queue, &payload),
        Command::Get { wait } => cmd_get(queue, wait).await,
        Command::Peek => cmd_peek(&queue),
        Command::Size => {
            println!("{}", queue.size()?);
            Ok(())
        }
        Command::List => cmd_list(&queue),
        Command::Purge => cmd_purge(&queue),
    }
}

fn cmd_append(queue: &SqliteQueue, payload: &str) -> anyhow::Result<()> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| anyhow::anyhow!("payload is not valid JSON: {e}"))?;
    let id = queue.append(&value)?;
    println!("{id}");
    Ok(())
}

async fn cmd_get(queue: Arc<SqliteQueue>, wait: Option<u64>) -> anyhow::Result<()> {
    // Waiting sleeps the calling thread, so keep it off the runtime workers.
    let entry = tokio::task::spawn_blocking(move || match wait {
        Some(secs) => queue.get_timeout(Duration::from_secs(secs)),
        None => queue.get(false),
    })
    .await??;
    print_entry(entry.as_ref())
}

fn cmd_peek(queue: &SqliteQueue) -> anyhow::Result<()> {
    print_entry(queue.peek()?.as_ref())
}

fn cmd_list(queue: &SqliteQueue) -> anyhow::Result<()> {
    for entry in queue.iter()? {
        println!("{}", serde_json::to_string(&entry?)?);
    }
    Ok(())
}

fn cmd_purge(queue: &SqliteQueue) -> anyhow::Result<()> {
    let removed = queue.purge()?;
    println!("Purged {removed} entries");
    Ok(())
}

fn print_entry(entry: Option<&serde_json::Value>) -> anyhow::Result<()> {
    match entry {
        Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
        None => println!("(empty)"),
    }
    Ok(())
}
