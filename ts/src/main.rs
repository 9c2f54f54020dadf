//! timerstore - inspect a local timer store
//!
//! Read-only views over records, the sync outbox and the conflict log.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result};
use timerstore::Store;

#[derive(Parser)]
#[command(name = "timerstore", about = "Inspect a local timer store", version)]
struct Cli {
    /// Store directory
    #[arg(short, long)]
    path: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List collections that hold records
    Collections,
    /// List every record in a collection
    List {
        /// Collection name (e.g. captures, detentions)
        collection: String,
    },
    /// Show changes waiting to be pushed
    Pending,
    /// Show resolved reconciliation conflicts
    Conflicts,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = Store::open(&cli.path).context(format!("Failed to open store at {}", cli.path.display()))?;

    match cli.command {
        Command::Collections => {
            for name in store.collections()? {
                println!("{}", name);
            }
        }
        Command::List { collection } => {
            let rows = store.list_raw(&collection)?;
            if cli.json {
                let values: Vec<_> = rows.into_iter().map(|(_, v)| v).collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else if rows.is_empty() {
                println!("{}", format!("No records in '{}'", collection).dimmed());
            } else {
                for (id, value) in rows {
                    println!("{} {}", id.bold(), value);
                }
            }
        }
        Command::Pending => {
            let pending = store.pending()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else if pending.is_empty() {
                println!("{}", "Outbox is empty".green());
            } else {
                for entry in pending {
                    let flag = if entry.stale {
                        "not yet synced".red().to_string()
                    } else {
                        "pending".yellow().to_string()
                    };
                    println!(
                        "{} {} {} attempts={} {}",
                        entry.op_id.dimmed(),
                        entry.kind.bold(),
                        entry.record_id,
                        entry.attempts,
                        flag
                    );
                }
            }
        }
        Command::Conflicts => {
            let conflicts = store.list_conflicts()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else if conflicts.is_empty() {
                println!("{}", "No conflicts recorded".green());
            } else {
                for c in conflicts {
                    println!(
                        "#{} {}/{} resolved by {} at {}",
                        c.id, c.collection, c.record_id, c.strategy, c.resolved_at
                    );
                }
            }
        }
    }

    Ok(())
}
