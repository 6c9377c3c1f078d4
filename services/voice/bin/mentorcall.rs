//! Command-line companion for voice capture calls.
//!
//! Inspects what a call works with: the tool schema advertised to the agent
//! and the draft persisted between calls.

use anyhow::Context;
use clap::{Parser, Subcommand};
use mentorcall_core::{DraftStore, FileStorage, Variant, build_tool_schema};
use mentorcall_voice::Config;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "mentorcall", version, about = "Voice draft capture for mentoring posts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tool schema advertised for a variant.
    Schema {
        /// `seek_mentor` or `seek_mentee`.
        #[arg(long, default_value = "seek_mentor")]
        variant: Variant,
    },
    /// Show the persisted variant and draft completion.
    Status,
    /// Print the persisted draft as JSON.
    Draft,
    /// Remove the persisted draft.
    Clear,
}

fn open_store(config: &Config) -> DraftStore {
    DraftStore::open(Arc::new(FileStorage::new(&config.draft_store_dir)))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Schema { variant } = cli.command {
        let schema = build_tool_schema(variant);
        println!(
            "{}",
            serde_json::to_string_pretty(&schema).context("Failed to serialize tool schema")?
        );
        return Ok(());
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(dir = %config.draft_store_dir.display(), "Opening draft store");
    let store = open_store(&config);

    match cli.command {
        Command::Schema { .. } => {}
        Command::Status => {
            let Some(variant) = store.variant() else {
                println!("No draft in progress.");
                return Ok(());
            };
            let completion = store.completion(variant);
            println!("variant:  {}", variant);
            println!(
                "progress: {}/{} ({:.0}%)",
                completion.filled.len(),
                completion.total,
                completion.ratio() * 100.0
            );
            if !completion.missing.is_empty() {
                println!("missing:  {}", completion.missing.join(", "));
            }
        }
        Command::Draft => {
            let draft = store.draft();
            println!(
                "{}",
                serde_json::to_string_pretty(&*draft).context("Failed to serialize draft")?
            );
        }
        Command::Clear => {
            store.clear().context("Failed to clear the persisted draft")?;
            info!("Draft cleared");
        }
    }

    Ok(())
}
