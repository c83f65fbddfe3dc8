use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rating_kernel_api::{CompareRequest, ScoreApi, API_CONTRACT_VERSION};
use rating_kernel_ingest::load_ratings;
use rating_kernel_sink_sqlite::SqliteSink;
use serde_json::{json, Value};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rk")]
#[command(about = "Rating Kernel CLI")]
struct Cli {
    #[arg(long, default_value = "./ratings.csv")]
    ratings: PathBuf,

    #[arg(long, default_value = "./score_queue.sqlite3")]
    queue_db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Dataset {
        #[command(subcommand)]
        command: DatasetCommand,
    },
    Compare(CompareArgs),
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DatasetCommand {
    Info,
}

#[derive(Debug, Args)]
struct CompareArgs {
    #[arg(long)]
    left: String,
    #[arg(long)]
    right: String,
    #[arg(long)]
    session_token: Option<String>,
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    List(QueueListArgs),
}

#[derive(Debug, Args)]
struct QueueListArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let payload = match cli.command {
        Command::Dataset { command: DatasetCommand::Info } => cmd_dataset_info(&cli.ratings)?,
        Command::Compare(args) => cmd_compare(&cli.ratings, &cli.queue_db, &args)?,
        Command::Queue { command: QueueCommand::List(args) } => {
            cmd_queue_list(&cli.queue_db, args.limit)?
        }
    };

    let rendered =
        serde_json::to_string_pretty(&payload).context("failed to render command output")?;
    println!("{rendered}");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn cmd_dataset_info(ratings: &Path) -> Result<Value> {
    let (store, summary) = load_ratings(ratings)?;
    Ok(json!({
        "cli_contract_version": CLI_CONTRACT_VERSION,
        "dataset": summary,
        "entity_ids": store.entity_ids().map(ToString::to_string).collect::<Vec<_>>(),
    }))
}

fn cmd_compare(ratings: &Path, queue_db: &Path, args: &CompareArgs) -> Result<Value> {
    let (store, _) = load_ratings(ratings)?;
    let api = ScoreApi::new(Arc::new(store), queue_db.to_path_buf());

    let response = api.compare(&CompareRequest {
        left: args.left.clone(),
        right: args.right.clone(),
        session_token: args.session_token.clone(),
    })?;

    Ok(json!({
        "cli_contract_version": CLI_CONTRACT_VERSION,
        "api_contract_version": API_CONTRACT_VERSION,
        "result": response,
    }))
}

fn cmd_queue_list(queue_db: &Path, limit: usize) -> Result<Value> {
    let sink = SqliteSink::open(queue_db)?;
    let queued = sink.list(limit)?;
    Ok(json!({
        "cli_contract_version": CLI_CONTRACT_VERSION,
        "queued": queued,
        "total": sink.len()?,
    }))
}
