use clap::{Parser, Subcommand};
use futures::StreamExt;
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use transfer_process_store::application::manager::TransferProcessManager;
use transfer_process_store::config::load_config;
use transfer_process_store::domain::ports::{Clock, ClockRef, LeaseManager, TransferProcessStore};
use transfer_process_store::domain::process::{ProcessType, TransferProcess, TransferProcessState};
use transfer_process_store::domain::query::QuerySpec;
use transfer_process_store::infrastructure::clock::SystemClock;
use transfer_process_store::infrastructure::sql::schema::create_schema;
use transfer_process_store::infrastructure::sql::store::SqlTransferProcessStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database URL, e.g. sqlite://tp.db?mode=rwc. Overrides the configuration.
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the tables if they do not exist
    Init,
    /// Create a transfer process in the INITIAL state
    Create {
        id: String,
        #[arg(long = "type", default_value = "consumer", value_parser = parse_process_type)]
        process_type: ProcessType,
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Print a transfer process and its current lease
    Show { id: String },
    /// Print transfer processes as JSON lines
    List {
        #[arg(long = "state")]
        states: Vec<TransferProcessState>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Move a transfer process to a new state
    Transition {
        id: String,
        state: TransferProcessState,
    },
}

fn parse_process_type(s: &str) -> std::result::Result<ProcessType, String> {
    ProcessType::parse(s).ok_or_else(|| format!("unknown process type '{}'", s))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).into_diagnostic()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).into_diagnostic()?;
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }

    let clock: ClockRef = Arc::new(SystemClock);
    let store = SqlTransferProcessStore::open(&config, clock.clone())
        .await
        .into_diagnostic()?;

    match cli.command {
        Command::Init => {
            create_schema(store.pool(), store.dialect())
                .await
                .into_diagnostic()?;
        }
        Command::Create {
            id,
            process_type,
            correlation_id,
        } => {
            let mut process = TransferProcess::new(id, process_type, clock.now_ms());
            if let Some(correlation_id) = correlation_id {
                process = process.with_correlation_id(correlation_id);
            }
            store.create(process.clone()).await.into_diagnostic()?;
            print_json(&process)?;
        }
        Command::Show { id } => {
            let process = store
                .find_by_id(&id)
                .await
                .into_diagnostic()?
                .ok_or_else(|| miette!("Transfer process {} not found", id))?;
            let lease = store.lease_manager().current(&id).await.into_diagnostic()?;
            print_json(&serde_json::json!({ "process": process, "lease": lease }))?;
        }
        Command::List { states, limit } => {
            let mut query = QuerySpec::new();
            for state in states {
                query = query.with_state(state);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }

            let mut results = store.find_all(query);
            while let Some(process) = results.next().await {
                print_json(&process.into_diagnostic()?)?;
            }
        }
        Command::Transition { id, state } => {
            let manager = TransferProcessManager::new(
                Box::new(store.clone()),
                Box::new(store.lease_manager()),
                clock,
                config.lease_holder.clone(),
                config.lease_duration(),
            );
            let process = manager
                .transition(&id, state, |_| {})
                .await
                .into_diagnostic()?;
            print_json(&process)?;
        }
    }

    Ok(())
}
