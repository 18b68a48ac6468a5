use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use silo::logging::{init_logging, LogArgs};
use silo::{error_response, spawn_result_stream, Database};
use tokio_util::sync::CancellationToken;

/// silo answers filter and aggregation queries over a prepared
/// database of aligned sequences.
#[derive(Debug, Parser)]
#[command(name = "silo", version)]
struct Silo {
    #[command(flatten)]
    log_args: LogArgs,

    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
#[command(rename_all = "kebab-case")]
enum Subcommand {
    /// Run one query against a database directory and print the result
    /// as NDJSON on stdout.
    Query(QueryArgs),
    /// Print row counts and index sizes of a database directory.
    Info(InfoArgs),
}

#[derive(Debug, clap::Args)]
struct QueryArgs {
    /// The database directory to query.
    #[arg(long)]
    database: PathBuf,

    /// File holding the query JSON; reads stdin when omitted.
    #[arg(long)]
    query: Option<PathBuf>,

    /// Emit entries as they are produced instead of collecting them
    /// into the trailing queryResult envelope.
    #[arg(long)]
    streaming: bool,
}

#[derive(Debug, clap::Args)]
struct InfoArgs {
    /// The database directory to inspect.
    #[arg(long)]
    database: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Silo::parse();
    init_logging(&cli.log_args);
    match cli.subcommand {
        Subcommand::Query(args) => run_query(args),
        Subcommand::Info(args) => run_info(args),
    }
}

fn run_query(args: QueryArgs) -> anyhow::Result<()> {
    let query_json = match &args.query {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let database = Database::load(&args.database)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async move {
        let cancellation = CancellationToken::new();
        let result = match database.execute_query(&query_json, &cancellation).await {
            Ok(result) => result,
            Err(error) => return Err(error),
        };

        let mut collected = Vec::new();
        let mut batches = spawn_result_stream(result, cancellation);
        while let Some(batch) = batches.recv().await {
            let batch = batch?;
            for entry in &batch {
                println!("{}", serde_json::to_string(entry).expect("entries are JSON maps"));
            }
            if !args.streaming {
                collected.extend(batch);
            }
        }
        if !args.streaming {
            let envelope = serde_json::json!({ "queryResult": collected });
            println!("{envelope}");
        }
        Ok(())
    });

    if let Err(error) = outcome {
        tracing::error!(status = error.status_code(), %error, "query failed");
        println!("{}", error_response(&error));
        std::process::exit(1);
    }
    Ok(())
}

fn run_info(args: InfoArgs) -> anyhow::Result<()> {
    let database = Database::load(&args.database)?;
    let info = database.info();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
