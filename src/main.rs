//! djq - query execution service and job polling client.

use dj_query::cli::{Cli, Command, DataArgs, QueryArgs};
use dj_query::client::{BackoffPolicy, DjClient};
use dj_query::config::Config;
use dj_query::error::{DjqError, Result};
use dj_query::logging;
use dj_query::query::{QueryService, QueryWithResults};
use dj_query::server::{self, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    logging::init_stderr_logging();

    if let Err(e) = run().await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load(&config_path)?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let service = QueryService::open(&config).await?;
            let state = AppState::new(service, &config);
            server::serve(state, &config.server.bind).await
        }
        Command::Query(args) => run_query(&config, &args).await,
        Command::Data(args) => run_data(config, &args).await,
    }
}

/// Runs a query in-process. Asynchronous submissions print the scheduled
/// record, then wait for the background run and print the final one.
async fn run_query(config: &Config, args: &QueryArgs) -> Result<()> {
    let service = QueryService::open(config).await?;
    let submitted = service
        .submit(args.to_query_create(), args.connection_uri.clone())
        .await?;
    print_json(&submitted)?;

    if submitted.state().is_terminal() {
        return Ok(());
    }

    let backoff = BackoffPolicy::from_config(&config.poller);
    let mut wait = backoff.first();
    loop {
        tokio::time::sleep(wait).await;
        let current = service.get(submitted.query.id).await?.ok_or_else(|| {
            DjqError::internal(format!("Query {} disappeared", submitted.query.id))
        })?;
        if current.state().is_terminal() {
            return print_json(&current);
        }
        wait = backoff.next(wait);
    }
}

async fn run_data(mut config: Config, args: &DataArgs) -> Result<()> {
    if let Some(base_url) = &args.base_url {
        config.client.base_url = base_url.clone();
    }
    let client = DjClient::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let table = client
        .fetch_data(args.to_request(), cancel, |links| {
            eprintln!("See the following links for more information:");
            for link in links {
                eprintln!("  {link}");
            }
        })
        .await?;

    if args.json {
        let records = serde_json::to_string_pretty(&table.records())
            .map_err(|e| DjqError::internal(format!("Failed to serialize rows: {e}")))?;
        println!("{records}");
    } else {
        print!("{table}");
    }
    Ok(())
}

fn print_json(result: &QueryWithResults) -> Result<()> {
    let json = serde_json::to_string_pretty(result)
        .map_err(|e| DjqError::internal(format!("Failed to serialize query: {e}")))?;
    println!("{json}");
    Ok(())
}
