use std::collections::BTreeSet;
use std::path::PathBuf;

mod config;
mod date;
mod db;
mod error;
mod models;
mod pipeline;
mod services;
mod source;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use pipeline::Relay;
use services::TelegramNotifier;

#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    once: bool,
    retire: Option<BTreeSet<String>>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--config needs a path".into()))?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "--once" => parsed.once = true,
            "--retire" => {
                let list = iter
                    .next()
                    .ok_or_else(|| AppError::Config("--retire needs a comma separated source list".into()))?;
                let names: BTreeSet<String> = list
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                parsed.retire = Some(names);
            }
            other => return Err(AppError::Config(format!("unknown argument: {other}"))),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info by default, RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args)?;

    let config = Config::load(args.config_path.as_deref())?;
    let repository = Repository::new(&config.db_path).await?;
    let pending = repository.pending_count().await?;
    tracing::info!(db = %config.db_path, pending, "Store opened");

    // Maintenance: silence the backlog of retired sources and exit
    if let Some(sources) = args.retire {
        let count = repository.retire_sources(&sources).await?;
        println!("Retired {} pending articles from {:?}", count, sources);
        return Ok(());
    }

    let notifier = TelegramNotifier::new(&config.telegram)?;
    let relay = Relay::new(&config, repository, notifier)?;

    if args.once {
        relay.run_cycle().await?;
        return Ok(());
    }

    relay.run_forever().await
}
