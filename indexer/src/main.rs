//! Rebuild and query rolling hash indices from time-bucketed storage.

use clap::{value_parser, Arg, ArgAction, Command};
use commonware_runtime::{tokio, Clock, Metrics, Runner};
use lcc::{
    index::{self, snapshot::epoch_millis, Indexer, Repository, DEFAULT_THRESHOLD},
    store::Disk,
};
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::{error, info};

mod config;
use config::Config;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Flag for JSON log output
const JSON_FLAG: &str = "json";

/// Rebuild indices on an interval (or once)
const REBUILD_CMD: &str = "rebuild";

/// Query the latest snapshot of a record type
const QUERY_CMD: &str = "query";

#[derive(Debug, Error)]
enum Error {
    #[error("index error: {0}")]
    Index(#[from] index::Error),
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
}

fn main() -> ExitCode {
    // Define application
    let matches = Command::new("lcc-indexer")
        .version(crate_version())
        .about("Rebuild and query rolling hash indices from time-bucketed storage.")
        .arg(
            Arg::new("config")
                .long("config")
                .required(true)
                .help("Path to YAML config file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(JSON_FLAG)
                .long(JSON_FLAG)
                .global(true)
                .help("Emit logs as JSON")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(REBUILD_CMD)
                .about("Rebuild and publish the index of every configured record type on an interval.")
                .arg(
                    Arg::new("once")
                        .long("once")
                        .help("Run a single rebuild cycle and exit")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new(QUERY_CMD)
                .about("Load the latest snapshot of a record type and print every match of a hash.")
                .arg(
                    Arg::new("record-type")
                        .long("record-type")
                        .required(true)
                        .value_parser(value_parser!(String)),
                )
                .arg(
                    Arg::new("hash")
                        .long("hash")
                        .required(true)
                        .value_parser(value_parser!(String)),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .help("Maximum Hamming distance of a match (defaults to the PDQ threshold)")
                        .value_parser(value_parser!(u32)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    if matches.get_flag(JSON_FLAG) {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_line_number(true)
            .with_file(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    // Load config
    let config_path = matches.get_one::<PathBuf>("config").unwrap();
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(?err, path = %config_path.display(), "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    // Run subcommand
    let executor = tokio::Runner::default();
    executor.start(|context| async move {
        let result = match matches.subcommand() {
            Some((REBUILD_CMD, matches)) => {
                rebuild(context, config, matches.get_flag("once")).await
            }
            Some((QUERY_CMD, matches)) => {
                let record_type = matches.get_one::<String>("record-type").unwrap();
                let hash = matches.get_one::<String>("hash").unwrap();
                let threshold = matches
                    .get_one::<u32>("threshold")
                    .copied()
                    .unwrap_or(DEFAULT_THRESHOLD);
                query(context, config, record_type, hash, threshold).await
            }
            Some((cmd, _)) => {
                error!(cmd, "invalid subcommand");
                return ExitCode::FAILURE;
            }
            None => {
                error!("no subcommand provided");
                return ExitCode::FAILURE;
            }
        };
        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(?err, "command failed");
                ExitCode::FAILURE
            }
        }
    })
}

/// Metric labels may only contain alphanumeric characters and underscores.
fn label(record_type: &str) -> String {
    record_type.replace('-', "_")
}

async fn rebuild(context: tokio::Context, config: Config, once: bool) -> Result<(), Error> {
    let store = Disk::new(config.storage_dir.clone());
    let mut indexers = Vec::with_capacity(config.record_types.len());
    for record_type in config.record_types.iter() {
        indexers.push(Indexer::new(
            context.with_label(&label(record_type)),
            store.clone(),
            config.indexer(record_type),
        )?);
    }

    if once {
        for mut indexer in indexers {
            let published = indexer.cycle().await?;
            info!(
                path = %published.path.display(),
                entries = published.entries,
                skipped = published.skipped,
                "rebuilt index"
            );
        }
        return Ok(());
    }

    // Indexers only exit if aborted
    let handles: Vec<_> = indexers.into_iter().map(Indexer::start).collect();
    futures::future::try_join_all(handles).await?;
    Ok(())
}

async fn query(
    context: tokio::Context,
    config: Config,
    record_type: &str,
    hash: &str,
    threshold: u32,
) -> Result<(), Error> {
    let now = context.current();
    let repository = Repository::new(context, Disk::new(config.storage_dir));
    let snapshot = repository.get_latest(record_type).await?;
    let age = now.duration_since(snapshot.created_at).unwrap_or_default();
    info!(
        record_type,
        created_at = epoch_millis(snapshot.created_at),
        ?age,
        entries = snapshot.index.len(),
        "loaded snapshot"
    );
    for m in snapshot.index.query(hash, threshold) {
        println!("{}\t{}\t{}", m.distance, m.content_id, m.hash);
    }
    Ok(())
}
