//! Command surface for the `demo-ingest` binary.
//!
//! - [`run_cli`] executes a parsed [`Cli`].
//! - [`run_with_db`] executes one [`Command`] against a `SQLite` path.
//! - [`JsonLinesDecoder`] feeds exported replays into the ingestion pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use demo_ingest_core::{ingest, CancelToken, DemoSource, IngestConfig, IngestReport, MatchId};
use demo_ingest_store_sqlite::{
    PlayerRow, PlayerStatsRow, RoundSummary, SqliteMatchStore, TableCount,
};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod jsonl;

pub use jsonl::JsonLinesDecoder;

const DEFAULT_LOG_FILTER: &str = "demo_ingest=info";

#[derive(Debug, Parser)]
#[command(name = "demo-ingest")]
#[command(about = "Ingest recorded match replays into SQLite")]
pub struct Cli {
    #[arg(long, default_value = "./demo_ingest.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest one JSON-lines replay export.
    Ingest(IngestArgs),
    /// List rounds of a match.
    Rounds(MatchArgs),
    /// Show per-player match statistics.
    Stats(MatchArgs),
    /// List players of a match.
    Players(MatchArgs),
    /// Row counts of every table.
    Tables(OutputArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long)]
    input: PathBuf,
    /// JSON file with `batch_size`, `position_interval`, `parse_positions`, `source`.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    position_interval: Option<u32>,
    #[arg(long)]
    no_positions: bool,
    #[arg(long)]
    source: Option<String>,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    /// Defaults to the most recently ingested match.
    #[arg(long)]
    match_id: Option<i64>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    #[arg(long)]
    json: bool,
}

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes the parsed top-level command.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_with_db(&cli.db, cli.command)
}

/// Executes one command against the `SQLite` database at `db_path`.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or the command fails.
pub fn run_with_db(db_path: &Path, command: Command) -> Result<()> {
    let mut store = SqliteMatchStore::open(db_path)?;
    store.migrate()?;
    run_command(command, &mut store)
}

/// Executes one command against an existing store handle.
///
/// # Errors
/// Returns an error when ingestion or a read query fails.
pub fn run_command(command: Command, store: &mut SqliteMatchStore) -> Result<()> {
    match command {
        Command::Ingest(args) => {
            let report = run_ingest(&args, store)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Rounds(args) => {
            let match_id = resolve_match_id(args.match_id, store)?;
            let rounds = store.round_summaries(match_id)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rounds)?);
            } else {
                print_rounds(match_id, &rounds);
            }
            Ok(())
        }
        Command::Stats(args) => {
            let match_id = resolve_match_id(args.match_id, store)?;
            let stats = store.player_match_stats(match_id)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(match_id, &stats);
            }
            Ok(())
        }
        Command::Players(args) => {
            let match_id = resolve_match_id(args.match_id, store)?;
            let players = store.match_players(match_id)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&players)?);
            } else {
                print_players(match_id, &players);
            }
            Ok(())
        }
        Command::Tables(args) => {
            let counts = store.table_counts()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                print_table_counts(&counts);
            }
            Ok(())
        }
    }
}

fn run_ingest(args: &IngestArgs, store: &mut SqliteMatchStore) -> Result<IngestReport> {
    let config = resolve_config(args)?;
    let mut decoder =
        JsonLinesDecoder::open(&args.input).map_err(|err| anyhow!(err.to_string()))?;
    info!(
        input = %args.input.display(),
        batch_size = config.batch_size,
        source = %config.source,
        "starting ingestion"
    );
    ingest(&mut decoder, store, &config, &CancelToken::new())
        .map_err(|err| anyhow!("ingestion of {} failed: {err}", args.input.display()))
}

/// File values first, then flags on top.
fn resolve_config(args: &IngestArgs) -> Result<IngestConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let body = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            let value: Value = serde_json::from_str(&body)
                .with_context(|| format!("invalid config JSON in {}", path.display()))?;
            IngestConfig::from_json(&value).map_err(|err| anyhow!(err.to_string()))?
        }
        None => IngestConfig::defaults(),
    };

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(position_interval) = args.position_interval {
        config.position_interval = position_interval;
    }
    if args.no_positions {
        config.parse_positions = false;
    }
    if let Some(source) = args.source.as_deref() {
        config.source = DemoSource::parse(source);
    }

    config.validate().map_err(|err| anyhow!(err.to_string()))?;
    Ok(config)
}

fn resolve_match_id(requested: Option<i64>, store: &SqliteMatchStore) -> Result<MatchId> {
    match requested {
        Some(value) => Ok(MatchId(value)),
        None => store
            .latest_match_id()?
            .ok_or_else(|| anyhow!("no ingested match found; run `ingest` first")),
    }
}

fn print_rounds(match_id: MatchId, rounds: &[RoundSummary]) {
    println!("match={} rounds={}", match_id, rounds.len());
    for round in rounds {
        println!(
            "round={} start_tick={} end_tick={} winner={} reason={} score_t={} score_ct={} kills={} damage_events={}",
            round.number,
            round.start_tick,
            round.end_tick.map_or_else(|| "n/a".to_string(), |tick| tick.to_string()),
            round.winner.as_deref().unwrap_or("n/a"),
            round.end_reason.as_deref().unwrap_or("n/a"),
            round.t_score.map_or_else(|| "n/a".to_string(), |score| score.to_string()),
            round.ct_score.map_or_else(|| "n/a".to_string(), |score| score.to_string()),
            round.kills,
            round.damage_events
        );
    }
}

fn print_stats(match_id: MatchId, stats: &[PlayerStatsRow]) {
    println!("match={} players={}", match_id, stats.len());
    for row in stats {
        println!(
            "player={} name={} team={} k={} d={} a={} hs%={:.1} kd={:.2} adr={:.1}",
            row.player_id,
            row.name,
            row.team,
            row.kills,
            row.deaths,
            row.assists,
            row.headshot_pct,
            row.kd_ratio,
            row.adr
        );
    }
}

fn print_players(match_id: MatchId, players: &[PlayerRow]) {
    println!("match={} players={}", match_id, players.len());
    for row in players {
        println!(
            "player={} slot={} steam_id={} name={} team={} bot={}",
            row.player_id,
            row.slot,
            row.steam_id,
            row.name,
            row.team,
            if row.is_bot { "yes" } else { "no" }
        );
    }
}

fn print_table_counts(counts: &[TableCount]) {
    for entry in counts {
        println!("{}={}", entry.table, entry.rows);
    }
}
