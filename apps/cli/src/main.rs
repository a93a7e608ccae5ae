#![deny(warnings)]

//! `colonyctl`: cron entry point for the colony economy. One subcommand per
//! batch job; reports go to stdout as JSON, logs to stderr.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use colony_core::{EconomyConfig, ProducerId, ResourceType, TradeSide};
use colony_events::EventCatalogue;
use colony_runtime::{AbortSignal, Engine};
use persistence::{default_sqlite_url, init_db, Store};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: colonyctl [options] <command> [args]

commands:
  migrate                               apply database migrations
  seed                                  create missing market rows
  production [--date D] [--resume-from ID]
                                        run the daily production cycle
  market-tick                           advance every market price
  events                                run the event lifecycle
  trade <producer> <resource> <buy|sell> <qty>
  modifiers <producer>                  show active event modifiers
  version

options:
  --config PATH       economy YAML (env COLONY_CONFIG)
  --events PATH       event catalogue YAML (default: built-in)
  --db URL            database URL (env COLONY_DATABASE_URL)
  --seed N            RNG seed
  --log-format F      json (default) or text";

#[derive(Clone, Copy, Debug, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug)]
struct Args {
    command: Option<String>,
    rest: Vec<String>,
    config: Option<PathBuf>,
    events: Option<PathBuf>,
    database_url: Option<String>,
    seed: Option<u64>,
    date: Option<NaiveDate>,
    resume_from: Option<ProducerId>,
    log_format: LogFormat,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        command: None,
        rest: Vec::new(),
        config: std::env::var_os("COLONY_CONFIG").map(PathBuf::from),
        events: None,
        database_url: std::env::var("COLONY_DATABASE_URL").ok(),
        seed: None,
        date: None,
        resume_from: None,
        log_format: LogFormat::Json,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().with_context(|| format!("{flag} needs a value"));
        match arg.as_str() {
            "--config" => args.config = Some(value("--config")?.into()),
            "--events" => args.events = Some(value("--events")?.into()),
            "--db" => args.database_url = Some(value("--db")?),
            "--seed" => args.seed = Some(value("--seed")?.parse().context("--seed")?),
            "--date" => args.date = Some(value("--date")?.parse().context("--date")?),
            "--resume-from" => {
                args.resume_from = Some(ProducerId(
                    value("--resume-from")?.parse().context("--resume-from")?,
                ))
            }
            "--log-format" => {
                args.log_format = match value("--log-format")?.as_str() {
                    "json" => LogFormat::Json,
                    "text" => LogFormat::Text,
                    other => bail!("unknown log format {other}"),
                }
            }
            "-h" | "--help" => args.command = Some("help".into()),
            _ => {
                if args.command.is_none() {
                    args.command = Some(arg);
                } else {
                    args.rest.push(arg);
                }
            }
        }
    }
    Ok(args)
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// SQLite creates the file but not its directory.
fn ensure_db_dir(url: &str) -> Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .filter(|p| !p.starts_with(":memory:"));
    if let Some(parent) = path.and_then(|p| Path::new(p).parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}

async fn open_store(args: &Args) -> Result<(Store, String)> {
    let url = args
        .database_url
        .clone()
        .unwrap_or_else(|| default_sqlite_url().to_string());
    ensure_db_dir(&url)?;
    let store = init_db(&url)
        .await
        .with_context(|| format!("opening {url}"))?;
    Ok((store, url))
}

async fn open_engine(args: &Args) -> Result<Engine> {
    let config = match &args.config {
        Some(path) => EconomyConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EconomyConfig::default(),
    };
    let catalogue = match &args.events {
        Some(path) => EventCatalogue::load(path)
            .with_context(|| format!("loading events {}", path.display()))?,
        None => EventCatalogue::builtin()?,
    };
    let (store, _) = open_store(args).await?;
    let engine = Engine::new(store, config, catalogue);
    Ok(match args.seed {
        Some(seed) => engine.with_seed(seed),
        None => engine,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn positional<'a>(args: &'a Args, index: usize, name: &str) -> Result<&'a str> {
    args.rest
        .get(index)
        .map(String::as_str)
        .with_context(|| format!("missing <{name}>\n\n{USAGE}"))
}

fn producer_arg(args: &Args, index: usize) -> Result<ProducerId> {
    let raw = positional(args, index, "producer")?;
    Ok(ProducerId(raw.parse().with_context(|| format!("bad producer id {raw}"))?))
}

async fn run(args: Args) -> Result<()> {
    let command = args.command.clone().unwrap_or_else(|| "help".into());
    match command.as_str() {
        "help" => println!("{USAGE}"),
        "version" => println!(
            "colonyctl {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        ),
        "migrate" => {
            let (store, url) = open_store(&args).await?;
            let prices = store.list_prices().await?;
            println!("DB migrated at {} ({} price rows)", url, prices.len());
        }
        "seed" => {
            let engine = open_engine(&args).await?;
            let created = engine.seed_market().await?;
            println!("seeded {created} market rows");
            engine.shutdown().await;
        }
        "production" => {
            let engine = open_engine(&args).await?;
            let summary = engine
                .run_production_cycle_from(args.date, args.resume_from, &AbortSignal::new())
                .await?;
            engine.shutdown().await;
            print_json(&summary)?;
        }
        "market-tick" => {
            let engine = open_engine(&args).await?;
            let report = engine.run_market_tick().await?;
            engine.shutdown().await;
            print_json(&report)?;
        }
        "events" => {
            let engine = open_engine(&args).await?;
            let report = engine.process_event_lifecycle().await?;
            engine.shutdown().await;
            print_json(&report)?;
        }
        "trade" => {
            let producer = producer_arg(&args, 0)?;
            let resource: ResourceType = positional(&args, 1, "resource")?
                .to_ascii_uppercase()
                .parse()?;
            let side: TradeSide = positional(&args, 2, "buy|sell")?
                .to_ascii_uppercase()
                .parse()?;
            let quantity: Decimal = positional(&args, 3, "qty")?
                .parse()
                .context("bad quantity")?;
            let engine = open_engine(&args).await?;
            let result = engine
                .execute_trade(producer, resource, side, quantity)
                .await;
            engine.shutdown().await;
            print_json(&result?)?;
        }
        "modifiers" => {
            let producer = producer_arg(&args, 0)?;
            let engine = open_engine(&args).await?;
            let modifiers = engine.get_active_modifiers(producer).await;
            engine.shutdown().await;
            print_json(&modifiers?)?;
        }
        other => bail!("unknown command {other}\n\n{USAGE}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    init_logging(args.log_format);
    info!(command = ?args.command, "colonyctl starting");
    run(args).await
}
