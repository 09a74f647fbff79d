//! Binary entry point for the tristore command line tool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tristore::{
    query::{ExplainNode, PlanGen, QueryGraph},
    storage::{predicate_set::PredicateSetStatistics, SegmentStats, Triple},
    DataOrder, Database, DatabaseBuilder, StoreConfig, TristoreError,
};

#[derive(Parser, Debug)]
#[command(
    name = "tristore",
    version,
    about = "Bulk loading, statistics and plan inspection for tristore databases",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, env = "TRISTORE_CONFIG", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "TRISTORE_THREADS", help = "Worker threads for execution")]
    threads: Option<usize>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bulk-load whitespace separated integer triples into a new database
    Load {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "TRIPLES")]
        triples: PathBuf,
    },
    /// Print segment sizes and predicate set statistics
    Stats {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
    /// Optimize a JSON query graph and print the chosen plan
    Plan {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "QUERY")]
        query: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct LoadReport {
    triples: u64,
    pages: u64,
}

#[derive(Debug, Serialize)]
struct OrderStats {
    order: &'static str,
    facts: SegmentStats,
    aggregated: SegmentStats,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    triples: u64,
    pages: u64,
    orders: Vec<OrderStats>,
    fully_aggregated: Vec<(&'static str, SegmentStats)>,
    predicate_sets: PredicateSetStatistics,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    cardinality: f64,
    costs: f64,
    fingerprint: String,
    plan: ExplainNode,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.scheduler.threads = threads;
    }
    info!(
        buffer_size = config.buffer.buffer_size,
        threads = config.scheduler.worker_threads(),
        "cli.config"
    );

    match cli.command {
        Command::Load { db_path, triples } => {
            let input = read_triples(&triples)?;
            let db = DatabaseBuilder::new()
                .buffer_options(config.buffer.clone())
                .predicate_set_options(config.predicate_sets.clone())
                .build(&db_path, input)?;
            let report = LoadReport {
                triples: db.triples(),
                pages: db.pages(),
            };
            emit(cli.format, &report, || {
                println!("Loaded {} triples into {} pages", report.triples, report.pages)
            })?;
        }
        Command::Stats { db_path } => {
            let db = Database::open(&db_path, config.buffer.clone())?;
            let report = stats(&db);
            emit(cli.format, &report, || print_stats_text(&report))?;
        }
        Command::Plan { db_path, query } => {
            let text = fs::read_to_string(&query)?;
            let mut graph: QueryGraph = serde_json::from_str(&text)?;
            graph.validate()?;
            graph.construct_edges();
            let db = Database::open(&db_path, config.buffer.clone())?;
            let planner = PlanGen::new(config.planner.clone());
            let Some(tree) = planner.translate(&db, &graph)? else {
                eprintln!("no plan: the query cannot be optimized");
                return Ok(ExitCode::from(2));
            };
            let root = tree.root_plan();
            let report = PlanReport {
                cardinality: root.cardinality,
                costs: root.costs,
                fingerprint: format!("{:016x}", tree.fingerprint()),
                plan: tree.explain(),
            };
            emit(cli.format, &report, || {
                print!("{}", report.plan);
                println!("fingerprint={}", report.fingerprint);
            })?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

/// Parses one `subject predicate object` triple of integer ids per line.
/// Blank lines and lines starting with `#` are skipped.
fn read_triples(path: &Path) -> Result<Vec<Triple>, TristoreError> {
    let text = fs::read_to_string(path)?;
    let mut triples = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let ids: Vec<u32> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|err| TristoreError::InvalidOwned(format!("line {}: {err}", number + 1)))?;
        match *ids.as_slice() {
            [s, p, o] => triples.push((s, p, o)),
            _ => {
                return Err(TristoreError::InvalidOwned(format!(
                    "line {}: expected 3 ids, found {}",
                    number + 1,
                    ids.len()
                )))
            }
        }
    }
    Ok(triples)
}

fn stats(db: &Database) -> StatsReport {
    let orders = DataOrder::ALL
        .iter()
        .map(|&order| OrderStats {
            order: order.name(),
            facts: db.get_facts(order).stats(),
            aggregated: db.get_aggregated_facts(order).stats(),
        })
        .collect();
    let fully_aggregated = [DataOrder::Spo, DataOrder::Osp, DataOrder::Pso]
        .iter()
        .map(|&order| (order.name(), db.get_fully_aggregated_facts(order).stats()))
        .collect();
    StatsReport {
        triples: db.triples(),
        pages: db.pages(),
        orders,
        fully_aggregated,
        predicate_sets: db.get_predicate_sets().get_statistics(),
    }
}

fn print_stats_text(report: &StatsReport) {
    println!("Database: triples={} pages={}", report.triples, report.pages);
    println!();
    println!("Facts:");
    for entry in &report.orders {
        println!(
            "  {} pages={} level1={} level2={} cardinality={}",
            entry.order,
            entry.facts.pages,
            entry.facts.level1_groups,
            entry.facts.level2_groups,
            entry.facts.cardinality
        );
    }
    println!();
    println!("Aggregated:");
    for entry in &report.orders {
        println!(
            "  {} pages={} level1={} level2={}",
            entry.order, entry.aggregated.pages, entry.aggregated.level1_groups, entry.aggregated.level2_groups
        );
    }
    println!();
    println!("Fully aggregated:");
    for (name, stats) in &report.fully_aggregated {
        println!("  {} pages={} level1={}", &name[..1], stats.pages, stats.level1_groups);
    }
    println!();
    let sets = report.predicate_sets;
    println!(
        "Predicate sets: count={} entries={} size={}",
        sets.count, sets.entries, sets.size
    );
}
