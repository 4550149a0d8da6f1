//! gridcalc CLI - dependency graph inspection and recalculation tool

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gridcalc_core::{CellAddress, CellContent, CellStore, CellValue};
use gridcalc_engine::{
    extract_references, CalcEngine, CellEvaluator, EvalError, Evaluation, DEFAULT_MAX_ITERATIONS,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "gridcalc")]
#[command(
    author,
    version,
    about = "Inspect and recalculate spreadsheet dependency graphs"
)]
struct Cli {
    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the order in which cells would be evaluated
    Order {
        /// Sheet file: JSON object mapping addresses to cell text
        input: PathBuf,
    },

    /// List circular reference chains
    Cycles {
        /// Sheet file: JSON object mapping addresses to cell text
        input: PathBuf,
    },

    /// Show the precedents and dependents of a cell
    Deps {
        /// Sheet file: JSON object mapping addresses to cell text
        input: PathBuf,

        /// Cell to inspect (e.g. B2)
        cell: String,
    },

    /// Recalculate the sheet with the reference-sum evaluator
    ///
    /// A formula's value is the sum of the numeric values of the cells it
    /// references; a formula without references evaluates its own text.
    Recalc {
        /// Sheet file: JSON object mapping addresses to cell text
        input: PathBuf,

        /// Maximum number of cells evaluated in the pass
        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Order { input } => show_order(&input),
        Commands::Cycles { input } => show_cycles(&input),
        Commands::Deps { input, cell } => show_deps(&input, &cell),
        Commands::Recalc {
            input,
            max_iterations,
            json,
        } => recalc(&input, max_iterations, json).await,
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Load a sheet file into a fresh cell store, registering every cell
fn load_sheet(path: &Path, engine: &mut CalcEngine) -> Result<CellStore> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)
        .with_context(|| format!("'{}' is not a JSON object of cells", path.display()))?;

    let mut cells = CellStore::new();
    for (key, value) in entries {
        let address = CellAddress::parse(&key)
            .with_context(|| format!("Bad cell address '{}' in '{}'", key, path.display()))?;
        let raw = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        engine.set_cell(&mut cells, address, &raw);
    }

    tracing::debug!(cells = cells.len(), nodes = engine.len(), "sheet loaded");
    Ok(cells)
}

fn show_order(input: &Path) -> Result<()> {
    let mut engine = CalcEngine::default();
    load_sheet(input, &mut engine)?;

    let result = engine.topological_sort();
    for address in &result.order {
        println!("{}", address);
    }
    if result.has_cycle {
        eprintln!(
            "Warning: {} cells are on or behind a cycle and were left out",
            engine.len() - result.order.len()
        );
    }
    Ok(())
}

fn show_cycles(input: &Path) -> Result<()> {
    let mut engine = CalcEngine::default();
    load_sheet(input, &mut engine)?;

    let cycles = engine.detect_circular_references();
    if cycles.is_empty() {
        println!("No circular references");
    }
    for cycle in cycles {
        let chain: Vec<String> = cycle.iter().map(|a| a.to_string()).collect();
        println!("{}", chain.join(" → "));
    }
    Ok(())
}

fn show_deps(input: &Path, cell: &str) -> Result<()> {
    let mut engine = CalcEngine::default();
    load_sheet(input, &mut engine)?;

    let address =
        CellAddress::parse(cell).with_context(|| format!("Bad cell address '{}'", cell))?;
    if engine.node(address).is_none() {
        println!("{} is not in the sheet or referenced by any formula", address);
        return Ok(());
    }

    let chain = engine.get_dependency_chain(address);
    println!("Cell: {}", address);
    println!("  Reads:          {}", join(&engine.get_dependencies(address)));
    println!("  Read by:        {}", join(&engine.get_dependents(address)));
    println!("  All upstream:   {}", join(&chain.upstream));
    println!("  All downstream: {}", join(&chain.downstream));
    Ok(())
}

async fn recalc(input: &Path, max_iterations: usize, json: bool) -> Result<()> {
    let mut engine = CalcEngine::with_max_iterations(max_iterations);
    let mut cells = load_sheet(input, &mut engine)?;

    let stats = engine
        .recalculate(&mut cells, &ReferenceSum)
        .await
        .context("Recalculation failed")?;

    for (address, content) in cells.iter() {
        println!("{}\t{}", address, content.value);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        eprintln!(
            "Calculated {} of {} dirty cells ({} errors) in {:.3} ms",
            stats.calculated_cells, stats.dirty_cells, stats.errors, stats.calculation_time_ms
        );
        for chain in &stats.circular_references {
            eprintln!("Circular reference: {}", chain);
        }
    }
    Ok(())
}

fn join(addresses: &[CellAddress]) -> String {
    if addresses.is_empty() {
        return "-".to_string();
    }
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stand-in evaluator: sums the numeric values of referenced cells
struct ReferenceSum;

#[async_trait]
impl CellEvaluator for ReferenceSum {
    async fn evaluate(
        &self,
        _address: CellAddress,
        content: &CellContent,
        cells: &CellStore,
    ) -> std::result::Result<Evaluation, EvalError> {
        let formula = content.formula.as_deref().unwrap_or_default();
        let references = extract_references(formula);

        if references.is_empty() {
            let body = formula.trim_start_matches('=');
            return Ok(Evaluation::value(CellValue::parse_literal(body)));
        }

        let mut total = 0.0;
        for reference in references {
            match cells.value(reference) {
                CellValue::Error(e) => {
                    return Ok(Evaluation::error(e, format!("{} is an error", reference)))
                }
                CellValue::String(s) => {
                    return Err(EvalError::new(format!(
                        "{} holds text '{}', not a number",
                        reference, s
                    )))
                }
                value => total += value.as_number().unwrap_or(0.0),
            }
        }
        Ok(Evaluation::value(total))
    }
}
