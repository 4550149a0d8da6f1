//! # gridcalc-engine
//!
//! Dependency tracking and incremental recalculation for spreadsheet cells.
//!
//! This crate provides:
//! - A dependency graph of cell addresses with bidirectional edges
//! - Dirty propagation, cycle detection and topological ordering
//! - Lexical extraction of cell references from formula text
//! - An async recalculation driver that calls a caller-supplied evaluator
//!   for each dirty cell in dependency order
//!
//! The engine knows nothing about formula syntax. The evaluator passed to
//! [`CalcEngine::recalculate`] encapsulates the formula language.
//!
//! ## Example
//!
//! ```rust
//! use gridcalc_engine::{evaluator_fn, extract_references, CalcEngine, CellStore, Evaluation};
//!
//! # futures::executor::block_on(async {
//! let mut engine = CalcEngine::default();
//! let mut cells = CellStore::new();
//! engine.set_cell(&mut cells, "A1".parse().unwrap(), "5");
//! engine.set_cell(&mut cells, "A2".parse().unwrap(), "7");
//! engine.set_cell(&mut cells, "B1".parse().unwrap(), "=SUM(A1:A2)");
//!
//! // Stand-in formula language: add up every referenced number
//! let evaluator = evaluator_fn(|_, content, cells| {
//!     let formula = content.formula.as_deref().unwrap_or_default();
//!     let total = extract_references(formula)
//!         .into_iter()
//!         .filter_map(|a| cells.value(a).as_number())
//!         .fold(0.0, |acc, n| acc + n);
//!     Ok(Evaluation::value(total))
//! });
//! let stats = engine.recalculate(&mut cells, &evaluator).await.unwrap();
//!
//! assert_eq!(stats.calculated_cells, 1);
//! assert_eq!(cells.value("B1".parse().unwrap()).to_string(), "12");
//! # });
//! ```

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod references;

pub use engine::{AbortHandle, CalcEngine, CalculationStats, EngineConfig, DEFAULT_MAX_ITERATIONS};
pub use error::{CalcError, EvalError, Result};
pub use evaluator::{evaluator_fn, CellEvaluator, Evaluation, FnEvaluator};
pub use graph::{DependencyChain, DependencyGraph, DependencyNode, TopologicalOrder};
pub use references::{extract_references, MAX_RANGE_CELLS};

pub use gridcalc_core::{CellAddress, CellContent, CellError, CellRange, CellStore, CellValue};
