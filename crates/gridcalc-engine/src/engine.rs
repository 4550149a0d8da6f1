//! Incremental recalculation engine
//!
//! Owns the dependency graph of one spreadsheet and drives the caller's
//! evaluator over dirty cells in dependency order.
//!
//! # Example
//!
//! ```rust
//! use gridcalc_engine::{evaluator_fn, CalcEngine, CellAddress, CellStore, Evaluation};
//!
//! # futures::executor::block_on(async {
//! let mut engine = CalcEngine::default();
//! let mut cells = CellStore::new();
//! let a1 = CellAddress::parse("A1").unwrap();
//! let b1 = CellAddress::parse("B1").unwrap();
//!
//! engine.set_cell(&mut cells, a1, "5");
//! engine.set_cell(&mut cells, b1, "=A1");
//!
//! // Stand-in evaluator: copy the value of A1
//! let evaluator = evaluator_fn(move |_, _, cells| Ok(Evaluation::value(cells.value(a1))));
//! let stats = engine.recalculate(&mut cells, &evaluator).await.unwrap();
//!
//! assert_eq!(stats.calculated_cells, 1);
//! assert_eq!(cells.value(b1).to_string(), "5");
//! # });
//! ```

use crate::error::{CalcError, EvalError, Result};
use crate::evaluator::{CellEvaluator, Evaluation};
use crate::graph::{DependencyChain, DependencyGraph, DependencyNode, TopologicalOrder};
use crate::references::extract_references;
use futures::FutureExt;
use gridcalc_core::{CellAddress, CellContent, CellError, CellRange, CellStore};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Default ceiling on cell evaluations per pass
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Maximum number of cells evaluated in one pass before it is aborted
    pub max_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Statistics from a calculation run
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CalculationStats {
    /// Number of cells registered in the graph
    pub total_cells: usize,
    /// Number of dirty cells when the pass started
    pub dirty_cells: usize,
    /// Number of successful evaluator calls (a reader of a spilled cell may
    /// be evaluated again once the spill lands)
    pub calculated_cells: usize,
    /// Number of cells whose evaluation failed
    pub errors: usize,
    /// Detected cycles, formatted as `A1 → B1 → A1`
    pub circular_references: Vec<String>,
    /// Wall time spent in the pass, in milliseconds
    pub calculation_time_ms: f64,
}

/// Cooperative cancellation signal for an in-flight pass
///
/// Clone it out of the engine with [`CalcEngine::abort_handle`] before
/// starting a pass; calling [`abort`](AbortHandle::abort) from the evaluator
/// or another task stops the pass before the next cell is evaluated.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request cancellation of the current pass
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.aborted.store(false, Ordering::Release);
    }
}

/// Dependency-graph calculation engine for one spreadsheet
#[derive(Debug, Default)]
pub struct CalcEngine {
    config: EngineConfig,
    graph: DependencyGraph,
    abort: AbortHandle,
}

impl CalcEngine {
    /// Create an engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            graph: DependencyGraph::new(),
            abort: AbortHandle::default(),
        }
    }

    /// Create an engine with a custom evaluation ceiling
    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self::new(EngineConfig { max_iterations })
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying dependency graph
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Enter text into a cell
    ///
    /// Writes the content into `cells`, re-registers the cell with the
    /// references found in its formula (none for constants) and invalidates
    /// the cell and everything downstream of it. Recalculation is not
    /// triggered.
    pub fn set_cell(&mut self, cells: &mut CellStore, address: CellAddress, raw: &str) {
        let content = cells.set_raw(address, raw);
        let references = content
            .formula
            .as_deref()
            .map(extract_references)
            .unwrap_or_default();

        self.graph.register_cell(address, references);
        self.graph.invalidate(address);
    }

    /// Register a cell with the complete list of cells it reads
    pub fn register_cell<I>(&mut self, address: CellAddress, depends_on: I)
    where
        I: IntoIterator<Item = CellAddress>,
    {
        self.graph.register_cell(address, depends_on);
    }

    /// Register a cell using the references found in its formula text
    pub fn register_formula(&mut self, address: CellAddress, formula: &str) {
        self.graph
            .register_cell(address, extract_references(formula));
    }

    /// Mark a cell and its transitive dependents dirty
    pub fn mark_dirty(&mut self, address: CellAddress) {
        self.graph.mark_dirty(address);
    }

    /// Remove a cell from the graph
    pub fn remove_cell(&mut self, address: CellAddress) {
        self.graph.remove_cell(address);
    }

    /// Find reference cycles
    pub fn detect_circular_references(&self) -> Vec<Vec<CellAddress>> {
        self.graph.detect_circular_references()
    }

    /// Compute an evaluation order for all cells
    pub fn topological_sort(&self) -> TopologicalOrder {
        self.graph.topological_sort()
    }

    /// Cells that directly read `address`
    pub fn get_dependents(&self, address: CellAddress) -> Vec<CellAddress> {
        self.graph.get_dependents(address)
    }

    /// Cells that `address` directly reads
    pub fn get_dependencies(&self, address: CellAddress) -> Vec<CellAddress> {
        self.graph.get_dependencies(address)
    }

    /// Transitive precedents and dependents of `address`
    pub fn get_dependency_chain(&self, address: CellAddress) -> DependencyChain {
        self.graph.get_dependency_chain(address)
    }

    /// Get a graph node
    pub fn node(&self, address: CellAddress) -> Option<&DependencyNode> {
        self.graph.node(address)
    }

    /// Whether a cell is waiting for recalculation
    pub fn is_dirty(&self, address: CellAddress) -> bool {
        self.graph.is_dirty(address)
    }

    /// Cells currently in the dirty queue
    pub fn dirty_cells(&self) -> Vec<CellAddress> {
        self.graph.dirty_queue().collect()
    }

    /// Number of registered cells
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Check if no cells are registered
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Drop every registered cell
    pub fn clear(&mut self) {
        self.graph.clear();
    }

    /// Request cancellation of the in-flight pass
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// A handle that can cancel passes of this engine from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Recalculate every dirty formula cell in dependency order
    ///
    /// Cycle members are marked `#CIRCULAR!` in `cells`. If the graph holds
    /// any cycle the pass stops there and evaluates nothing. Otherwise each
    /// dirty formula cell is handed to `evaluator` in topological order and
    /// the result written back, including spill ranges. Spilled cells count
    /// as dependents of their origin, so their readers are evaluated after
    /// the spill. A spill over a cell the formula reads becomes `#SPILL!`.
    /// Evaluator failures only affect their own cell.
    ///
    /// # Errors
    ///
    /// [`CalcError::Aborted`] if the abort signal was raised and
    /// [`CalcError::IterationLimit`] if more cells needed evaluation than
    /// [`EngineConfig::max_iterations`]. Cells finished before the error keep
    /// their new values.
    pub async fn recalculate<E>(
        &mut self,
        cells: &mut CellStore,
        evaluator: &E,
    ) -> Result<CalculationStats>
    where
        E: CellEvaluator + ?Sized,
    {
        let started = Instant::now();
        self.abort.reset();

        let mut stats = CalculationStats {
            total_cells: self.graph.len(),
            dirty_cells: self.graph.dirty_count(),
            ..Default::default()
        };
        debug!(
            total = stats.total_cells,
            dirty = stats.dirty_cells,
            "starting recalculation"
        );

        // Phase 1: flag cycle members
        let mut circular: BTreeSet<CellAddress> = BTreeSet::new();
        for cycle in self.graph.detect_circular_references() {
            let chain = format_chain(&cycle);
            warn!(chain = %chain, "circular reference detected");
            circular.extend(cycle);
            stats.circular_references.push(chain);
        }
        for &address in &circular {
            if let Some(content) = cells.get_mut(address) {
                content.set_error(CellError::Circular, "Circular reference");
            }
        }

        // Phase 2: evaluate dirty cells in dependency order. A spill can add
        // edges mid-pass, after which the order is recomputed.
        let mut iterations = 0usize;
        loop {
            let TopologicalOrder { order, has_cycle } = self.graph.topological_sort();
            if has_cycle {
                info!(
                    cycles = stats.circular_references.len(),
                    "skipping recalculation: graph contains cycles"
                );
                stats.calculation_time_ms = elapsed_ms(started);
                return Ok(stats);
            }

            let mut reorder = false;
            for address in order {
                if circular.contains(&address) {
                    continue;
                }
                match self.graph.node(address) {
                    Some(node) if node.is_dirty() && !node.is_calculating() => {}
                    _ => continue,
                }
                let Some(content) = cells.get(address) else {
                    continue;
                };
                if !content.is_formula() {
                    // Constants are current as soon as they are entered
                    self.graph.mark_clean(address);
                    continue;
                }

                if self.abort.is_aborted() {
                    info!(calculated = stats.calculated_cells, "recalculation aborted");
                    return Err(CalcError::Aborted {
                        calculated: stats.calculated_cells,
                    });
                }
                if iterations >= self.config.max_iterations {
                    info!(
                        limit = self.config.max_iterations,
                        "recalculation exceeded maximum iterations"
                    );
                    return Err(CalcError::IterationLimit {
                        limit: self.config.max_iterations,
                        calculated: stats.calculated_cells,
                    });
                }
                iterations += 1;

                let outcome = {
                    let _calculating = Calculating::start(&mut self.graph, address);
                    AssertUnwindSafe(evaluator.evaluate(address, content, cells))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(EvalError::Panicked(panic_message(panic.as_ref())))
                        })
                };

                match outcome {
                    Ok(evaluation) => {
                        trace!(cell = %address, value = %evaluation.value, "evaluated");
                        reorder = self.apply(cells, address, evaluation);
                        stats.calculated_cells += 1;
                    }
                    Err(err) => {
                        warn!(cell = %address, error = %err, "evaluation failed");
                        if let Some(content) = cells.get_mut(address) {
                            content.set_error(CellError::Error, err.to_string());
                        }
                        stats.errors += 1;
                    }
                }
                self.graph.mark_clean(address);

                if reorder {
                    debug!(cell = %address, "spill changed the graph, reordering");
                    break;
                }
            }

            if !reorder {
                break;
            }
        }

        self.graph.clear_dirty_queue();
        stats.calculation_time_ms = elapsed_ms(started);
        debug!(
            calculated = stats.calculated_cells,
            errors = stats.errors,
            elapsed_ms = stats.calculation_time_ms,
            "recalculation finished"
        );

        Ok(stats)
    }

    /// Write an evaluation result into the store, spilling if requested
    ///
    /// Spill members are registered as depending on the origin and their
    /// readers are marked dirty. Returns true when that changed the graph,
    /// meaning the evaluation order must be recomputed.
    fn apply(&mut self, cells: &mut CellStore, origin: CellAddress, evaluation: Evaluation) -> bool {
        let evaluation = match evaluation.spill_range {
            Some(range) if self.spill_overlaps_precedent(origin, range) => {
                warn!(cell = %origin, range = %range, "spill range overlaps a precedent");
                Evaluation::error(CellError::Spill, "Spill range overlaps a cell the formula reads")
            }
            _ => evaluation,
        };
        let previous_spill = self.graph.node(origin).and_then(|n| n.spill_range());
        let spill = evaluation.spill_range;

        let mut changed = false;
        let mut touched = Vec::new();

        // Release cells the previous spill covered but the new one does not
        if let Some(old) = previous_spill {
            for member in old.cells() {
                if member == origin || spill.is_some_and(|r| r.contains(&member)) {
                    continue;
                }
                if let Some(content) = cells.get_mut(member) {
                    if content.spill_origin == Some(origin) {
                        *content = CellContent::default();
                        self.graph.register_cell(member, std::iter::empty());
                        self.graph.mark_clean(member);
                        touched.push(member);
                        changed = true;
                    }
                }
            }
        }

        if let Some(range) = spill {
            for member in range.cells() {
                if member == origin {
                    continue;
                }
                let value = evaluation.spill_value_at(
                    member.row - range.start.row,
                    member.col - range.start.col,
                );
                cells.insert(
                    member,
                    CellContent {
                        value,
                        spill_origin: Some(origin),
                        ..Default::default()
                    },
                );

                let linked = self.graph.node(member).is_some_and(|n| {
                    n.depends_on().len() == 1 && n.depends_on().contains(&origin)
                });
                if !linked {
                    self.graph.register_cell(member, [origin]);
                    changed = true;
                }
                self.graph.mark_clean(member);
                touched.push(member);
            }
        }

        let content = cells.write(origin);
        content.value = match spill {
            Some(range) if range.contains(&origin) => evaluation.spill_value_at(
                origin.row - range.start.row,
                origin.col - range.start.col,
            ),
            _ => evaluation.value,
        };
        content.error = evaluation.error;
        content.spill_range = spill;
        content.spill_origin = spill.map(|_| origin);

        self.graph.set_spill_range(origin, spill);

        for member in touched {
            for reader in self.graph.get_dependents(member) {
                if !self.graph.is_dirty(reader) {
                    self.graph.mark_dirty(reader);
                    changed = true;
                }
            }
        }

        changed
    }

    /// Whether a spill would overwrite a cell the origin reads
    fn spill_overlaps_precedent(&self, origin: CellAddress, range: CellRange) -> bool {
        self.graph
            .get_dependency_chain(origin)
            .upstream
            .iter()
            .any(|a| *a != origin && range.contains(a))
    }
}

/// Holds a node's calculating flag for the duration of one evaluator call
///
/// The flag is cleared on drop, so it also clears when the pass future is
/// dropped while the evaluator is suspended.
struct Calculating<'a> {
    graph: &'a mut DependencyGraph,
    address: CellAddress,
}

impl<'a> Calculating<'a> {
    fn start(graph: &'a mut DependencyGraph, address: CellAddress) -> Self {
        graph.set_calculating(address, true);
        Self { graph, address }
    }
}

impl Drop for Calculating<'_> {
    fn drop(&mut self) {
        self.graph.set_calculating(self.address, false);
    }
}

/// Format a cycle as an arrow-joined chain
fn format_chain(cycle: &[CellAddress]) -> String {
    cycle
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
