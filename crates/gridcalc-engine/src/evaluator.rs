//! The evaluator seam between the engine and a formula language

use crate::error::EvalError;
use async_trait::async_trait;
use gridcalc_core::{CellAddress, CellContent, CellRange, CellStore, CellValue};

/// Outcome of evaluating one cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Display value for the cell
    pub value: CellValue,
    /// Error message to attach to the cell, if the value is an error
    pub error: Option<String>,
    /// Rectangle the result spills into, including the cell itself
    pub spill_range: Option<CellRange>,
    /// Per-cell values for the spill, as rows of columns relative to the
    /// top-left of `spill_range`. Cells without an entry get `value`.
    pub spill_values: Option<Vec<Vec<CellValue>>>,
}

impl Evaluation {
    /// A plain single-cell result
    pub fn value<V: Into<CellValue>>(value: V) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// An error value with an explanatory message
    pub fn error<V: Into<CellValue>, S: Into<String>>(value: V, message: S) -> Self {
        Self {
            value: value.into(),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Spill this result over `range`
    pub fn with_spill(mut self, range: CellRange) -> Self {
        self.spill_range = Some(range);
        self
    }

    /// Spill an array of values starting at the top-left of `range`
    pub fn with_spill_values(mut self, range: CellRange, values: Vec<Vec<CellValue>>) -> Self {
        self.spill_range = Some(range);
        self.spill_values = Some(values);
        self
    }

    pub(crate) fn spill_value_at(&self, row_offset: u32, col_offset: u16) -> CellValue {
        self.spill_values
            .as_ref()
            .and_then(|rows| rows.get(row_offset as usize))
            .and_then(|row| row.get(col_offset as usize))
            .cloned()
            .unwrap_or_else(|| self.value.clone())
    }
}

/// Computes the value of a formula cell
///
/// Implementations wrap whatever formula interpreter the application uses.
/// The whole store is passed read-only so referenced cells can be resolved.
/// Returning `Err` (or panicking) marks only this cell with an error; the
/// recalculation pass carries on.
#[async_trait]
pub trait CellEvaluator: Send + Sync {
    /// Evaluate the formula held by `content` at `address`
    async fn evaluate(
        &self,
        address: CellAddress,
        content: &CellContent,
        cells: &CellStore,
    ) -> Result<Evaluation, EvalError>;
}

/// A [`CellEvaluator`] backed by a synchronous closure
///
/// Created with [`evaluator_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnEvaluator<F> {
    f: F,
}

/// Wrap a synchronous closure as a [`CellEvaluator`]
///
/// ```
/// use gridcalc_engine::{evaluator_fn, Evaluation};
///
/// let evaluator = evaluator_fn(|_addr, content, _cells| {
///     Ok(Evaluation::value(content.raw.len() as f64))
/// });
/// # let _ = evaluator;
/// ```
pub fn evaluator_fn<F>(f: F) -> FnEvaluator<F>
where
    F: Fn(CellAddress, &CellContent, &CellStore) -> Result<Evaluation, EvalError> + Send + Sync,
{
    FnEvaluator { f }
}

#[async_trait]
impl<F> CellEvaluator for FnEvaluator<F>
where
    F: Fn(CellAddress, &CellContent, &CellStore) -> Result<Evaluation, EvalError> + Send + Sync,
{
    async fn evaluate(
        &self,
        address: CellAddress,
        content: &CellContent,
        cells: &CellStore,
    ) -> Result<Evaluation, EvalError> {
        (self.f)(address, content, cells)
    }
}
