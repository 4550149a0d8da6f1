//! Cell content store
//!
//! The store is owned by the caller. The calculation engine reads formulas
//! from it and writes display values, error markers and spill membership back
//! into it, but never removes entries.

use std::collections::BTreeMap;

use super::{CellAddress, CellError, CellRange, CellValue};

/// Complete content of a single cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellContent {
    /// Text as entered by the user
    pub raw: String,
    /// Formula text (including the leading `=`), if the cell holds a formula
    pub formula: Option<String>,
    /// Current display value
    pub value: CellValue,
    /// Error message attached to the display value, if any
    pub error: Option<String>,
    /// Range this cell's result spills into (set on the origin cell only)
    pub spill_range: Option<CellRange>,
    /// Origin cell of the spill this cell belongs to
    pub spill_origin: Option<CellAddress>,
}

impl CellContent {
    /// Build content from entered text
    ///
    /// Text starting with `=` is a formula whose value is unknown until the
    /// next recalculation. Anything else is a constant.
    pub fn from_raw<S: Into<String>>(raw: S) -> Self {
        let raw = raw.into();
        if raw.starts_with('=') {
            Self {
                formula: Some(raw.clone()),
                raw,
                ..Default::default()
            }
        } else {
            Self {
                value: CellValue::parse_literal(&raw),
                raw,
                ..Default::default()
            }
        }
    }

    /// Check if this cell holds a formula
    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Check if this cell receives its value from another cell's spill
    pub fn is_spill_member(&self) -> bool {
        self.spill_origin.is_some()
    }

    /// Replace the display value with an error marker
    pub fn set_error<S: Into<String>>(&mut self, error: CellError, message: S) {
        self.value = CellValue::Error(error);
        self.error = Some(message.into());
    }
}

/// Sparse, ordered storage of cell content keyed by address
#[derive(Debug, Default, Clone)]
pub struct CellStore {
    cells: BTreeMap<CellAddress, CellContent>,
}

impl CellStore {
    /// Create a new empty cell store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cell's content
    pub fn get(&self, addr: CellAddress) -> Option<&CellContent> {
        self.cells.get(&addr)
    }

    /// Get a cell's content mutably
    pub fn get_mut(&mut self, addr: CellAddress) -> Option<&mut CellContent> {
        self.cells.get_mut(&addr)
    }

    /// Get a cell's content, creating an empty cell if needed
    pub fn write(&mut self, addr: CellAddress) -> &mut CellContent {
        self.cells.entry(addr).or_default()
    }

    /// Insert content, returning the previous content
    pub fn insert(&mut self, addr: CellAddress, content: CellContent) -> Option<CellContent> {
        self.cells.insert(addr, content)
    }

    /// Replace a cell with content parsed from entered text
    pub fn set_raw<S: Into<String>>(&mut self, addr: CellAddress, raw: S) -> &mut CellContent {
        let slot = self.write(addr);
        *slot = CellContent::from_raw(raw);
        slot
    }

    /// Remove a cell
    pub fn remove(&mut self, addr: CellAddress) -> Option<CellContent> {
        self.cells.remove(&addr)
    }

    /// Get a cell's display value (`Empty` for missing cells)
    pub fn value(&self, addr: CellAddress) -> CellValue {
        self.cells
            .get(&addr)
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    /// Check if a cell exists
    pub fn contains(&self, addr: CellAddress) -> bool {
        self.cells.contains_key(&addr)
    }

    /// Number of stored cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (CellAddress, &CellContent)> + '_ {
        self.cells.iter().map(|(addr, content)| (*addr, content))
    }
}
