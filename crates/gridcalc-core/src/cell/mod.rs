//! Cell-related types and utilities
//!
//! This module contains:
//! - [`CellAddress`] - A cell's location (e.g., "A1")
//! - [`CellRange`] - A rectangular block of cells (e.g., "A1:B10")
//! - [`CellValue`] - The display value of a cell
//! - [`CellContent`] and [`CellStore`] - Per-cell content and the store holding it

mod address;
mod store;
mod value;

pub use address::{CellAddress, CellRange, CellRangeIterator};
pub use store::{CellContent, CellStore};
pub use value::{CellError, CellValue};
