//! # gridcalc-core
//!
//! Core data structures for the gridcalc calculation engine.
//!
//! This crate provides the types shared between the engine and its callers:
//! - [`CellAddress`] and [`CellRange`] - Cell addressing and ranges
//! - [`CellValue`] and [`CellError`] - Display values and error markers
//! - [`CellContent`] and [`CellStore`] - The caller-owned cell content store
//!
//! ## Example
//!
//! ```rust
//! use gridcalc_core::{CellAddress, CellStore, CellValue};
//!
//! let mut cells = CellStore::new();
//! cells.set_raw(CellAddress::parse("A1").unwrap(), "42");
//! cells.set_raw(CellAddress::parse("B1").unwrap(), "=A1*2");
//!
//! assert_eq!(cells.value(CellAddress::new(0, 0)), CellValue::Number(42.0));
//! assert!(cells.get(CellAddress::new(0, 1)).unwrap().is_formula());
//! ```

pub mod cell;
pub mod error;

pub use cell::{CellAddress, CellContent, CellError, CellRange, CellStore, CellValue};
pub use error::{Error, Result};

/// Maximum number of rows in a worksheet
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet
pub const MAX_COLS: u16 = 16_384;
