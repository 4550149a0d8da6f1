//! Lexical extraction of cell references from formula text
//!
//! This is a token scan, not a parse: the engine only needs to know which
//! cells a formula reads, not what it does with them.

use gridcalc_core::{CellAddress, CellRange};
use lazy_regex::regex;
use std::collections::BTreeSet;
use tracing::warn;

/// Largest range expanded into individual cells
///
/// Whole-column or whole-sheet ranges would otherwise allocate billions of
/// addresses. Larger ranges are skipped.
pub const MAX_RANGE_CELLS: u64 = 1 << 20;

/// Extract every cell a formula reads
///
/// Single references (`B5`, `$B$5`) and ranges (`A1:A3`, including reversed
/// bounds such as `B3:A1`) are recognised; ranges are expanded to each of
/// their cells. Text inside string literals is ignored, as are tokens that
/// are part of a longer identifier or are immediately followed by `(`
/// (function names such as `LOG10`). Ranges of more than [`MAX_RANGE_CELLS`]
/// cells are skipped with a warning. The result is deduplicated and keeps the
/// order in which cells first appear.
///
/// # Examples
/// ```
/// use gridcalc_engine::extract_references;
///
/// let refs: Vec<String> = extract_references("=SUM(A1:A3)+B5")
///     .iter()
///     .map(|a| a.to_string())
///     .collect();
/// assert_eq!(refs, vec!["A1", "A2", "A3", "B5"]);
/// ```
pub fn extract_references(formula: &str) -> Vec<CellAddress> {
    let text = mask_string_literals(formula);
    let re = regex!(r"\$?[A-Za-z]{1,3}\$?[0-9]+(?::\$?[A-Za-z]{1,3}\$?[0-9]+)?");

    let mut seen = BTreeSet::new();
    let mut refs = Vec::new();

    for m in re.find_iter(&text) {
        if !is_standalone(&text, m.start(), m.end()) {
            continue;
        }

        let token = m.as_str();
        let cells: Vec<CellAddress> = match token.split_once(':') {
            Some(_) => match CellRange::parse(token) {
                Ok(range) if range.cell_count() > MAX_RANGE_CELLS => {
                    warn!(range = %range, cells = range.cell_count(), "range too large to track");
                    continue;
                }
                Ok(range) => range.cells().collect(),
                Err(_) => continue,
            },
            None => match CellAddress::parse(token) {
                Ok(addr) => vec![addr],
                Err(_) => continue,
            },
        };

        for addr in cells {
            if seen.insert(addr) {
                refs.push(addr);
            }
        }
    }

    refs
}

/// Blank out the contents of double-quoted string literals
///
/// Byte offsets of the text outside literals are preserved.
fn mask_string_literals(formula: &str) -> String {
    let mut in_string = false;
    let mut out = String::with_capacity(formula.len());

    for c in formula.chars() {
        if c == '"' {
            in_string = !in_string;
            out.push(c);
        } else if in_string {
            for _ in 0..c.len_utf8() {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }

    out
}

fn is_standalone(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();

    let joins_identifier =
        |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$';

    !before.is_some_and(joins_identifier) && !after.is_some_and(|c| joins_identifier(c) || c == '(')
}
