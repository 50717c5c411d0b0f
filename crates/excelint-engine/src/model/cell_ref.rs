//! Cell reference parsing and formatting.
//!
//! Converts between A1-style references ("A1", "$B$2", "XFD1048576") and
//! zero-indexed row/column coordinates, and handles the sheet-qualified form
//! used throughout the dependency graph ("Sheet1!A1", "'My Sheet'!B2").
//!
//! # Examples
//!
//! ```
//! use excelint_engine::model::CellRef;
//!
//! let cell = CellRef::parse("B3").unwrap();
//! assert_eq!(cell.col, 1);
//! assert_eq!(cell.row, 2);
//! assert_eq!(cell.to_string(), "B3");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Largest column index Excel accepts (XFD), zero-indexed.
pub const MAX_COLUMN: usize = 16_383;
/// Largest row index Excel accepts (1048576), zero-indexed.
pub const MAX_ROW: usize = 1_048_575;

/// A reference to a cell by row and column indices (0-indexed).
///
/// Field order gives row-major ordering, which is the order detectors walk a sheet in.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

fn a1_re() -> &'static Regex {
    static A1_RE: OnceLock<Regex> = OnceLock::new();
    A1_RE.get_or_init(|| {
        Regex::new(r"^\$?(?<letters>[A-Za-z]+)\$?(?<numbers>[0-9]+)$")
            .expect("A1 reference regex must compile")
    })
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse an A1-style reference, with or without `$` anchors.
    /// Returns None if the input is malformed or outside the Excel grid.
    pub fn parse(name: &str) -> Option<CellRef> {
        let cell = Self::parse_unbounded(name)?;
        cell.is_within_limits().then_some(cell)
    }

    /// Like [`CellRef::parse`] but accepts coordinates beyond the Excel grid.
    /// Used to report out-of-range references instead of silently dropping them.
    pub fn parse_unbounded(name: &str) -> Option<CellRef> {
        let caps = a1_re().captures(name.trim())?;
        let col = Self::letters_to_col(&caps["letters"])?;
        let row = caps["numbers"].parse::<usize>().ok()?.checked_sub(1)?;
        Some(CellRef::new(col, row))
    }

    pub fn is_within_limits(&self) -> bool {
        self.col <= MAX_COLUMN && self.row <= MAX_ROW
    }

    /// Convert column letters to a zero-indexed column ("A" -> 0, "AA" -> 26).
    pub fn letters_to_col(letters: &str) -> Option<usize> {
        if letters.is_empty() {
            return None;
        }
        let mut col_acc = 0usize;
        for c in letters.to_ascii_uppercase().bytes() {
            if !c.is_ascii_uppercase() {
                return None;
            }
            let digit = (c - b'A') as usize + 1;
            col_acc = col_acc.checked_mul(26)?.checked_add(digit)?;
        }
        col_acc.checked_sub(1)
    }

    /// Convert column index to spreadsheet-style letters (0 -> A, 25 -> Z, 26 -> AA).
    pub fn col_to_letters(col: usize) -> String {
        let mut result = String::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }

    /// Shift by a signed offset, returning None when the result leaves the grid.
    pub fn offset(&self, d_row: isize, d_col: isize) -> Option<CellRef> {
        let row = self.row.checked_add_signed(d_row)?;
        let col = self.col.checked_add_signed(d_col)?;
        let cell = CellRef::new(col, row);
        cell.is_within_limits().then_some(cell)
    }
}

impl std::str::FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row + 1)
    }
}

/// A cell reference qualified with the sheet it lives on.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct QualifiedRef {
    pub sheet: String,
    pub cell: CellRef,
}

impl QualifiedRef {
    pub fn new(sheet: impl Into<String>, cell: CellRef) -> Self {
        QualifiedRef {
            sheet: sheet.into(),
            cell,
        }
    }

    /// Parse `Sheet!A1` or `'My Sheet'!A1`. A bare `A1` resolves against `default_sheet`.
    pub fn parse(text: &str, default_sheet: &str) -> Option<QualifiedRef> {
        let (sheet, address) = split_qualified(text);
        let cell = CellRef::parse(address)?;
        Some(QualifiedRef::new(sheet.unwrap_or(default_sheet), cell))
    }

    /// The canonical graph key, `Sheet!A1`.
    pub fn key(&self) -> String {
        format!("{}!{}", self.sheet, self.cell)
    }
}

impl fmt::Display for QualifiedRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.cell)
    }
}

/// Split `Sheet!A1` into (`Some("Sheet")`, `"A1"`), unquoting `'My Sheet'`.
/// A reference without a sheet prefix yields (`None`, text).
pub fn split_qualified(text: &str) -> (Option<&str>, &str) {
    match text.rsplit_once('!') {
        Some((sheet, address)) => {
            let sheet = sheet
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .unwrap_or(sheet);
            (Some(sheet), address)
        }
        None => (None, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_multi_letter_columns() {
        assert_eq!(CellRef::parse("A1"), Some(CellRef::new(0, 0)));
        assert_eq!(CellRef::parse("Z1"), Some(CellRef::new(25, 0)));
        assert_eq!(CellRef::parse("AA10"), Some(CellRef::new(26, 9)));
        assert_eq!(CellRef::parse("ba1"), Some(CellRef::new(52, 0)));
    }

    #[test]
    fn test_parse_absolute_anchors() {
        assert_eq!(CellRef::parse("$C$5"), Some(CellRef::new(2, 4)));
        assert_eq!(CellRef::parse("C$5"), Some(CellRef::new(2, 4)));
    }

    #[test]
    fn test_parse_rejects_beyond_excel_grid() {
        assert!(CellRef::parse("XFD1048576").is_some());
        assert!(CellRef::parse("XFE1").is_none());
        assert!(CellRef::parse("A1048577").is_none());
        assert_eq!(CellRef::parse_unbounded("XFE1"), Some(CellRef::new(16_384, 0)));
    }

    #[test]
    fn test_parse_rejects_row_zero_and_garbage() {
        assert!(CellRef::parse("A0").is_none());
        assert!(CellRef::parse("1A").is_none());
        assert!(CellRef::parse("").is_none());
    }

    #[test]
    fn test_col_to_letters_round_trip_boundaries() {
        assert_eq!(CellRef::col_to_letters(0), "A");
        assert_eq!(CellRef::col_to_letters(25), "Z");
        assert_eq!(CellRef::col_to_letters(26), "AA");
        assert_eq!(CellRef::col_to_letters(MAX_COLUMN), "XFD");
    }

    #[test]
    fn test_huge_column_overflow_is_rejected() {
        let letters = "Z".repeat(40);
        assert!(CellRef::parse_unbounded(&format!("{}1", letters)).is_none());
    }

    #[test]
    fn test_row_major_ordering() {
        let mut cells = vec![CellRef::new(0, 1), CellRef::new(1, 0), CellRef::new(0, 0)];
        cells.sort();
        assert_eq!(cells, vec![CellRef::new(0, 0), CellRef::new(1, 0), CellRef::new(0, 1)]);
    }

    #[test]
    fn test_qualified_ref_parsing() {
        let q = QualifiedRef::parse("'My Sheet'!B2", "Sheet1").unwrap();
        assert_eq!(q.sheet, "My Sheet");
        assert_eq!(q.key(), "My Sheet!B2");

        let bare = QualifiedRef::parse("C3", "Data").unwrap();
        assert_eq!(bare.key(), "Data!C3");
    }

    #[test]
    fn test_offset_stays_on_grid() {
        let a1 = CellRef::new(0, 0);
        assert!(a1.offset(-1, 0).is_none());
        assert_eq!(a1.offset(2, 1), Some(CellRef::new(1, 2)));
    }
}
