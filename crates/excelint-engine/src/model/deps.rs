//! Formula reference extraction.
//!
//! Scans formula text for cell and range references (optionally sheet
//! qualified) and expands them into the dependency keys stored on
//! [`CellInfo`](super::CellInfo). String literals are blanked before the scan
//! so `="A1"` does not count as a reference.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use super::{CellRef, QualifiedRef};

/// Maximum number of cells a single range may expand to during dependency extraction.
pub const MAX_DEPENDENCY_RANGE_CELLS: usize = 1_000_000;

/// One reference token found in a formula.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormulaRef {
    Cell {
        sheet: Option<String>,
        cell: CellRef,
    },
    Range {
        sheet: Option<String>,
        start: CellRef,
        end: CellRef,
    },
}

impl FormulaRef {
    pub fn sheet(&self) -> Option<&str> {
        match self {
            FormulaRef::Cell { sheet, .. } | FormulaRef::Range { sheet, .. } => sheet.as_deref(),
        }
    }

    /// True when every coordinate lies inside the Excel grid.
    pub fn is_within_limits(&self) -> bool {
        match self {
            FormulaRef::Cell { cell, .. } => cell.is_within_limits(),
            FormulaRef::Range { start, end, .. } => {
                start.is_within_limits() && end.is_within_limits()
            }
        }
    }

    /// Number of cells covered, or None on overflow.
    pub fn cell_count(&self) -> Option<usize> {
        match self {
            FormulaRef::Cell { .. } => Some(1),
            FormulaRef::Range { start, end, .. } => {
                let rows = start.row.abs_diff(end.row) + 1;
                let cols = start.col.abs_diff(end.col) + 1;
                rows.checked_mul(cols)
            }
        }
    }

    /// Expand to individual cells in row-major order.
    /// Ranges larger than [`MAX_DEPENDENCY_RANGE_CELLS`] expand to nothing.
    pub fn cells(&self) -> Vec<CellRef> {
        match self {
            FormulaRef::Cell { cell, .. } => vec![*cell],
            FormulaRef::Range { start, end, .. } => {
                match self.cell_count() {
                    Some(n) if n <= MAX_DEPENDENCY_RANGE_CELLS => {}
                    _ => return Vec::new(),
                }
                let (min_row, max_row) = (start.row.min(end.row), start.row.max(end.row));
                let (min_col, max_col) = (start.col.min(end.col), start.col.max(end.col));
                let mut out = Vec::new();
                for row in min_row..=max_row {
                    for col in min_col..=max_col {
                        out.push(CellRef::new(col, row));
                    }
                }
                out
            }
        }
    }

    /// The two corner cells of a range, or the single cell.
    pub fn corners(&self) -> Vec<CellRef> {
        match self {
            FormulaRef::Cell { cell, .. } => vec![*cell],
            FormulaRef::Range { start, end, .. } => vec![*start, *end],
        }
    }
}

fn reference_re() -> &'static Regex {
    static REF_RE: OnceLock<Regex> = OnceLock::new();
    REF_RE.get_or_init(|| {
        Regex::new(
            r"(?:(?:'(?<qsheet>[^']+)'|(?<sheet>[A-Za-z0-9_.]+))!)?\$?(?<c1>[A-Za-z]{1,4})\$?(?<r1>[0-9]+)(?::\$?(?<c2>[A-Za-z]{1,4})\$?(?<r2>[0-9]+))?",
        )
        .expect("formula reference regex must compile")
    })
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Find every reference token in `formula`, in textual order.
///
/// Coordinates beyond the Excel grid are kept so callers can report them;
/// use [`FormulaRef::is_within_limits`] to filter.
pub fn extract_references(formula: &str) -> Vec<FormulaRef> {
    reference_spans(formula).into_iter().map(|(_, r)| r).collect()
}

/// Like [`extract_references`], with the byte range each token occupies in `formula`.
pub fn reference_spans(formula: &str) -> Vec<(Range<usize>, FormulaRef)> {
    let cleaned = strip_string_literals(formula);
    let mut refs = Vec::new();

    for caps in reference_re().captures_iter(&cleaned) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let before = cleaned[..whole.start()].chars().next_back();
        let after = cleaned[whole.end()..].chars().next();
        if before.is_some_and(|c| is_word_char(c) || c == '$') {
            continue;
        }
        // A token directly followed by `(` is a function name such as LOG10.
        if after.is_some_and(|c| is_word_char(c) || c == '(' || c == '!') {
            continue;
        }

        let sheet = caps
            .name("qsheet")
            .or_else(|| caps.name("sheet"))
            .map(|m| m.as_str().to_string());

        let Some(start) = CellRef::parse_unbounded(&format!("{}{}", &caps["c1"], &caps["r1"]))
        else {
            continue;
        };

        match (caps.name("c2"), caps.name("r2")) {
            (Some(c2), Some(r2)) => {
                let Some(end) = CellRef::parse_unbounded(&format!("{}{}", c2.as_str(), r2.as_str()))
                else {
                    continue;
                };
                refs.push((whole.range(), FormulaRef::Range { sheet, start, end }));
            }
            _ => refs.push((whole.range(), FormulaRef::Cell { sheet, cell: start })),
        }
    }

    refs
}

/// Expand the references in `formula` into qualified dependency keys.
/// Bare references resolve against `current_sheet`. Duplicates are dropped, first occurrence wins.
pub fn extract_dependencies(formula: &str, current_sheet: &str) -> Vec<QualifiedRef> {
    let mut seen = std::collections::HashSet::new();
    let mut deps = Vec::new();

    for reference in extract_references(formula) {
        if !reference.is_within_limits() {
            continue;
        }
        let sheet = reference.sheet().unwrap_or(current_sheet).to_string();
        for cell in reference.cells() {
            let q = QualifiedRef::new(sheet.clone(), cell);
            if seen.insert(q.clone()) {
                deps.push(q);
            }
        }
    }

    deps
}

/// Blank the contents of `"..."` literals, keeping the quotes.
/// A doubled quote inside a literal is an escaped quote. Byte offsets are
/// preserved, so positions found in the result index into `formula`.
pub fn strip_string_literals(formula: &str) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut in_string = false;
    let mut chars = formula.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_string {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    out.push_str("  ");
                } else {
                    in_string = false;
                    out.push('"');
                }
            } else {
                out.extend(std::iter::repeat_n(' ', ch.len_utf8()));
            }
        } else if ch == '"' {
            in_string = true;
            out.push('"');
        } else {
            out.push(ch);
        }
    }

    out
}

/// Parse a cell range like "A1:B5" and return (start, end).
pub fn parse_range(range: &str) -> Option<(CellRef, CellRef)> {
    let (start, end) = range.split_once(':')?;
    Some((CellRef::parse(start)?, CellRef::parse(end)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(formula: &str) -> Vec<String> {
        extract_dependencies(formula, "Sheet1")
            .iter()
            .map(QualifiedRef::key)
            .collect()
    }

    #[test]
    fn test_simple_references() {
        assert_eq!(keys("=A1+B2"), vec!["Sheet1!A1", "Sheet1!B2"]);
    }

    #[test]
    fn test_ranges_expand_row_major() {
        assert_eq!(
            keys("=SUM(A1:B2)"),
            vec!["Sheet1!A1", "Sheet1!B1", "Sheet1!A2", "Sheet1!B2"]
        );
    }

    #[test]
    fn test_sheet_qualified_references() {
        assert_eq!(keys("=Data!C3*'Tax Rates'!$B$1"), vec!["Data!C3", "Tax Rates!B1"]);
    }

    #[test]
    fn test_function_names_with_digits_are_not_references() {
        assert_eq!(keys("=LOG10(A1)+ATAN2(B1,C1)"), vec!["Sheet1!A1", "Sheet1!B1", "Sheet1!C1"]);
    }

    #[test]
    fn test_string_literals_are_ignored() {
        assert_eq!(keys("=IF(A1=\"B2\",1,0)"), vec!["Sheet1!A1"]);
        assert_eq!(strip_string_literals("\"a\"\"b\"&C1"), "\"    \"&C1");
    }

    #[test]
    fn test_duplicates_are_dropped() {
        assert_eq!(keys("=A1+A1*A1"), vec!["Sheet1!A1"]);
    }

    #[test]
    fn test_skips_over_limit_ranges() {
        assert_eq!(keys("=SUM(A1:A1000001)+B2"), vec!["Sheet1!B2"]);
    }

    #[test]
    fn test_out_of_grid_references_are_reported_but_not_dependencies() {
        let refs = extract_references("=XFE1+A1");
        assert_eq!(refs.len(), 2);
        assert!(!refs[0].is_within_limits());
        assert_eq!(keys("=XFE1+A1"), vec!["Sheet1!A1"]);
    }

    #[test]
    fn test_reference_spans_index_the_original_text() {
        let formula = "=\"é\"&Data!B2+SUM(A1:A3)";
        let spans = reference_spans(formula);
        assert_eq!(&formula[spans[0].0.clone()], "Data!B2");
        assert_eq!(&formula[spans[1].0.clone()], "A1:A3");
    }

    #[test]
    fn test_parse_range() {
        let (start, end) = parse_range("B2:C10").unwrap();
        assert_eq!(start, CellRef::new(1, 1));
        assert_eq!(end, CellRef::new(2, 9));
        assert!(parse_range("B2").is_none());
    }
}
