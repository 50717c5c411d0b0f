//! Workbook model API.
//!
//! - [`WorkbookContext`], [`SheetContext`], [`CellInfo`] - sheets, cells and the dependency graph
//! - [`CellRef`], [`QualifiedRef`] - A1 references, optionally sheet qualified
//! - [`extract_dependencies`], [`extract_references`] - formula reference scanning
//! - [`find_cycle`] - bounded circular-reference search
//! - [`Finding`], [`ErrorKind`] - detection records and their closed taxonomy

mod cell_ref;
mod cycle;
mod deps;
mod finding;
mod value;
mod workbook;

pub use cell_ref::{CellRef, MAX_COLUMN, MAX_ROW, QualifiedRef, split_qualified};
pub use cycle::{CycleSearch, MAX_CYCLE_DEPTH, find_cycle};
pub use deps::{
    FormulaRef, MAX_DEPENDENCY_RANGE_CELLS, extract_dependencies, extract_references, parse_range,
    reference_spans, strip_string_literals,
};
pub use finding::{
    DataQualityIssue, ErrorKind, Finding, FindingCategory, FormulaErrorCode, Location, Severity,
    StructuralIssue, VbaCategory, VbaIssue,
};
pub use value::{CellValue, format_number};
pub use workbook::{CellInfo, SheetContext, VbaModule, WorkbookContext, WorkbookSummary};
