//! Detection strategies.
//!
//! Each detector covers one error family and is independently testable. The
//! [`IntegratedErrorDetector`] composes them in registration order.

mod data_quality;
mod formula;
mod integrated;
mod structure;
mod vba;

pub use data_quality::{DataQualityDetector, DataType, classify_value, exclusive_quartiles};
pub use formula::FormulaErrorDetector;
pub use integrated::{DetectionReport, DetectionSummary, IntegratedErrorDetector, SheetSummary, sort_by_priority};
pub use structure::StructureDetector;
pub use vba::VbaErrorDetector;
pub(crate) use data_quality::numeric_text;
pub(crate) use vba::procedures;

use excelint_engine::model::{ErrorKind, Finding, WorkbookContext};

use crate::error::Result;

/// A self-contained analyzer producing findings for one error family.
pub trait ErrorDetector: Send + Sync {
    /// Stable name used in logs and summaries.
    fn name(&self) -> &'static str;

    /// Scan the workbook. Findings come back in a deterministic order.
    fn detect(&self, workbook: &WorkbookContext) -> Result<Vec<Finding>>;

    /// Whether this detector can produce findings of `kind`.
    fn can_detect(&self, kind: &ErrorKind) -> bool;
}
