//! Fix strategies.
//!
//! A strategy computes a [`FixResult`] for one finding without touching the
//! workbook. Writing the result back is a separate step owned by
//! [`IntegratedErrorFixer::apply_fix_to_workbook`], so callers can preview a
//! fix before committing it.

mod formula;
mod integrated;
mod reference;
mod value;
mod vba;

pub use formula::{DivZeroFix, NameFix, NotAvailableFix};
pub use integrated::{BatchFixReport, FixMode, IntegratedErrorFixer, RevalidationReport};
pub use reference::{CircularFix, RefFix};
pub use value::{TypeMismatchFix, ValueFix};
pub use vba::VbaCodeFixer;

use std::ops::Range;

use excelint_engine::model::{ErrorKind, Finding, Location, WorkbookContext};
use serde::Serialize;

use crate::error::{ExcelintError, Result};

/// Outcome of one fix attempt. Every attempt yields one, successful or not.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FixResult {
    pub error_id: String,
    pub kind: ErrorKind,
    pub location: Location,
    /// Formula, cell value or module code before the fix.
    pub original_formula: Option<String>,
    pub fixed_formula: Option<String>,
    pub success: bool,
    pub confidence: f64,
    /// Set once the fix has been written to a workbook.
    pub applied: bool,
    /// The attempt was not made (mode filter or confidence threshold).
    pub skipped: bool,
    pub message: String,
    pub strategy: Option<String>,
}

impl FixResult {
    pub fn fixed(
        finding: &Finding,
        original: impl Into<String>,
        fixed: impl Into<String>,
        confidence: f64,
        message: impl Into<String>,
    ) -> Self {
        FixResult {
            original_formula: Some(original.into()),
            fixed_formula: Some(fixed.into()),
            success: true,
            confidence,
            message: message.into(),
            ..Self::failed(finding, "")
        }
    }

    pub fn failed(finding: &Finding, message: impl Into<String>) -> Self {
        FixResult {
            error_id: finding.id.clone(),
            kind: finding.kind,
            location: finding.location.clone(),
            original_formula: finding.source.clone(),
            fixed_formula: None,
            success: false,
            confidence: 0.0,
            applied: false,
            skipped: false,
            message: message.into(),
            strategy: None,
        }
    }

    pub fn skipped(finding: &Finding, confidence: f64, message: impl Into<String>) -> Self {
        FixResult {
            confidence,
            skipped: true,
            ..Self::failed(finding, message)
        }
    }
}

/// A self-contained remediation for one error family.
pub trait FixStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, finding: &Finding) -> bool;

    /// Fixed per-subtype score in `0.0..=1.0`, known before the fix is computed.
    fn get_confidence(&self, finding: &Finding) -> f64;

    /// Compute the fix. The workbook, when given, is only read.
    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult>;
}

pub(crate) fn fix_error(finding: &Finding, message: impl Into<String>) -> ExcelintError {
    ExcelintError::Fix {
        error_id: finding.id.clone(),
        message: message.into(),
    }
}

/// The cell's current formula, falling back to the text captured at detection.
pub(crate) fn current_formula(finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<String> {
    let live = finding
        .cell()
        .zip(workbook)
        .and_then(|((sheet, address), wb)| wb.get_cell(sheet, address))
        .and_then(|cell| cell.formula.clone());
    live.or_else(|| finding.source.clone())
        .ok_or_else(|| fix_error(finding, "no formula to fix"))
}

/// Replace each byte range of `text` with `replacement`. Ranges must be
/// ascending and disjoint.
pub(crate) fn replace_spans(text: &str, spans: &[Range<usize>], replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in spans {
        out.push_str(&text[last..span.start]);
        out.push_str(replacement);
        last = span.end;
    }
    out.push_str(&text[last..]);
    out
}
