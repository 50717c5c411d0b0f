//! Strategy selection, batch fixing, write-back and revalidation.

use std::str::FromStr;
use std::time::Instant;

use excelint_engine::model::{CellValue, ErrorKind, Finding, Location, WorkbookContext};
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    CircularFix, DivZeroFix, FixResult, FixStrategy, NameFix, NotAvailableFix, RefFix, TypeMismatchFix, ValueFix,
    VbaCodeFixer,
};
use crate::config::FixingConfig;
use crate::detect::IntegratedErrorDetector;
use crate::error::{ExcelintError, Result};

/// How aggressively a batch is fixed.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FixMode {
    /// Only fixes at or above the safe confidence threshold.
    #[default]
    Safe,
    /// Lower threshold, so riskier rewrites go through.
    Aggressive,
    /// Only the listed kinds, at the safe threshold.
    Custom(Vec<ErrorKind>),
}

impl FixMode {
    pub fn threshold(&self, config: &FixingConfig) -> f64 {
        match self {
            FixMode::Aggressive => config.aggressive_confidence_threshold,
            FixMode::Safe | FixMode::Custom(_) => config.safe_confidence_threshold,
        }
    }

    pub fn allows(&self, kind: &ErrorKind) -> bool {
        match self {
            FixMode::Custom(kinds) => kinds.contains(kind),
            _ => true,
        }
    }
}

impl FromStr for FixMode {
    type Err = String;

    /// `safe`, `aggressive`, or a comma-separated list of kind slugs.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(FixMode::Safe),
            "aggressive" => Ok(FixMode::Aggressive),
            other => other
                .split(',')
                .map(|slug| ErrorKind::from_slug(slug).ok_or_else(|| format!("Unknown error kind: {}", slug.trim())))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(FixMode::Custom),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchFixReport {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<FixResult>,
    /// Seconds.
    pub processing_time: f64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RevalidationReport {
    pub total_errors_before: usize,
    pub remaining_errors: usize,
    pub applied: usize,
    pub batch: BatchFixReport,
    pub remaining: Vec<Finding>,
}

pub struct IntegratedErrorFixer {
    strategies: Vec<Box<dyn FixStrategy>>,
    config: FixingConfig,
    history: Vec<FixResult>,
}

impl Default for IntegratedErrorFixer {
    fn default() -> Self {
        Self::new(FixingConfig::default())
    }
}

impl IntegratedErrorFixer {
    /// A fixer with every built-in strategy registered.
    pub fn new(config: FixingConfig) -> Self {
        let mut fixer = Self::empty(config);
        fixer.register_strategy(Box::new(DivZeroFix));
        fixer.register_strategy(Box::new(NotAvailableFix));
        fixer.register_strategy(Box::new(NameFix));
        fixer.register_strategy(Box::new(RefFix));
        fixer.register_strategy(Box::new(ValueFix));
        fixer.register_strategy(Box::new(CircularFix));
        fixer.register_strategy(Box::new(TypeMismatchFix));
        fixer.register_strategy(Box::new(VbaCodeFixer));
        fixer
    }

    pub fn empty(config: FixingConfig) -> Self {
        IntegratedErrorFixer {
            strategies: Vec::new(),
            config,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &FixingConfig {
        &self.config
    }

    pub fn register_strategy(&mut self, strategy: Box<dyn FixStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First registered strategy that can handle the finding.
    pub fn strategy_for(&self, finding: &Finding) -> Option<&dyn FixStrategy> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(finding))
            .map(|s| s.as_ref())
    }

    pub fn has_strategy_for(&self, finding: &Finding) -> bool {
        self.strategy_for(finding).is_some()
    }

    pub fn history(&self) -> &[FixResult] {
        &self.history
    }

    /// Compute one fix without a confidence gate. Never writes to the workbook.
    pub fn fix_error(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> FixResult {
        let Some(strategy) = self.strategy_for(finding) else {
            return FixResult::failed(finding, "no applicable fix strategy");
        };
        Self::run_strategy(strategy, finding, workbook)
    }

    fn run_strategy(strategy: &dyn FixStrategy, finding: &Finding, workbook: Option<&WorkbookContext>) -> FixResult {
        let mut result = match strategy.apply_fix(finding, workbook) {
            Ok(result) => result,
            Err(e) => {
                debug!(strategy = strategy.name(), error_id = %finding.id, error = %e, "fix failed");
                let mut failed = FixResult::failed(finding, e.to_string());
                failed.confidence = strategy.get_confidence(finding);
                failed
            }
        };
        result.strategy = Some(strategy.name().to_string());
        result
    }

    /// Compute fixes for `findings` in the order given.
    ///
    /// With a workbook, each successful fix is written to a private copy so
    /// later fixes in the batch see earlier ones. The caller's workbook is
    /// never modified; use [`Self::apply_fix_to_workbook`] to commit.
    pub fn fix_batch(
        &mut self,
        findings: &[Finding],
        mode: &FixMode,
        workbook: Option<&WorkbookContext>,
    ) -> BatchFixReport {
        let start = Instant::now();
        let threshold = mode.threshold(&self.config);
        let mut scratch = workbook.cloned();
        if let Some(wb) = scratch.as_mut() {
            wb.rebuild_dependencies();
        }

        let mut report = BatchFixReport::default();
        for finding in findings {
            let result = if !mode.allows(&finding.kind) {
                FixResult::skipped(finding, 0.0, "skipped: kind not selected")
            } else if let Some(strategy) = self.strategy_for(finding) {
                let confidence = strategy.get_confidence(finding);
                if confidence < threshold {
                    debug!(error_id = %finding.id, confidence, threshold, "fix skipped: low confidence");
                    let mut skipped = FixResult::skipped(finding, confidence, "skipped: low confidence");
                    skipped.strategy = Some(strategy.name().to_string());
                    skipped
                } else {
                    let result = Self::run_strategy(strategy, finding, scratch.as_ref());
                    if result.success
                        && let Some(wb) = scratch.as_mut()
                        && let Err(e) = write_fix(wb, &result)
                    {
                        debug!(error_id = %finding.id, error = %e, "fix could not be staged");
                    }
                    result
                }
            } else {
                debug!(error_id = %finding.id, kind = %finding.kind, "no applicable fix strategy");
                FixResult::failed(finding, "no applicable fix strategy")
            };

            if result.success {
                report.success += 1;
            } else if result.skipped {
                report.skipped += 1;
            } else {
                report.failed += 1;
            }
            report.results.push(result);
        }

        report.processing_time = start.elapsed().as_secs_f64();
        self.history.extend(report.results.iter().cloned());
        debug!(
            success = report.success,
            failed = report.failed,
            skipped = report.skipped,
            "batch fixed"
        );
        report
    }

    /// Write a successful fix into the workbook and mark it applied.
    pub fn apply_fix_to_workbook(&self, workbook: &mut WorkbookContext, result: &mut FixResult) -> Result<()> {
        write_fix(workbook, result)?;
        result.applied = true;
        Ok(())
    }

    /// Detect, fix the auto-fixable findings, apply, then detect again.
    pub fn fix_and_revalidate(
        &mut self,
        workbook: &mut WorkbookContext,
        detector: &IntegratedErrorDetector,
        mode: &FixMode,
    ) -> RevalidationReport {
        let before = detector.detect_all_errors(workbook);
        let candidates: Vec<Finding> = before
            .errors
            .iter()
            .filter(|f| f.is_auto_fixable && self.has_strategy_for(f))
            .cloned()
            .collect();

        let mut batch = self.fix_batch(&candidates, mode, Some(&*workbook));
        let mut applied = 0;
        for result in batch.results.iter_mut().filter(|r| r.success) {
            match self.apply_fix_to_workbook(workbook, result) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(error_id = %result.error_id, error = %e, "fix could not be applied");
                    result.message = format!("{} (not applied: {})", result.message, e);
                }
            }
        }

        let after = detector.detect_all_errors(workbook);
        RevalidationReport {
            total_errors_before: before.summary.total_errors,
            remaining_errors: after.summary.total_errors,
            applied,
            batch,
            remaining: after.errors,
        }
    }
}

fn write_fix(workbook: &mut WorkbookContext, result: &FixResult) -> Result<()> {
    if !result.success {
        return Err(ExcelintError::Fix {
            error_id: result.error_id.clone(),
            message: "cannot apply a failed fix".to_string(),
        });
    }
    let Some(fixed) = result.fixed_formula.as_deref() else {
        return Err(ExcelintError::Fix {
            error_id: result.error_id.clone(),
            message: "fix carries no new text".to_string(),
        });
    };

    match &result.location {
        Location::Vba { module, .. } => {
            if !workbook.set_vba_code(module, fixed) {
                return Err(ExcelintError::Fix {
                    error_id: result.error_id.clone(),
                    message: format!("module '{}' not found", module),
                });
            }
        }
        Location::Cell { sheet, address } => {
            if workbook.get_sheet(sheet).is_none() {
                return Err(ExcelintError::UnknownSheet(sheet.clone()));
            }
            if matches!(result.kind, ErrorKind::DataQuality(_)) {
                let value = match fixed.parse::<f64>() {
                    Ok(n) => CellValue::Number(n),
                    Err(_) => CellValue::Text(fixed.to_string()),
                };
                if !workbook.set_value(sheet, address, value) {
                    return Err(ExcelintError::InvalidReference(address.clone()));
                }
            } else {
                if !workbook.set_formula(sheet, address, fixed) {
                    return Err(ExcelintError::InvalidReference(address.clone()));
                }
                // The cached value belonged to the old formula.
                if let Some(cell) = workbook.get_cell_mut(sheet, address) {
                    cell.value = None;
                }
            }
        }
        other => {
            return Err(ExcelintError::Fix {
                error_id: result.error_id.clone(),
                message: format!("cannot write a fix at {}", other),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use excelint_engine::model::{FormulaErrorCode, Severity, VbaIssue, VbaModule};

    fn workbook() -> WorkbookContext {
        let mut wb = WorkbookContext::new("f1", "book.xlsx");
        let sheet = wb.sheet_mut("Sheet1");
        sheet.set_value("A1", CellValue::Number(10.0));
        sheet.set_value("B1", CellValue::Number(0.0));
        sheet.set_formula("C1", "=A1/B1");
        sheet.set_value("C1", CellValue::from("#DIV/0!"));
        wb.vba_modules.push(VbaModule::new("Module1", "Sub A()\nEnd Sub\n"));
        wb.rebuild_dependencies();
        wb
    }

    fn formula_finding(code: FormulaErrorCode, address: &str, formula: &str) -> Finding {
        Finding::new(ErrorKind::Formula(code), Location::cell("Sheet1", address), Severity::High, "err")
            .with_source(formula)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("safe".parse::<FixMode>(), Ok(FixMode::Safe));
        assert_eq!("Aggressive".parse::<FixMode>(), Ok(FixMode::Aggressive));
        assert_eq!(
            "div_zero,na".parse::<FixMode>(),
            Ok(FixMode::Custom(vec![
                ErrorKind::Formula(FormulaErrorCode::DivZero),
                ErrorKind::Formula(FormulaErrorCode::NotAvailable),
            ]))
        );
        assert!("bogus".parse::<FixMode>().is_err());
    }

    #[test]
    fn test_first_match_selection() {
        let fixer = IntegratedErrorFixer::default();
        let f = formula_finding(FormulaErrorCode::DivZero, "C1", "=A1/B1");
        assert_eq!(fixer.strategy_for(&f).map(|s| s.name()), Some("div_zero"));
        let spill = formula_finding(FormulaErrorCode::Spill, "C1", "=A1:A3");
        assert!(!fixer.has_strategy_for(&spill));
        let result = fixer.fix_error(&spill, None);
        assert!(!result.success);
        assert_eq!(result.message, "no applicable fix strategy");
    }

    #[test]
    fn test_safe_mode_skips_low_confidence() {
        let mut fixer = IntegratedErrorFixer::default();
        let findings = vec![
            formula_finding(FormulaErrorCode::DivZero, "C1", "=A1/B1"),
            formula_finding(FormulaErrorCode::Ref, "D1", "=#REF!+1"),
        ];
        let report = fixer.fix_batch(&findings, &FixMode::Safe, None);
        assert_eq!(report.success, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.results[1].message, "skipped: low confidence");
        assert!(!report.results[1].success);

        let report = fixer.fix_batch(&findings, &FixMode::Aggressive, None);
        assert_eq!(report.success, 2);
        assert_eq!(fixer.history().len(), 4);
    }

    #[test]
    fn test_custom_mode_filters_kinds() {
        let mut fixer = IntegratedErrorFixer::default();
        let findings = vec![
            formula_finding(FormulaErrorCode::DivZero, "C1", "=A1/B1"),
            formula_finding(FormulaErrorCode::NotAvailable, "D1", "=VLOOKUP(A1,E1:F9,2,FALSE)"),
        ];
        let mode = FixMode::Custom(vec![ErrorKind::Formula(FormulaErrorCode::NotAvailable)]);
        let report = fixer.fix_batch(&findings, &mode, None);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.success, 1);
        assert_eq!(report.results[0].message, "skipped: kind not selected");
    }

    #[test]
    fn test_strategy_error_becomes_failed_result() {
        let mut fixer = IntegratedErrorFixer::default();
        let findings = vec![formula_finding(FormulaErrorCode::NotAvailable, "D1", "=A1+1")];
        let report = fixer.fix_batch(&findings, &FixMode::Safe, None);
        assert_eq!(report.failed, 1);
        assert_eq!(report.results[0].strategy.as_deref(), Some("not_available"));
    }

    #[test]
    fn test_fix_batch_leaves_the_workbook_alone() {
        let wb = workbook();
        let mut fixer = IntegratedErrorFixer::default();
        let f = formula_finding(FormulaErrorCode::DivZero, "C1", "=A1/B1");
        let report = fixer.fix_batch(&[f], &FixMode::Safe, Some(&wb));
        assert_eq!(report.success, 1);
        assert!(!report.results[0].applied);
        assert_eq!(wb.get_cell("Sheet1", "C1").unwrap().formula.as_deref(), Some("=A1/B1"));
    }

    #[test]
    fn test_apply_writes_formula_and_clears_cached_value() {
        let mut wb = workbook();
        let fixer = IntegratedErrorFixer::default();
        let mut result = fixer.fix_error(&formula_finding(FormulaErrorCode::DivZero, "C1", "=A1/B1"), Some(&wb));
        fixer.apply_fix_to_workbook(&mut wb, &mut result).unwrap();
        assert!(result.applied);
        let cell = wb.get_cell("Sheet1", "C1").unwrap();
        assert_eq!(cell.formula.as_deref(), Some("=IFERROR(A1/B1, 0)"));
        assert!(cell.value.is_none());
        assert!(wb.get_dependent_cells("Sheet1", "B1").contains(&"Sheet1!C1".to_string()));
    }

    #[test]
    fn test_apply_rejects_unknown_sheet_and_failed_results() {
        let mut wb = workbook();
        let fixer = IntegratedErrorFixer::default();
        let f = Finding::new(
            ErrorKind::Formula(FormulaErrorCode::DivZero),
            Location::cell("Missing", "A1"),
            Severity::High,
            "err",
        )
        .with_source("=A1/B1");
        let mut result = fixer.fix_error(&f, None);
        assert!(fixer.apply_fix_to_workbook(&mut wb, &mut result).is_err());
        assert!(!result.applied);

        let mut failed = FixResult::failed(&f, "nope");
        assert!(fixer.apply_fix_to_workbook(&mut wb, &mut failed).is_err());
    }

    #[test]
    fn test_fix_and_revalidate() {
        let mut wb = workbook();
        let mut fixer = IntegratedErrorFixer::default();
        let detector = IntegratedErrorDetector::default();
        let report = fixer.fix_and_revalidate(&mut wb, &detector, &FixMode::Safe);
        assert_eq!(report.total_errors_before, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(report.remaining_errors, 0);
        assert!(report.remaining_errors <= report.total_errors_before);
        assert!(
            wb.vba_module("Module1")
                .unwrap()
                .code
                .starts_with("Option Explicit")
        );
    }

    #[test]
    fn test_vba_fixes_build_on_each_other() {
        let code = "Sub A()\n    counter = 1\nEnd Sub\n";
        let mut wb = WorkbookContext::new("f", "book.xlsm");
        wb.vba_modules.push(VbaModule::new("Module1", code));
        let findings = vec![
            Finding::new(
                ErrorKind::Vba(VbaIssue::MissingOptionExplicit),
                Location::vba("Module1", 1),
                Severity::Medium,
                "explicit",
            ),
            Finding::new(
                ErrorKind::Vba(VbaIssue::UndeclaredVariable),
                Location::vba("Module1", 2),
                Severity::High,
                "undeclared",
            )
            .with_value("counter"),
        ];
        let mut fixer = IntegratedErrorFixer::default();
        let report = fixer.fix_batch(&findings, &FixMode::Safe, Some(&wb));
        assert_eq!(report.success, 2);
        assert_eq!(
            report.results[1].fixed_formula.as_deref(),
            Some("Option Explicit\n\nSub A()\n    Dim counter As Variant\n    counter = 1\nEnd Sub\n")
        );
    }
}
