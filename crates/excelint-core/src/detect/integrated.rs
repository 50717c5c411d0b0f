//! Runs every registered detector and merges their findings.

use std::collections::{BTreeMap, HashSet};

use excelint_engine::model::{ErrorKind, Finding, Location, SheetContext, WorkbookContext};
use serde::Serialize;
use tracing::{debug, warn};

use super::data_quality::classify_value;
use super::{DataQualityDetector, ErrorDetector, FormulaErrorDetector, StructureDetector, VbaErrorDetector};
use crate::config::DetectionConfig;

/// Counts over one detection pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub total_errors: usize,
    /// Finding count per kind label, e.g. `"#DIV/0!" -> 2`.
    pub error_types: BTreeMap<String, usize>,
    pub auto_fixable_count: usize,
    pub auto_fixable_percentage: f64,
    pub most_common_error_type: Option<String>,
    pub has_errors: bool,
    pub strategies_run: Vec<String>,
    pub strategies_failed: Vec<String>,
}

impl DetectionSummary {
    fn from_findings(findings: &[Finding], run: Vec<String>, failed: Vec<String>) -> Self {
        let mut error_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut first_seen: Vec<&'static str> = Vec::new();
        for finding in findings {
            let label = finding.kind.label();
            let count = error_types.entry(label.to_string()).or_default();
            if *count == 0 {
                first_seen.push(label);
            }
            *count += 1;
        }

        // Ties go to the type reported first.
        let mut most_common: Option<(&str, usize)> = None;
        for label in first_seen {
            let count = error_types.get(label).copied().unwrap_or(0);
            if most_common.is_none_or(|(_, best)| count > best) {
                most_common = Some((label, count));
            }
        }

        let total = findings.len();
        let fixable = findings.iter().filter(|f| f.is_auto_fixable).count();
        let percentage = if total == 0 {
            0.0
        } else {
            (fixable as f64 / total as f64 * 10_000.0).round() / 100.0
        };

        DetectionSummary {
            total_errors: total,
            error_types,
            auto_fixable_count: fixable,
            auto_fixable_percentage: percentage,
            most_common_error_type: most_common.map(|(label, _)| label.to_string()),
            has_errors: total > 0,
            strategies_run: run,
            strategies_failed: failed,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DetectionReport {
    pub errors: Vec<Finding>,
    pub summary: DetectionSummary,
}

/// Quick profile of one sheet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub non_empty_cells: usize,
    pub formulas_count: usize,
    pub data_types: BTreeMap<String, usize>,
}

pub struct IntegratedErrorDetector {
    detectors: Vec<Box<dyn ErrorDetector>>,
}

impl Default for IntegratedErrorDetector {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

impl IntegratedErrorDetector {
    /// An orchestrator with no detectors registered.
    pub fn empty() -> Self {
        IntegratedErrorDetector { detectors: Vec::new() }
    }

    /// Formula, structure, data-quality and VBA detectors, in that order.
    pub fn from_config(config: &DetectionConfig) -> Self {
        let mut detector = Self::empty();
        detector.add_detector(Box::new(FormulaErrorDetector::from_config(config)));
        detector.add_detector(Box::new(StructureDetector::from_config(config)));
        detector.add_detector(Box::new(DataQualityDetector::from_config(config)));
        detector.add_detector(Box::new(VbaErrorDetector::new()));
        detector
    }

    pub fn add_detector(&mut self, detector: Box<dyn ErrorDetector>) {
        self.detectors.push(detector);
    }

    /// Returns false when no detector has that name.
    pub fn remove_detector(&mut self, name: &str) -> bool {
        let before = self.detectors.len();
        self.detectors.retain(|d| d.name() != name);
        self.detectors.len() != before
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Whether some registered detector reports `kind`.
    pub fn covers(&self, kind: &ErrorKind) -> bool {
        self.detectors.iter().any(|d| d.can_detect(kind))
    }

    /// Run every detector without touching the workbook. A failing detector
    /// is logged and listed in `strategies_failed`; the rest still run.
    pub fn detect(&self, workbook: &WorkbookContext) -> DetectionReport {
        let mut errors = Vec::new();
        let mut run = Vec::new();
        let mut failed = Vec::new();
        let mut seen: HashSet<(Location, ErrorKind)> = HashSet::new();

        for detector in &self.detectors {
            match detector.detect(workbook) {
                Ok(findings) => {
                    debug!(detector = detector.name(), count = findings.len(), "detector finished");
                    run.push(detector.name().to_string());
                    for finding in findings {
                        if seen.insert((finding.location.clone(), finding.kind)) {
                            errors.push(finding);
                        }
                    }
                }
                Err(e) => {
                    warn!(detector = detector.name(), error = %e, "detector failed");
                    failed.push(detector.name().to_string());
                }
            }
        }

        let summary = DetectionSummary::from_findings(&errors, run, failed);
        DetectionReport { errors, summary }
    }

    /// Full pass: refresh the dependency graph, detect, then store the
    /// findings on their cells (or globally) and record the summary.
    pub fn detect_all_errors(&self, workbook: &mut WorkbookContext) -> DetectionReport {
        workbook.rebuild_dependencies();
        let report = self.detect(workbook);
        workbook.attach_findings(&report.errors);
        if let Ok(value) = serde_json::to_value(&report.summary) {
            workbook.analysis_summary.insert("detection".to_string(), value);
        }
        report
    }

    /// Findings located at one cell.
    pub fn detect_cell_error(&self, workbook: &WorkbookContext, sheet: &str, address: &str) -> Vec<Finding> {
        let Some(cell) = workbook.get_cell(sheet, address) else {
            return Vec::new();
        };
        let address = cell.address.as_str();
        self.detect(workbook)
            .errors
            .into_iter()
            .filter(|f| f.cell() == Some((sheet, address)))
            .collect()
    }

    pub fn sheet_summary(&self, sheet: &SheetContext) -> SheetSummary {
        let mut data_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut non_empty = 0;
        for cell in sheet.cells.values().filter(|c| !c.is_empty()) {
            non_empty += 1;
            if let Some(value) = cell.visible_value() {
                *data_types.entry(classify_value(value).label().to_string()).or_default() += 1;
            }
        }
        SheetSummary {
            name: sheet.name.clone(),
            non_empty_cells: non_empty,
            formulas_count: sheet.formula_count(),
            data_types,
        }
    }
}

/// Most severe first, then by location.
pub fn sort_by_priority(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.location.cmp(&b.location))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExcelintError, Result};
    use excelint_engine::model::{CellValue, FormulaErrorCode, Severity, VbaModule};

    struct Failing;

    impl ErrorDetector for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&self, _workbook: &WorkbookContext) -> Result<Vec<Finding>> {
            Err(ExcelintError::Detector {
                name: "failing".to_string(),
                message: "boom".to_string(),
            })
        }

        fn can_detect(&self, _kind: &ErrorKind) -> bool {
            false
        }
    }

    fn workbook() -> WorkbookContext {
        let mut wb = WorkbookContext::new("f1", "book.xlsx");
        let sheet = wb.sheet_mut("Sheet1");
        sheet.set_value("A1", CellValue::Number(10.0));
        sheet.set_value("B1", CellValue::Number(0.0));
        sheet.set_formula("C1", "=A1/B1");
        sheet.set_value("C1", CellValue::from("#DIV/0!"));
        wb.vba_modules.push(VbaModule::new("Module1", "Sub A()\nEnd Sub\n"));
        wb
    }

    #[test]
    fn test_detect_all_errors_attaches_findings() {
        let mut wb = workbook();
        let report = IntegratedErrorDetector::default().detect_all_errors(&mut wb);
        assert_eq!(report.summary.total_errors, 2);
        assert_eq!(report.errors[0].kind, ErrorKind::Formula(FormulaErrorCode::DivZero));
        assert_eq!(wb.get_cell("Sheet1", "C1").unwrap().errors.len(), 1);
        assert_eq!(wb.global_errors.len(), 1);
        assert_eq!(report.summary.auto_fixable_count, 2);
        assert_eq!(report.summary.auto_fixable_percentage, 100.0);
        assert_eq!(report.summary.most_common_error_type.as_deref(), Some("#DIV/0!"));
        assert_eq!(
            report.summary.strategies_run,
            vec!["formula", "structure", "data_quality", "vba"]
        );
        assert!(wb.analysis_summary.contains_key("detection"));
    }

    #[test]
    fn test_failed_detector_is_contained() {
        let mut detector = IntegratedErrorDetector::default();
        detector.add_detector(Box::new(Failing));
        let report = detector.detect(&workbook());
        assert_eq!(report.summary.strategies_failed, vec!["failing"]);
        assert_eq!(report.summary.strategies_run.len(), 4);
        assert_eq!(report.summary.total_errors, 2);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let mut wb = workbook();
        let detector = IntegratedErrorDetector::default();
        let first = detector.detect_all_errors(&mut wb);
        let second = detector.detect_all_errors(&mut wb);
        assert_eq!(first.errors, second.errors);
        assert_eq!(wb.total_errors(), first.summary.total_errors);
    }

    #[test]
    fn test_remove_detector() {
        let mut detector = IntegratedErrorDetector::default();
        assert!(detector.remove_detector("vba"));
        assert!(!detector.remove_detector("vba"));
        assert_eq!(detector.detector_names(), vec!["formula", "structure", "data_quality"]);
        assert_eq!(detector.detect(&workbook()).summary.total_errors, 1);
    }

    #[test]
    fn test_detect_cell_error() {
        let wb = workbook();
        let detector = IntegratedErrorDetector::default();
        assert_eq!(detector.detect_cell_error(&wb, "Sheet1", "$C$1").len(), 1);
        assert!(detector.detect_cell_error(&wb, "Sheet1", "A1").is_empty());
        assert!(detector.detect_cell_error(&wb, "Nope", "A1").is_empty());
    }

    #[test]
    fn test_empty_summary() {
        let report = IntegratedErrorDetector::empty().detect(&workbook());
        assert!(!report.summary.has_errors);
        assert_eq!(report.summary.auto_fixable_percentage, 0.0);
        assert!(report.summary.most_common_error_type.is_none());
    }

    #[test]
    fn test_sort_by_priority() {
        let mut findings = vec![
            Finding::new(
                ErrorKind::Formula(FormulaErrorCode::NotAvailable),
                Location::cell("Sheet1", "A1"),
                Severity::Medium,
                "a",
            ),
            Finding::new(
                ErrorKind::Formula(FormulaErrorCode::Ref),
                Location::cell("Sheet1", "B1"),
                Severity::Critical,
                "b",
            ),
        ];
        sort_by_priority(&mut findings);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_sheet_summary() {
        let wb = workbook();
        let detector = IntegratedErrorDetector::default();
        let summary = detector.sheet_summary(wb.get_sheet("Sheet1").unwrap());
        assert_eq!(summary.non_empty_cells, 3);
        assert_eq!(summary.formulas_count, 1);
        assert_eq!(summary.data_types.get("number"), Some(&2));
        assert_eq!(summary.data_types.get("text"), Some(&1));
    }
}
