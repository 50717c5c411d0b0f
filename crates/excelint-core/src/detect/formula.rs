//! Formula error detection.
//!
//! A cell whose value is a native error token (`#DIV/0!`, `#REF!`, ...) is
//! reported from the token alone and skips the formula checks. Other formula
//! cells are checked for broken syntax, unknown functions, references outside
//! the grid or to missing sheets, fully empty ranges, and circular references.

use excelint_engine::model::{
    CellInfo, CycleSearch, ErrorKind, Finding, FormulaErrorCode, Location, Severity,
    WorkbookContext, extract_references, find_cycle,
};
use tracing::debug;

use super::ErrorDetector;
use crate::config::DetectionConfig;
use crate::error::Result;
use crate::formula_text;

const TOKEN_CONFIDENCE: f64 = 0.95;
const DIRECT_CYCLE_CONFIDENCE: f64 = 0.9;
const CYCLE_DECAY: f64 = 0.8;
const DEPTH_EXCEEDED_CONFIDENCE: f64 = 0.1;

pub struct FormulaErrorDetector {
    max_cycle_depth: usize,
}

impl Default for FormulaErrorDetector {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

impl FormulaErrorDetector {
    pub fn from_config(config: &DetectionConfig) -> Self {
        FormulaErrorDetector {
            max_cycle_depth: config.max_cycle_depth,
        }
    }

    /// Check one cell. Used by targeted re-checks as well as the full scan.
    pub fn check_cell(&self, workbook: &WorkbookContext, cell: &CellInfo) -> Vec<Finding> {
        if let Some(finding) = self.check_value_token(cell) {
            return vec![finding];
        }
        match &cell.formula {
            Some(formula) => self.check_formula(workbook, cell, formula),
            None => Vec::new(),
        }
    }

    fn check_value_token(&self, cell: &CellInfo) -> Option<Finding> {
        let token = cell.value.as_ref()?.as_text()?;
        let code = FormulaErrorCode::from_token(token)?;
        let mut finding = self
            .finding(cell, code, token_message(code))
            .with_value(token.trim());

        if let Some(formula) = &cell.formula {
            finding = finding.with_source(formula.clone());
        }
        let fix = cell.formula.as_deref().and_then(|f| match code {
            FormulaErrorCode::DivZero | FormulaErrorCode::Value => {
                Some(formula_text::wrap_iferror(f, "0"))
            }
            FormulaErrorCode::NotAvailable => Some(formula_text::wrap_iferror(f, "\"\"")),
            _ => None,
        });
        if matches!(
            code,
            FormulaErrorCode::DivZero | FormulaErrorCode::NotAvailable | FormulaErrorCode::Value
        ) {
            finding = finding.with_fix(fix);
        }
        Some(finding)
    }

    fn check_formula(&self, workbook: &WorkbookContext, cell: &CellInfo, formula: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        if !formula_text::balanced_brackets(formula) {
            findings.push(
                self.finding(cell, FormulaErrorCode::BrokenFormula, "Unbalanced brackets in formula")
                    .with_source(formula),
            );
        }

        for name in formula_text::function_calls(formula) {
            if formula_text::is_known_function(&name) {
                continue;
            }
            let mut finding = self
                .finding(cell, FormulaErrorCode::Name, format!("Unknown function: {}", name))
                .with_source(formula)
                .with_value(name.clone());
            if let Some(fixed) = formula_text::typo_correction(&name) {
                finding = finding.with_fix(Some(fixed.to_string()));
            }
            findings.push(finding);
            break;
        }

        for reference in extract_references(formula) {
            if !reference.is_within_limits() {
                findings.push(
                    self.finding(cell, FormulaErrorCode::Ref, "Reference outside the sheet grid")
                        .with_source(formula),
                );
                continue;
            }
            let sheet_name = reference.sheet().unwrap_or(&cell.sheet);
            let Some(sheet) = workbook.get_sheet(sheet_name) else {
                findings.push(
                    self.finding(
                        cell,
                        FormulaErrorCode::Ref,
                        format!("Reference to missing sheet '{}'", sheet_name),
                    )
                    .with_source(formula)
                    .with_value(sheet_name),
                );
                continue;
            };
            let cells = reference.cells();
            let is_range = cells.len() > 1;
            if is_range && cells.iter().all(|c| sheet.is_empty_at(c.row, c.col)) {
                findings.push(
                    self.finding(cell, FormulaErrorCode::EmptyRange, "Referenced range is empty")
                        .with_source(formula)
                        .with_confidence(0.8)
                        .potential_issue(),
                );
            }
        }

        match find_cycle(workbook, &cell.sheet, &cell.address, self.max_cycle_depth) {
            CycleSearch::Found(path) => {
                let extra_hops = path.len().saturating_sub(2) as i32;
                let confidence = DIRECT_CYCLE_CONFIDENCE * CYCLE_DECAY.powi(extra_hops);
                debug!(cell = %cell.key(), hops = path.len(), "circular reference found");
                findings.push(
                    self.finding(
                        cell,
                        FormulaErrorCode::CircularReference,
                        format!("Circular reference: {} -> {}", path.join(" -> "), cell.key()),
                    )
                    .with_source(formula)
                    .with_confidence(confidence),
                );
            }
            CycleSearch::DepthExceeded => {
                findings.push(
                    self.finding(
                        cell,
                        FormulaErrorCode::CircularReference,
                        format!(
                            "Dependency chain deeper than {} levels; circularity not verified",
                            self.max_cycle_depth
                        ),
                    )
                    .with_source(formula)
                    .with_confidence(DEPTH_EXCEEDED_CONFIDENCE)
                    // Unverified: a deep acyclic chain lands here too.
                    .with_severity(Severity::Low)
                    .potential_issue(),
                );
            }
            CycleSearch::Clear => {}
        }

        findings
    }

    fn finding(&self, cell: &CellInfo, code: FormulaErrorCode, message: impl Into<String>) -> Finding {
        Finding::new(
            ErrorKind::Formula(code),
            Location::cell(&cell.sheet, &cell.address),
            severity_for(code),
            message,
        )
        .with_confidence(TOKEN_CONFIDENCE)
    }
}

impl ErrorDetector for FormulaErrorDetector {
    fn name(&self) -> &'static str {
        "formula"
    }

    fn detect(&self, workbook: &WorkbookContext) -> Result<Vec<Finding>> {
        Ok(workbook
            .cells()
            .flat_map(|cell| self.check_cell(workbook, cell))
            .collect())
    }

    fn can_detect(&self, kind: &ErrorKind) -> bool {
        matches!(kind, ErrorKind::Formula(_))
    }
}

pub(crate) fn severity_for(code: FormulaErrorCode) -> Severity {
    match code {
        FormulaErrorCode::CircularReference | FormulaErrorCode::Ref => Severity::Critical,
        FormulaErrorCode::DivZero | FormulaErrorCode::Value | FormulaErrorCode::Name => Severity::High,
        FormulaErrorCode::NotAvailable | FormulaErrorCode::Num => Severity::Medium,
        _ => Severity::Low,
    }
}

fn token_message(code: FormulaErrorCode) -> &'static str {
    match code {
        FormulaErrorCode::DivZero => "Division by zero",
        FormulaErrorCode::NotAvailable => "Value not available",
        FormulaErrorCode::Name => "Unrecognised name in formula",
        FormulaErrorCode::Null => "Invalid range intersection",
        FormulaErrorCode::Num => "Invalid numeric value",
        FormulaErrorCode::Ref => "Invalid cell reference",
        FormulaErrorCode::Value => "Wrong value type in formula",
        FormulaErrorCode::Spill => "Spill range is blocked",
        FormulaErrorCode::Calc => "Calculation could not be completed",
        _ => "Formula error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use excelint_engine::model::CellValue;

    fn workbook(cells: &[(&str, Option<&str>, Option<CellValue>)]) -> WorkbookContext {
        let mut wb = WorkbookContext::new("f", "f.xlsx");
        let sheet = wb.sheet_mut("Sheet1");
        for (addr, formula, value) in cells {
            if let Some(f) = formula {
                sheet.set_formula(addr, *f);
            }
            if let Some(v) = value {
                sheet.set_value(addr, v.clone());
            }
        }
        wb.rebuild_dependencies();
        wb
    }

    fn kinds(findings: &[Finding]) -> Vec<FormulaErrorCode> {
        findings
            .iter()
            .filter_map(|f| match f.kind {
                ErrorKind::Formula(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_value_token_detected_and_formula_checks_skipped() {
        let wb = workbook(&[
            ("A1", None, Some(CellValue::Number(1.0))),
            ("B1", None, Some(CellValue::Number(0.0))),
            ("C1", Some("=A1/B1"), Some(CellValue::from("#DIV/0!"))),
        ]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.id, "Sheet1_C1_div_zero");
        assert_eq!(f.severity, Severity::High);
        assert!(f.is_auto_fixable);
        assert_eq!(f.suggested_fix.as_deref(), Some("=IFERROR(A1/B1, 0)"));
        assert_eq!(f.confidence, 0.95);
    }

    #[test]
    fn test_na_suggests_empty_string_fallback() {
        let wb = workbook(&[("A1", Some("=VLOOKUP(B1,D1:E5,2,FALSE)"), Some(CellValue::from("#N/A")))]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        assert_eq!(
            findings[0].suggested_fix.as_deref(),
            Some("=IFERROR(VLOOKUP(B1,D1:E5,2,FALSE), \"\")")
        );
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_ref_token_is_critical_and_not_auto_fixable() {
        let wb = workbook(&[("A1", Some("=#REF!+1"), Some(CellValue::from("#REF!")))]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(!findings[0].is_auto_fixable);
    }

    #[test]
    fn test_direct_circular_reference() {
        let wb = workbook(&[("A1", Some("=B1+1"), None), ("B1", Some("=A1*2"), None)]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        let circular: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == ErrorKind::Formula(FormulaErrorCode::CircularReference))
            .collect();
        assert_eq!(circular.len(), 2);
        assert!(circular.iter().all(|f| f.severity == Severity::Critical && f.confidence >= 0.8));
    }

    #[test]
    fn test_longer_cycle_decays_confidence() {
        let wb = workbook(&[
            ("A1", Some("=B1"), None),
            ("B1", Some("=C1"), None),
            ("C1", Some("=A1"), None),
        ]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        let a1 = findings.iter().find(|f| f.cell() == Some(("Sheet1", "A1"))).unwrap();
        assert!((a1.confidence - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_deep_running_total_is_not_a_critical_cycle() {
        let mut cells = vec![("A1".to_string(), None, Some(CellValue::Number(1.0)))];
        for row in 2..=14 {
            cells.push((format!("A{}", row), Some(format!("=A{}+1", row - 1)), None));
        }
        let borrowed: Vec<(&str, Option<&str>, Option<CellValue>)> = cells
            .iter()
            .map(|(addr, formula, value)| (addr.as_str(), formula.as_deref(), value.clone()))
            .collect();
        let wb = workbook(&borrowed);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();

        let circular: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == ErrorKind::Formula(FormulaErrorCode::CircularReference))
            .collect();
        assert!(!circular.is_empty());
        for f in circular {
            assert_eq!(f.severity, Severity::Low);
            assert_eq!(f.category, excelint_engine::model::FindingCategory::PotentialIssue);
            assert!((f.confidence - 0.1).abs() < 1e-9);
        }
        assert!(findings.iter().all(|f| f.severity != Severity::Critical));
    }

    #[test]
    fn test_broken_syntax_and_unknown_function() {
        let wb = workbook(&[
            ("A1", Some("=SUM(B1:B3"), None),
            ("B1", None, Some(CellValue::Number(1.0))),
            ("A2", Some("=VLOKUP(B1,C1:D2,2)"), None),
        ]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        assert!(kinds(&findings).contains(&FormulaErrorCode::BrokenFormula));
        let name = findings
            .iter()
            .find(|f| f.kind == ErrorKind::Formula(FormulaErrorCode::Name))
            .unwrap();
        assert_eq!(name.suggested_fix.as_deref(), Some("VLOOKUP"));
    }

    #[test]
    fn test_missing_sheet_and_out_of_grid_references() {
        let wb = workbook(&[
            ("A1", Some("=Budget!B2*2"), None),
            ("A2", Some("=XFE1+1"), None),
        ]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        assert_eq!(kinds(&findings), vec![FormulaErrorCode::Ref, FormulaErrorCode::Ref]);
        assert!(findings[0].message.contains("Budget"));
    }

    #[test]
    fn test_empty_range_is_a_potential_issue() {
        let wb = workbook(&[("A1", Some("=SUM(C1:C5)"), None)]);
        let findings = FormulaErrorDetector::default().detect(&wb).unwrap();
        assert_eq!(kinds(&findings), vec![FormulaErrorCode::EmptyRange]);
        assert_eq!(findings[0].category, excelint_engine::model::FindingCategory::PotentialIssue);
    }

    #[test]
    fn test_clean_formula_has_no_findings() {
        let wb = workbook(&[
            ("A1", None, Some(CellValue::Number(2.0))),
            ("A2", Some("=IFERROR(A1*2, 0)"), Some(CellValue::Number(4.0))),
        ]);
        assert!(FormulaErrorDetector::default().detect(&wb).unwrap().is_empty());
    }
}
