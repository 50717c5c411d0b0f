//! Fixes for `#VALUE!` and for numbers stored as text.

use std::sync::OnceLock;

use excelint_engine::model::{
    DataQualityIssue, ErrorKind, Finding, FormulaErrorCode, WorkbookContext, format_number, strip_string_literals,
};
use regex::Regex;

use super::{FixResult, FixStrategy, current_formula, fix_error};
use crate::detect::numeric_text;
use crate::error::Result;
use crate::formula_text::wrap_iferror;

fn number_literal_re() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| Regex::new(r#""-?\d+(?:\.\d+)?""#).expect("number literal regex must compile"))
}

fn date_literal_re() -> &'static Regex {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    DATE_RE.get_or_init(|| {
        Regex::new(r#""\d{4}[-/]\d{1,2}[-/]\d{1,2}""#).expect("date literal regex must compile")
    })
}

/// Wrap each quoted literal matched by `re` in `function(...)`, skipping
/// literals already passed to it.
fn convert_literals(formula: &str, re: &Regex, function: &str) -> String {
    let mut out = String::with_capacity(formula.len() + 16);
    let mut last = 0;
    for m in re.find_iter(formula) {
        // Only literals that open a string, not text inside one.
        if formula[..m.start()].matches('"').count() % 2 != 0 {
            continue;
        }
        let prefix = formula[..m.start()].trim_end();
        let call = format!("{}(", function);
        if prefix.len() >= call.len()
            && prefix.is_char_boundary(prefix.len() - call.len())
            && prefix[prefix.len() - call.len()..].eq_ignore_ascii_case(&call)
        {
            continue;
        }
        out.push_str(&formula[last..m.start()]);
        out.push_str(&call);
        out.push_str(m.as_str());
        out.push(')');
        last = m.end();
    }
    out.push_str(&formula[last..]);
    out
}

fn has_arithmetic(formula: &str) -> bool {
    let cleaned = strip_string_literals(formula);
    let body = cleaned.trim().trim_start_matches('=');
    body.chars().any(|c| matches!(c, '+' | '-' | '*' | '/' | '^'))
}

/// Converts text operands with `VALUE`/`DATEVALUE`, or guards the formula.
pub struct ValueFix;

impl FixStrategy for ValueFix {
    fn name(&self) -> &'static str {
        "value"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        finding.kind == ErrorKind::Formula(FormulaErrorCode::Value)
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        let formula = finding.source.as_deref().unwrap_or("");
        let upper = formula.to_ascii_uppercase();
        if ["VALUE(", "DATEVALUE(", "TIMEVALUE("].iter().any(|f| upper.contains(f)) {
            0.9
        } else if has_arithmetic(formula) {
            0.8
        } else {
            0.7
        }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let formula = current_formula(finding, workbook)?;
        let confidence = self.get_confidence(finding);

        if has_arithmetic(&formula) {
            let converted = convert_literals(&formula, date_literal_re(), "DATEVALUE");
            let converted = convert_literals(&converted, number_literal_re(), "VALUE");
            if converted != formula {
                return Ok(FixResult::fixed(
                    finding,
                    formula,
                    converted,
                    confidence,
                    "Converted text operands to values",
                ));
            }
        }

        let fixed = wrap_iferror(&formula, "0");
        Ok(FixResult::fixed(
            finding,
            formula,
            fixed,
            confidence,
            "Guarded the formula with IFERROR",
        ))
    }
}

/// Rewrites a number stored as text (`"1,200"`) as the number itself.
pub struct TypeMismatchFix;

impl FixStrategy for TypeMismatchFix {
    fn name(&self) -> &'static str {
        "type_mismatch"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        finding.kind == ErrorKind::DataQuality(DataQualityIssue::TypeMismatch)
    }

    fn get_confidence(&self, _finding: &Finding) -> f64 {
        0.85
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let live = finding
            .cell()
            .zip(workbook)
            .and_then(|((sheet, address), wb)| wb.get_cell(sheet, address))
            .and_then(|cell| cell.visible_value())
            .map(|v| v.to_string());
        let Some(text) = live.or_else(|| finding.value.clone()) else {
            return Err(fix_error(finding, "no cell value to convert"));
        };
        let Some(number) = numeric_text(&text) else {
            return Err(fix_error(finding, format!("'{}' is not a number", text)));
        };
        Ok(FixResult::fixed(
            finding,
            text,
            format_number(number),
            self.get_confidence(finding),
            "Stored the value as a number",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use excelint_engine::model::{CellValue, Location, Severity};

    fn value_finding(formula: &str) -> Finding {
        Finding::new(
            ErrorKind::Formula(FormulaErrorCode::Value),
            Location::cell("Sheet1", "C1"),
            Severity::High,
            "value",
        )
        .with_source(formula)
    }

    fn fixed(formula: &str) -> String {
        ValueFix.apply_fix(&value_finding(formula), None).unwrap().fixed_formula.unwrap()
    }

    #[test]
    fn test_quoted_number_in_arithmetic() {
        assert_eq!(fixed("=A1+\"5\""), "=A1+VALUE(\"5\")");
        assert_eq!(ValueFix.get_confidence(&value_finding("=A1+\"5\"")), 0.8);
    }

    #[test]
    fn test_quoted_date_becomes_datevalue() {
        assert_eq!(fixed("=A1-\"2024-01-31\""), "=A1-DATEVALUE(\"2024-01-31\")");
    }

    #[test]
    fn test_existing_conversion_is_left_alone() {
        assert_eq!(fixed("=VALUE(\"5\")*A1"), "=IFERROR(VALUE(\"5\")*A1, 0)");
        assert_eq!(ValueFix.get_confidence(&value_finding("=VALUE(\"5\")*A1")), 0.9);
    }

    #[test]
    fn test_no_arithmetic_is_guarded() {
        assert_eq!(fixed("=UPPER(A1)"), "=IFERROR(UPPER(A1), 0)");
        assert_eq!(ValueFix.get_confidence(&value_finding("=UPPER(A1)")), 0.7);
    }

    #[test]
    fn test_type_mismatch_converts_numeric_text() {
        let mut wb = WorkbookContext::new("f", "book.xlsx");
        wb.sheet_mut("Sheet1").set_value("A5", CellValue::from("1,200"));
        let finding = Finding::new(
            ErrorKind::DataQuality(DataQualityIssue::TypeMismatch),
            Location::cell("Sheet1", "A5"),
            Severity::Medium,
            "mismatch",
        );
        let result = TypeMismatchFix.apply_fix(&finding, Some(&wb)).unwrap();
        assert_eq!(result.original_formula.as_deref(), Some("1,200"));
        assert_eq!(result.fixed_formula.as_deref(), Some("1200"));

        let text = finding.clone().with_value("n/a");
        assert!(TypeMismatchFix.apply_fix(&text, None).is_err());
    }
}
