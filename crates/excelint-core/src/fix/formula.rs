//! Fixes for `#DIV/0!`, `#N/A` and `#NAME?`.

use std::sync::OnceLock;

use excelint_engine::model::{
    CellRef, ErrorKind, Finding, FormulaErrorCode, WorkbookContext, strip_string_literals,
};
use regex::Regex;

use super::{FixResult, FixStrategy, current_formula, fix_error};
use crate::error::Result;
use crate::formula_text::{body, function_calls, rewrite_function_names, typo_correction, wrap_iferror};

struct Patterns {
    simple_division: Regex,
    plain_reference: Regex,
    unquoted_argument: Regex,
    range_typo: Regex,
    word: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("fix pattern regex must compile");
        let reference = r"(?:(?:'[^']+'|[A-Za-z0-9_.]+)!)?\$?[A-Za-z]{1,3}\$?\d+";
        Patterns {
            simple_division: re(&format!(r"^=\s*{reference}\s*/\s*{reference}\s*$")),
            plain_reference: re(&format!("^{reference}$")),
            unquoted_argument: re(r"(?<func>[A-Za-z][A-Za-z0-9.]*)\s*\(\s*(?<arg>[A-Za-z][A-Za-z0-9]*)\s*,"),
            range_typo: re(r"(?<col>[A-Za-z]{1,3}):(?<row>\d+)"),
            word: re(r"[A-Za-z_][A-Za-z0-9_.]*"),
        }
    })
}

fn is_formula(finding: &Finding, code: FormulaErrorCode) -> bool {
    finding.kind == ErrorKind::Formula(code)
}

/// Byte offsets of `/` outside parentheses and string literals.
fn top_level_divisions(text: &str) -> Vec<usize> {
    let mut depth = 0usize;
    let mut positions = Vec::new();
    for (i, ch) in strip_string_literals(text).char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => positions.push(i),
            _ => {}
        }
    }
    positions
}

/// `NAME(...)` where the first `(` closes at the very end.
fn is_single_call(text: &str) -> bool {
    let Some(open) = text.find('(') else {
        return false;
    };
    let name = &text[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_') {
        return false;
    }
    let mut depth = 0usize;
    for (i, ch) in strip_string_literals(text).char_indices().skip_while(|(i, _)| *i < open) {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Guards divisions. Averages and anything hard to split get `IFERROR`;
/// a division by a plain operand gets an explicit zero test.
pub struct DivZeroFix;

impl DivZeroFix {
    fn rewrite(formula: &str) -> String {
        let calls = function_calls(formula);
        if calls.iter().any(|c| c == "AVERAGE") || patterns().simple_division.is_match(formula) {
            return wrap_iferror(formula, "0");
        }

        let expr = body(formula);
        let divisions = top_level_divisions(expr);
        let Some(&last) = divisions.last() else {
            return wrap_iferror(formula, "0");
        };
        let numerator = expr[..last].trim();
        let denominator = expr[last + 1..].trim();
        let plain = patterns().plain_reference.is_match(denominator);

        let guarded = if calls.iter().any(|c| c == "SUM") {
            plain || is_single_call(denominator)
        } else {
            divisions.len() == 1 && plain
        };
        if guarded && !numerator.is_empty() {
            format!("=IF({den}=0, 0, {num}/{den})", den = denominator, num = numerator)
        } else {
            wrap_iferror(formula, "0")
        }
    }
}

impl FixStrategy for DivZeroFix {
    fn name(&self) -> &'static str {
        "div_zero"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        is_formula(finding, FormulaErrorCode::DivZero)
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        let formula = finding.source.as_deref().unwrap_or("");
        if patterns().simple_division.is_match(formula) {
            0.95
        } else if formula.to_ascii_uppercase().contains("AVERAGE") {
            0.90
        } else if formula.contains('/') {
            0.85
        } else {
            0.70
        }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let formula = current_formula(finding, workbook)?;
        let fixed = Self::rewrite(&formula);
        Ok(FixResult::fixed(
            finding,
            formula,
            fixed,
            self.get_confidence(finding),
            "Guarded the division against a zero denominator",
        ))
    }
}

const LOOKUP_FUNCTIONS: &[&str] = &["VLOOKUP", "HLOOKUP", "XLOOKUP", "LOOKUP", "MATCH", "INDEX"];

/// Wraps lookups that can miss in `IFERROR`.
pub struct NotAvailableFix;

impl FixStrategy for NotAvailableFix {
    fn name(&self) -> &'static str {
        "not_available"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        is_formula(finding, FormulaErrorCode::NotAvailable)
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        let formula = finding.source.as_deref().unwrap_or("");
        if function_calls(formula).iter().any(|c| c.ends_with("LOOKUP")) {
            0.9
        } else {
            0.8
        }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let formula = current_formula(finding, workbook)?;
        let calls = function_calls(&formula);
        let Some(first) = calls.iter().find(|c| LOOKUP_FUNCTIONS.contains(&c.as_str())) else {
            return Err(fix_error(finding, "formula has no lookup function to guard"));
        };
        // A failed MATCH usually feeds arithmetic, so fall back to a number.
        let fallback = if first == "MATCH" { "0" } else { "\"\"" };
        let fixed = wrap_iferror(&formula, fallback);
        Ok(FixResult::fixed(
            finding,
            formula,
            fixed,
            self.get_confidence(finding),
            format!("Wrapped {} in IFERROR", first),
        ))
    }
}

/// Repairs unknown names: typos first, then unquoted text, range typos and
/// named-range case, falling back to an `IFERROR` guard.
pub struct NameFix;

impl NameFix {
    fn quote_text_arguments(formula: &str, workbook: Option<&WorkbookContext>, sheet: &str) -> String {
        let cleaned = strip_string_literals(formula);
        let mut out = String::with_capacity(formula.len() + 4);
        let mut last = 0;
        for caps in patterns().unquoted_argument.captures_iter(&cleaned) {
            let Some(arg) = caps.name("arg") else {
                continue;
            };
            let text = arg.as_str();
            let upper = text.to_ascii_uppercase();
            if CellRef::parse(text).is_some()
                || upper == "TRUE"
                || upper == "FALSE"
                || is_named_range(workbook, sheet, text)
            {
                continue;
            }
            out.push_str(&formula[last..arg.start()]);
            out.push('"');
            out.push_str(&formula[arg.range()]);
            out.push('"');
            last = arg.end();
        }
        out.push_str(&formula[last..]);
        out
    }

    fn fix_range_typos(formula: &str) -> String {
        let cleaned = strip_string_literals(formula);
        let mut out = String::with_capacity(formula.len());
        let mut last = 0;
        for caps in patterns().range_typo.captures_iter(&cleaned) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let before = cleaned[..whole.start()].chars().next_back();
            let after = cleaned[whole.end()..].chars().next();
            if before.is_some_and(|c| c.is_ascii_alphanumeric() || c == '$')
                || after.is_some_and(|c| c.is_ascii_alphanumeric())
            {
                continue;
            }
            out.push_str(&formula[last..whole.start()]);
            out.push_str(&caps["col"]);
            out.push_str(&caps["row"]);
            last = whole.end();
        }
        out.push_str(&formula[last..]);
        out
    }

    fn fix_named_range_case(formula: &str, workbook: Option<&WorkbookContext>, sheet: &str) -> String {
        let Some(names) = workbook.and_then(|wb| wb.get_sheet(sheet)).map(|s| &s.named_ranges) else {
            return formula.to_string();
        };
        let cleaned = strip_string_literals(formula);
        let mut out = String::with_capacity(formula.len());
        let mut last = 0;
        for m in patterns().word.find_iter(&cleaned) {
            let canonical = names
                .keys()
                .find(|name| name.eq_ignore_ascii_case(m.as_str()) && name.as_str() != m.as_str());
            if let Some(canonical) = canonical {
                out.push_str(&formula[last..m.start()]);
                out.push_str(canonical);
                last = m.end();
            }
        }
        out.push_str(&formula[last..]);
        out
    }

    fn has_unquoted_text(formula: &str) -> bool {
        let cleaned = strip_string_literals(formula);
        patterns().unquoted_argument.captures_iter(&cleaned).any(|caps| {
            let arg = &caps["arg"];
            let upper = arg.to_ascii_uppercase();
            CellRef::parse(arg).is_none() && upper != "TRUE" && upper != "FALSE"
        })
    }
}

fn is_named_range(workbook: Option<&WorkbookContext>, sheet: &str, name: &str) -> bool {
    workbook
        .and_then(|wb| wb.get_sheet(sheet))
        .is_some_and(|s| s.named_ranges.keys().any(|n| n.eq_ignore_ascii_case(name)))
}

impl FixStrategy for NameFix {
    fn name(&self) -> &'static str {
        "name"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        is_formula(finding, FormulaErrorCode::Name)
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        let formula = finding.source.as_deref().unwrap_or("");
        if function_calls(formula).iter().any(|c| typo_correction(c).is_some()) {
            0.95
        } else if Self::has_unquoted_text(formula) {
            0.9
        } else {
            0.7
        }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let formula = current_formula(finding, workbook)?;
        let sheet = finding.location.sheet().unwrap_or_default();
        let confidence = self.get_confidence(finding);

        let (renamed, typos) = rewrite_function_names(&formula);
        if renamed != formula {
            let message = if typos > 0 {
                "Corrected misspelled function names"
            } else {
                "Normalised function name case"
            };
            return Ok(FixResult::fixed(finding, formula, renamed, confidence, message));
        }

        let attempts = [
            ("Quoted a text argument", Self::quote_text_arguments(&formula, workbook, sheet)),
            ("Corrected a malformed cell reference", Self::fix_range_typos(&formula)),
            ("Matched the named range spelling", Self::fix_named_range_case(&formula, workbook, sheet)),
        ];
        if let Some((message, fixed)) = attempts.into_iter().find(|(_, fixed)| *fixed != formula) {
            return Ok(FixResult::fixed(finding, formula, fixed, confidence, message));
        }

        let fixed = wrap_iferror(&formula, "\"#NAME?\"");
        Ok(FixResult::fixed(
            finding,
            formula,
            fixed,
            confidence,
            "Guarded the unresolved name with IFERROR",
        ))
    }
}
