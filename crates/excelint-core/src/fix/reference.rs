//! Fixes for broken references and circular chains.

use excelint_engine::model::{
    CellRef, CellValue, CycleSearch, ErrorKind, Finding, FormulaErrorCode, FormulaRef, MAX_CYCLE_DEPTH,
    QualifiedRef, WorkbookContext, find_cycle, format_number, reference_spans,
};

use super::{FixResult, FixStrategy, current_formula, fix_error, replace_spans};
use crate::error::Result;
use crate::formula_text::wrap_iferror;

const REF_TOKEN: &str = "#REF!";
const REF_RANGE_TOKEN: &str = "#REF!:#REF!";

/// Replaces `#REF!` tokens with a valid reference, or guards the formula
/// when the broken reference is not visible in its text.
pub struct RefFix;

impl RefFix {
    /// The sheet's used range, `A1:A1` when unknown or empty.
    fn used_range(workbook: Option<&WorkbookContext>, sheet: Option<&str>) -> String {
        let used = sheet
            .zip(workbook)
            .and_then(|(name, wb)| wb.get_sheet(name))
            .filter(|s| s.row_count() > 0 && s.column_count() > 0)
            .map(|s| CellRef::new(s.column_count() - 1, s.row_count() - 1));
        match used {
            Some(end) => format!("A1:{}", end),
            None => "A1:A1".to_string(),
        }
    }
}

impl FixStrategy for RefFix {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        finding.kind == ErrorKind::Formula(FormulaErrorCode::Ref)
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        match finding.source.as_deref().map_or(0, |f| f.matches(REF_TOKEN).count()) {
            0 => 0.6,
            1 => 0.7,
            _ => 0.5,
        }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let formula = current_formula(finding, workbook)?;
        let confidence = self.get_confidence(finding);
        if !formula.contains(REF_TOKEN) {
            let fixed = wrap_iferror(&formula, "0");
            return Ok(FixResult::fixed(
                finding,
                formula,
                fixed,
                confidence,
                "Guarded the broken reference with IFERROR",
            ));
        }

        let range = Self::used_range(workbook, finding.location.sheet());
        let fixed = formula.replace(REF_RANGE_TOKEN, &range).replace(REF_TOKEN, "A1");
        Ok(FixResult::fixed(
            finding,
            formula,
            fixed,
            confidence,
            "Replaced the deleted reference; review the new target",
        ))
    }
}

/// Breaks a circular chain. A cell reading itself reads `0` instead; a longer
/// loop has its first edge replaced by the referenced cell's cached value.
pub struct CircularFix;

impl CircularFix {
    fn own_position(finding: &Finding) -> Option<(&str, CellRef)> {
        let (sheet, address) = finding.cell()?;
        Some((sheet, CellRef::parse(address)?))
    }

    /// Spans of single-cell tokens in `formula` that point at `target`.
    fn spans_to(formula: &str, own_sheet: &str, target: &QualifiedRef) -> Vec<std::ops::Range<usize>> {
        reference_spans(formula)
            .into_iter()
            .filter_map(|(span, reference)| match reference {
                FormulaRef::Cell { sheet, cell } => {
                    let sheet = sheet.as_deref().unwrap_or(own_sheet);
                    (sheet == target.sheet && cell == target.cell).then_some(span)
                }
                FormulaRef::Range { .. } => None,
            })
            .collect()
    }

    fn literal(value: Option<&CellValue>) -> String {
        match value {
            Some(CellValue::Number(n)) => format_number(*n),
            Some(CellValue::Bool(b)) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Some(CellValue::Text(s)) if !s.trim().is_empty() => format!("\"{}\"", s.replace('"', "\"\"")),
            _ => "0".to_string(),
        }
    }
}

impl FixStrategy for CircularFix {
    fn name(&self) -> &'static str {
        "circular_reference"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        finding.kind == ErrorKind::Formula(FormulaErrorCode::CircularReference)
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        let self_reference = Self::own_position(finding).is_some_and(|(sheet, cell)| {
            let own = QualifiedRef::new(sheet, cell);
            finding
                .source
                .as_deref()
                .is_some_and(|f| !Self::spans_to(f, sheet, &own).is_empty())
        });
        if self_reference { 0.9 } else { 0.7 }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let formula = current_formula(finding, workbook)?;
        let Some((sheet, cell)) = Self::own_position(finding) else {
            return Err(fix_error(finding, "circular reference is not tied to a cell"));
        };
        let confidence = self.get_confidence(finding);

        let own = QualifiedRef::new(sheet, cell);
        let own_spans = Self::spans_to(&formula, sheet, &own);
        if !own_spans.is_empty() {
            let fixed = replace_spans(&formula, &own_spans, "0");
            return Ok(FixResult::fixed(
                finding,
                formula,
                fixed,
                confidence,
                "Replaced the self reference with 0",
            ));
        }

        let Some(wb) = workbook else {
            return Err(fix_error(finding, "workbook needed to trace the cycle"));
        };
        let search = find_cycle(wb, sheet, &own.cell.to_string(), MAX_CYCLE_DEPTH);
        let next = match &search {
            CycleSearch::Found(path) if path.len() > 1 => &path[1],
            CycleSearch::Found(_) => {
                return Err(fix_error(finding, "cell reads itself through a range"));
            }
            _ => return Err(fix_error(finding, "no cycle found from this cell")),
        };
        let Some(target) = QualifiedRef::parse(next, sheet) else {
            return Err(fix_error(finding, format!("cannot parse cycle edge {}", next)));
        };
        let spans = Self::spans_to(&formula, sheet, &target);
        if spans.is_empty() {
            return Err(fix_error(finding, format!("{} is only reached through a range", next)));
        }

        let cached = wb.get_cell(&target.sheet, &target.cell.to_string()).and_then(|c| c.value.as_ref());
        let literal = Self::literal(cached);
        let fixed = replace_spans(&formula, &spans, &literal);
        Ok(FixResult::fixed(
            finding,
            formula,
            fixed,
            confidence,
            format!("Broke the cycle by using the current value of {}", next),
        ))
    }
}
