//! Performance and readability suggestions for a workbook.
//!
//! Rules run in a fixed order; the result is sorted by priority (5 highest)
//! with ties kept in rule order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use excelint_engine::model::{CellInfo, CellValue, WorkbookContext};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::formula_text::{VOLATILE_FUNCTIONS, function_calls, nesting_depth};

const MAX_RETURNED: usize = 10;
const MAX_CACHED: usize = 20;
const ARRAY_FORMULA_MIN_CELLS: usize = 5;
const REDUNDANT_MIN_CELLS: usize = 3;
const LOOKUP_MIN_CELLS: usize = 5;
const FORMAT_LOAD_MIN_CELLS: usize = 1000;
const PIVOT_MIN_CELLS: usize = 10;
const VALIDATION_MIN_CELLS: usize = 10;
const COMPLEX_MAX_DEPTH: usize = 5;
const COMPLEX_MAX_LENGTH: usize = 200;
const AGGREGATE_FUNCTIONS: &[&str] = &["SUMIF", "SUMIFS", "COUNTIF", "COUNTIFS", "AVERAGEIF", "AVERAGEIFS"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationType {
    Formula,
    Performance,
    Structure,
    DataQuality,
    Readability,
}

impl OptimizationType {
    pub fn label(&self) -> &'static str {
        match self {
            OptimizationType::Formula => "formula",
            OptimizationType::Performance => "performance",
            OptimizationType::Structure => "structure",
            OptimizationType::DataQuality => "data_quality",
            OptimizationType::Readability => "readability",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizationSuggestion {
    pub rule: &'static str,
    pub kind: OptimizationType,
    /// 1 to 5, 5 most urgent.
    pub priority: u8,
    pub title: String,
    pub description: String,
    pub affected_cells: Vec<String>,
    pub estimated_impact: &'static str,
    pub implementation_steps: Vec<&'static str>,
    pub example: Option<String>,
    pub auto_applicable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OptimizationSummary {
    pub has_suggestions: bool,
    pub total_suggestions: usize,
    pub auto_applicable: usize,
    pub by_type: BTreeMap<&'static str, usize>,
    pub top_suggestions: Vec<OptimizationSuggestion>,
}

fn reference_re() -> &'static Regex {
    static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
    REFERENCE_RE.get_or_init(|| Regex::new(r"\$?[A-Za-z]{1,3}\$?\d+").expect("reference regex must compile"))
}

fn sub_expression_re() -> &'static Regex {
    static SUB_EXPRESSION_RE: OnceLock<Regex> = OnceLock::new();
    SUB_EXPRESSION_RE
        .get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z0-9.]*\([^()]+\)").expect("sub-expression regex must compile"))
}

/// Formula cells of every sheet, sheets in name order and cells row-major.
fn formula_cells(workbook: &WorkbookContext) -> impl Iterator<Item = (&CellInfo, &str)> {
    workbook.sheets.values().flat_map(|sheet| {
        sheet
            .cells_row_major()
            .into_iter()
            .filter_map(|cell| cell.formula.as_deref().map(|f| (cell, f)))
    })
}

/// Produces and caches [`OptimizationSuggestion`]s per workbook.
#[derive(Debug, Default)]
pub struct OptimizationAdvisor {
    cache: HashMap<String, Vec<OptimizationSuggestion>>,
}

impl OptimizationAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every rule and return the ten most urgent suggestions.
    pub fn analyze(&mut self, workbook: &WorkbookContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();
        suggestions.extend(volatile_functions(workbook));
        suggestions.extend(array_formula_opportunity(workbook));
        suggestions.extend(redundant_calculations(workbook));
        suggestions.extend(lookup_optimization(workbook));
        suggestions.extend(conditional_format_load(workbook));
        suggestions.extend(pivot_table_opportunity(workbook));
        suggestions.extend(missing_data_validation(workbook));
        suggestions.extend(formula_complexity(workbook));

        suggestions.sort_by(|a, b| b.priority.cmp(&a.priority));
        debug!(file_id = %workbook.file_id, count = suggestions.len(), "optimization analysis finished");

        suggestions.truncate(MAX_CACHED);
        self.cache.insert(workbook.file_id.clone(), suggestions.clone());
        suggestions.truncate(MAX_RETURNED);
        suggestions
    }

    pub fn summary(&self, file_id: &str) -> OptimizationSummary {
        let Some(suggestions) = self.cache.get(file_id).filter(|s| !s.is_empty()) else {
            return OptimizationSummary::default();
        };
        let mut by_type = BTreeMap::new();
        for s in suggestions {
            *by_type.entry(s.kind.label()).or_insert(0) += 1;
        }
        OptimizationSummary {
            has_suggestions: true,
            total_suggestions: suggestions.len(),
            auto_applicable: suggestions.iter().filter(|s| s.auto_applicable).count(),
            by_type,
            top_suggestions: suggestions.iter().take(5).cloned().collect(),
        }
    }

    pub fn clear(&mut self, file_id: &str) {
        self.cache.remove(file_id);
    }
}

fn volatile_functions(workbook: &WorkbookContext) -> Option<OptimizationSuggestion> {
    let affected: Vec<String> = formula_cells(workbook)
        .filter(|(_, f)| function_calls(f).iter().any(|c| VOLATILE_FUNCTIONS.contains(&c.as_str())))
        .map(|(cell, _)| cell.key())
        .collect();
    if affected.is_empty() {
        return None;
    }
    let priority = (4 + affected.len() / 10).min(5) as u8;
    Some(OptimizationSuggestion {
        rule: "volatile_functions",
        kind: OptimizationType::Formula,
        priority,
        title: "Reduce volatile functions".to_string(),
        description: format!(
            "{} cells use volatile functions that recalculate on every change",
            affected.len()
        ),
        affected_cells: affected.into_iter().take(10).collect(),
        estimated_impact: "20-50% faster recalculation",
        implementation_steps: vec![
            "Replace NOW()/TODAY() with a static timestamp where the value may stay fixed",
            "Replace INDIRECT() with direct references",
            "Replace OFFSET() with INDEX/MATCH",
        ],
        example: Some("=INDEX(A:A, MATCH(lookup_value, B:B, 0))".to_string()),
        auto_applicable: false,
    })
}

fn array_formula_opportunity(workbook: &WorkbookContext) -> Vec<OptimizationSuggestion> {
    let mut suggestions = Vec::new();
    for sheet in workbook.sheets.values() {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for cell in sheet.cells_row_major() {
            let Some(formula) = cell.formula.as_deref() else {
                continue;
            };
            let normalized = reference_re().replace_all(formula, "REF").to_ascii_uppercase();
            match groups.iter_mut().find(|(n, _)| *n == normalized) {
                Some((_, cells)) => cells.push(cell.key()),
                None => groups.push((normalized, vec![cell.key()])),
            }
        }
        for (_, cells) in groups.into_iter().filter(|(_, c)| c.len() >= ARRAY_FORMULA_MIN_CELLS) {
            suggestions.push(OptimizationSuggestion {
                rule: "array_formula_opportunity",
                kind: OptimizationType::Formula,
                priority: 3,
                title: "Combine repeated formulas into an array formula".to_string(),
                description: format!("{} cells on '{}' repeat the same formula shape", cells.len(), sheet.name),
                affected_cells: cells.into_iter().take(5).collect(),
                estimated_impact: "Simpler maintenance and consistent results",
                implementation_steps: vec![
                    "Select the target range",
                    "Enter one formula over the whole range",
                    "Prefer dynamic array functions such as SEQUENCE or FILTER",
                ],
                example: Some("=A1:A10*B1:B10".to_string()),
                auto_applicable: false,
            });
        }
    }
    suggestions
}

fn redundant_calculations(workbook: &WorkbookContext) -> Vec<OptimizationSuggestion> {
    let mut seen_order: Vec<String> = Vec::new();
    let mut cells_by_expr: HashMap<String, Vec<String>> = HashMap::new();
    for (cell, formula) in formula_cells(workbook) {
        let mut in_cell = HashSet::new();
        for m in sub_expression_re().find_iter(formula) {
            let expr = m.as_str().to_string();
            if !in_cell.insert(expr.clone()) {
                continue;
            }
            let cells = cells_by_expr.entry(expr.clone()).or_default();
            if cells.is_empty() {
                seen_order.push(expr);
            }
            cells.push(cell.key());
        }
    }

    seen_order
        .into_iter()
        .filter_map(|expr| {
            let cells = cells_by_expr.remove(&expr)?;
            (cells.len() >= REDUNDANT_MIN_CELLS).then(|| OptimizationSuggestion {
                rule: "redundant_calculations",
                kind: OptimizationType::Performance,
                priority: 4,
                title: "Compute a repeated expression once".to_string(),
                description: format!("'{}' is calculated in {} cells", expr, cells.len()),
                affected_cells: cells.into_iter().take(5).collect(),
                estimated_impact: "Up to 30% faster calculation",
                implementation_steps: vec![
                    "Put the expression in a helper cell",
                    "Reference the helper cell everywhere else",
                ],
                example: Some(format!("helper = {}", expr)),
                auto_applicable: true,
            })
        })
        .collect()
}

fn lookup_optimization(workbook: &WorkbookContext) -> Option<OptimizationSuggestion> {
    let affected: Vec<String> = formula_cells(workbook)
        .filter(|(_, f)| function_calls(f).iter().any(|c| c == "VLOOKUP"))
        .map(|(cell, _)| cell.key())
        .collect();
    (affected.len() >= LOOKUP_MIN_CELLS).then(|| OptimizationSuggestion {
        rule: "lookup_optimization",
        kind: OptimizationType::Formula,
        priority: 3,
        title: "Replace VLOOKUP with INDEX/MATCH".to_string(),
        description: format!("{} VLOOKUP calls could use INDEX/MATCH", affected.len()),
        affected_cells: affected.into_iter().take(5).collect(),
        estimated_impact: "Faster lookups that survive column inserts",
        implementation_steps: vec![
            "Rewrite VLOOKUP(A1, B:D, 3, FALSE)",
            "as INDEX(D:D, MATCH(A1, B:B, 0))",
            "Consider XLOOKUP where available",
        ],
        example: Some("=INDEX(return_column, MATCH(value, lookup_column, 0))".to_string()),
        auto_applicable: true,
    })
}

fn conditional_format_load(workbook: &WorkbookContext) -> Option<OptimizationSuggestion> {
    let total = workbook.total_cells();
    (total > FORMAT_LOAD_MIN_CELLS).then(|| OptimizationSuggestion {
        rule: "conditional_format_load",
        kind: OptimizationType::Performance,
        priority: 2,
        title: "Consolidate conditional formatting".to_string(),
        description: format!("{} populated cells; prefer range-based formatting rules", total),
        affected_cells: Vec::new(),
        estimated_impact: "Faster redraws",
        implementation_steps: vec![
            "Merge similar conditional formatting rules",
            "Apply rules to whole ranges instead of single cells",
            "Remove rules that no longer match anything",
        ],
        example: None,
        auto_applicable: false,
    })
}

fn pivot_table_opportunity(workbook: &WorkbookContext) -> Vec<OptimizationSuggestion> {
    workbook
        .sheets
        .values()
        .filter_map(|sheet| {
            let affected: Vec<String> = sheet
                .cells_row_major()
                .into_iter()
                .filter(|c| {
                    c.formula.as_deref().is_some_and(|f| {
                        function_calls(f).iter().any(|name| AGGREGATE_FUNCTIONS.contains(&name.as_str()))
                    })
                })
                .map(CellInfo::key)
                .collect();
            (affected.len() >= PIVOT_MIN_CELLS).then(|| OptimizationSuggestion {
                rule: "pivot_table_opportunity",
                kind: OptimizationType::Structure,
                priority: 3,
                title: "Summarise with a pivot table".to_string(),
                description: format!(
                    "{} conditional aggregates on '{}' could be one pivot table",
                    affected.len(),
                    sheet.name
                ),
                affected_cells: affected.into_iter().take(5).collect(),
                estimated_impact: "Faster, more flexible summaries",
                implementation_steps: vec![
                    "Convert the source data to a table",
                    "Insert a pivot table over it",
                    "Place the grouping fields in rows and the measures in values",
                ],
                example: None,
                auto_applicable: false,
            })
        })
        .collect()
}

fn value_type(value: &CellValue) -> &'static str {
    match value {
        CellValue::Bool(_) => "boolean",
        CellValue::Number(_) => "number",
        CellValue::Text(_) => "text",
    }
}

/// One suggestion per sheet, for the first column holding enough typed input.
fn missing_data_validation(workbook: &WorkbookContext) -> Vec<OptimizationSuggestion> {
    let mut suggestions = Vec::new();
    for sheet in workbook.sheets.values() {
        let mut columns: BTreeMap<(usize, &'static str), Vec<String>> = BTreeMap::new();
        for cell in sheet.cells_row_major() {
            if cell.formula.is_some() {
                continue;
            }
            if let Some(value) = cell.visible_value() {
                columns
                    .entry((cell.position.col, value_type(value)))
                    .or_default()
                    .push(cell.key());
            }
        }
        let Some(((_, dtype), cells)) = columns.into_iter().find(|(_, c)| c.len() >= VALIDATION_MIN_CELLS) else {
            continue;
        };
        suggestions.push(OptimizationSuggestion {
            rule: "missing_data_validation",
            kind: OptimizationType::DataQuality,
            priority: 3,
            title: format!("Add {} data validation", dtype),
            description: format!("{} {} input cells on '{}' have no validation", cells.len(), dtype, sheet.name),
            affected_cells: cells.into_iter().take(5).collect(),
            estimated_impact: "Far fewer data entry errors",
            implementation_steps: vec![
                "Open Data > Data Validation",
                "Restrict input to the expected type",
                "Add an input message and an error alert",
            ],
            example: None,
            auto_applicable: true,
        });
    }
    suggestions
}

fn formula_complexity(workbook: &WorkbookContext) -> Option<OptimizationSuggestion> {
    let mut complex: Vec<(usize, String)> = formula_cells(workbook)
        .filter_map(|(cell, f)| {
            let depth = nesting_depth(f);
            (depth > COMPLEX_MAX_DEPTH || f.len() > COMPLEX_MAX_LENGTH).then(|| (depth, cell.key()))
        })
        .collect();
    if complex.is_empty() {
        return None;
    }
    complex.sort_by(|a, b| b.0.cmp(&a.0));
    Some(OptimizationSuggestion {
        rule: "formula_complexity",
        kind: OptimizationType::Readability,
        priority: 2,
        title: "Simplify complex formulas".to_string(),
        description: format!("{} formulas are deeply nested or very long", complex.len()),
        affected_cells: complex.into_iter().take(5).map(|(_, key)| key).collect(),
        estimated_impact: "Easier maintenance, fewer mistakes",
        implementation_steps: vec![
            "Split the formula into steps in helper cells",
            "Name intermediate results",
            "Use LET to bind repeated parts",
        ],
        example: Some("=LET(rate, 0.1, revenue, A1, cost, B1, (revenue-cost)*rate)".to_string()),
        auto_applicable: false,
    })
}
