//! Error prediction for cells affected by an edit.
//!
//! Given the cells that just changed, the predictor looks one hop forward
//! through the dependency graph and scores each affected formula with a set
//! of independent heuristics. A cell gets one prediction, for the heuristic
//! with the highest probability. The workbook is never mutated.

use std::collections::{BTreeSet, VecDeque};
use std::sync::OnceLock;

use chrono::Utc;
use excelint_engine::model::{
    CellInfo, CycleSearch, FormulaRef, QualifiedRef, WorkbookContext, extract_references,
    find_cycle, split_qualified, strip_string_literals,
};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::{DetectionConfig, PredictionConfig};
use crate::formula_text::function_calls;

/// Sheet assumed for changed cells given without a `Sheet!` prefix.
pub const DEFAULT_SHEET: &str = "Sheet1";

const MAX_RELATED_CELLS: usize = 5;
const SUMMARY_ENTRIES: usize = 5;
const SUMMARY_TIPS: usize = 2;

const NUMERIC_FUNCTIONS: &[&str] = &["SUM", "AVERAGE", "MIN", "MAX", "COUNT"];

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.7 {
            RiskLevel::High
        } else if probability >= 0.4 {
            RiskLevel::Medium
        } else if probability >= 0.2 {
            RiskLevel::Low
        } else {
            RiskLevel::None
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictedErrorType {
    CircularReference,
    DivZero,
    RefError,
    ValueError,
    DependencyError,
}

impl PredictedErrorType {
    fn describe(&self, address: &str) -> String {
        match self {
            PredictedErrorType::CircularReference => format!("{} may create a circular reference", address),
            PredictedErrorType::DivZero => format!("{} may divide by zero", address),
            PredictedErrorType::RefError => format!("{} may reference an invalid cell or sheet", address),
            PredictedErrorType::ValueError => format!("{} may mix incompatible data types", address),
            PredictedErrorType::DependencyError => format!("{} may be missing some of its inputs", address),
        }
    }

    fn tips(&self) -> [&'static str; 3] {
        match self {
            PredictedErrorType::CircularReference => [
                "Review how the formula's references chain together",
                "Take extra care with INDIRECT references",
                "Use the circular reference tracing tool",
            ],
            PredictedErrorType::DivZero => [
                "Handle the error with IFERROR",
                "Check the denominator with IF before dividing",
                "e.g. =IF(B1=0, 0, A1/B1)",
            ],
            PredictedErrorType::RefError => [
                "Check that the referenced cells and sheets exist",
                "Validate INDIRECT targets before using them",
                "Manage references with named ranges",
            ],
            PredictedErrorType::ValueError => [
                "Check that the data types match",
                "Convert types with VALUE or TEXT",
                "Test types with ISNUMBER or ISTEXT",
            ],
            PredictedErrorType::DependencyError => [
                "Check that the referenced range contains data",
                "Count blank inputs with COUNTA",
                "Set default values for optional inputs",
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorPrediction {
    pub sheet: String,
    pub address: String,
    pub risk_level: RiskLevel,
    pub probability: f64,
    pub error_type: PredictedErrorType,
    pub description: String,
    pub prevention_tips: Vec<String>,
    /// Up to five of the cell's dependencies.
    pub related_cells: Vec<String>,
}

impl ErrorPrediction {
    pub fn key(&self) -> String {
        format!("{}!{}", self.sheet, self.address)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictionDigest {
    pub cell: String,
    pub error_type: PredictedErrorType,
    pub risk_level: RiskLevel,
    /// Percentage, one decimal.
    pub probability: f64,
    pub description: String,
    pub tips: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub has_predictions: bool,
    pub total_risks: usize,
    pub high_risks: usize,
    pub predictions: Vec<PredictionDigest>,
}

struct CacheEntry {
    key: String,
    file_id: String,
    predictions: Vec<ErrorPrediction>,
}

type Heuristic = fn(&ErrorPredictor, &WorkbookContext, &CellInfo, &str) -> f64;

pub struct ErrorPredictor {
    config: PredictionConfig,
    max_cycle_depth: usize,
    cache: VecDeque<CacheEntry>,
}

impl Default for ErrorPredictor {
    fn default() -> Self {
        Self::new(&PredictionConfig::default(), &DetectionConfig::default())
    }
}

fn divisor_re() -> &'static Regex {
    static DIVISOR_RE: OnceLock<Regex> = OnceLock::new();
    DIVISOR_RE.get_or_init(|| {
        Regex::new(r"/\s*(?<divisor>\w+\([^)]*\)|(?:(?:'[^']+'|[A-Za-z0-9_.]+)!)?\$?[A-Za-z]+\$?\d+)")
            .expect("divisor regex must compile")
    })
}

impl ErrorPredictor {
    pub fn new(config: &PredictionConfig, detection: &DetectionConfig) -> Self {
        ErrorPredictor {
            config: config.clone(),
            max_cycle_depth: detection.max_cycle_depth,
            cache: VecDeque::new(),
        }
    }

    fn heuristics() -> [(PredictedErrorType, Heuristic); 5] {
        [
            (PredictedErrorType::CircularReference, Self::circular_risk),
            (PredictedErrorType::DivZero, Self::div_zero_risk),
            (PredictedErrorType::RefError, Self::ref_risk),
            (PredictedErrorType::ValueError, Self::type_mismatch_risk),
            (PredictedErrorType::DependencyError, Self::missing_dependency_risk),
        ]
    }

    /// Predict errors in the direct dependents of `changed_cells`, most
    /// likely first, capped at `max_predictions`.
    pub fn predict_errors<S: AsRef<str>>(
        &mut self,
        workbook: &WorkbookContext,
        changed_cells: &[S],
    ) -> Vec<ErrorPrediction> {
        let affected = affected_cells(workbook, changed_cells);
        debug!(changed = changed_cells.len(), affected = affected.len(), "predicting errors");

        let mut predictions = Vec::new();
        for (sheet, address) in &affected {
            let Some(cell) = workbook.get_cell(sheet, address) else {
                continue;
            };
            let Some(formula) = cell.formula.as_deref() else {
                continue;
            };
            if let Some(prediction) = self.score_cell(workbook, cell, formula) {
                predictions.push(prediction);
            }
        }

        predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        predictions.truncate(self.config.max_predictions);
        self.remember(&workbook.file_id, predictions.clone());
        predictions
    }

    fn score_cell(&self, workbook: &WorkbookContext, cell: &CellInfo, formula: &str) -> Option<ErrorPrediction> {
        let mut best: Option<(PredictedErrorType, f64)> = None;
        for (error_type, heuristic) in Self::heuristics() {
            let risk = heuristic(self, workbook, cell, formula);
            if risk > 0.0 && best.is_none_or(|(_, p)| risk > p) {
                best = Some((error_type, risk));
            }
        }
        let (error_type, probability) = best?;

        Some(ErrorPrediction {
            sheet: cell.sheet.clone(),
            address: cell.address.clone(),
            risk_level: RiskLevel::from_probability(probability),
            probability,
            error_type,
            description: error_type.describe(&cell.address),
            prevention_tips: error_type.tips().iter().map(|t| t.to_string()).collect(),
            related_cells: cell.dependencies.iter().take(MAX_RELATED_CELLS).cloned().collect(),
        })
    }

    fn circular_risk(&self, workbook: &WorkbookContext, cell: &CellInfo, _formula: &str) -> f64 {
        match find_cycle(workbook, &cell.sheet, &cell.address, self.max_cycle_depth) {
            CycleSearch::Found(path) => {
                let hops = path.len().saturating_sub(1) as i32;
                (0.9 * 0.8f64.powi(hops)).min(0.9)
            }
            CycleSearch::DepthExceeded => 0.1,
            CycleSearch::Clear => 0.0,
        }
    }

    fn div_zero_risk(&self, workbook: &WorkbookContext, cell: &CellInfo, formula: &str) -> f64 {
        let cleaned = strip_string_literals(formula);
        let mut risk: f64 = 0.0;
        for caps in divisor_re().captures_iter(&cleaned) {
            let divisor = &caps["divisor"];
            if divisor.ends_with(')') {
                let upper = divisor.to_ascii_uppercase();
                if upper.contains("SUM") || upper.contains("AVERAGE") {
                    risk = risk.max(0.3);
                }
                continue;
            }
            let Some(target) = QualifiedRef::parse(divisor, &cell.sheet) else {
                continue;
            };
            // A divisor cell that does not exist carries no risk.
            let Some(divisor_cell) = workbook.get_cell(&target.sheet, &target.cell.to_string()) else {
                continue;
            };
            risk = risk.max(match &divisor_cell.value {
                Some(v) if v.is_zero() => 0.9,
                Some(v) if v.is_blank() => 0.7,
                Some(_) => 0.0,
                None => 0.6,
            });
        }
        risk
    }

    fn ref_risk(&self, workbook: &WorkbookContext, cell: &CellInfo, formula: &str) -> f64 {
        let mut risk: f64 = 0.0;

        for reference in extract_references(formula) {
            let sheet = reference.sheet().unwrap_or(&cell.sheet);
            if workbook.get_sheet(sheet).is_none() {
                risk = risk.max(0.8);
            }
        }

        // Ranges are already expanded into `dependencies`.
        for dep in &cell.dependencies {
            let (sheet, address) = split_qualified(dep);
            let sheet = sheet.unwrap_or(&cell.sheet);
            if workbook.get_sheet(sheet).is_none() {
                continue;
            }
            match workbook.get_cell(sheet, address) {
                None => risk = risk.max(0.7),
                Some(target) if target.value.as_ref().is_some_and(|v| v.is_error_token()) => {
                    risk = risk.max(0.8)
                }
                Some(target) if !target.errors.is_empty() => risk = risk.max(0.6),
                Some(_) => {}
            }
        }
        risk
    }

    fn type_mismatch_risk(&self, workbook: &WorkbookContext, cell: &CellInfo, formula: &str) -> f64 {
        let numeric = function_calls(formula)
            .iter()
            .any(|f| NUMERIC_FUNCTIONS.contains(&f.as_str()));
        if !numeric {
            return 0.0;
        }
        let has_text = cell.dependencies.iter().any(|dep| {
            let (sheet, address) = split_qualified(dep);
            workbook
                .get_cell(sheet.unwrap_or(&cell.sheet), address)
                .and_then(|c| c.value.as_ref())
                .and_then(|v| v.as_text())
                .is_some_and(|s| s.trim().parse::<f64>().is_err())
        });
        if has_text { 0.7 } else { 0.0 }
    }

    fn missing_dependency_risk(&self, workbook: &WorkbookContext, cell: &CellInfo, formula: &str) -> f64 {
        let mut risk: f64 = 0.0;
        for reference in extract_references(formula) {
            if !matches!(reference, FormulaRef::Range { .. }) {
                continue;
            }
            let sheet = reference.sheet().unwrap_or(&cell.sheet);
            let corners = reference.corners();
            let empty = corners
                .iter()
                .filter(|pos| {
                    workbook
                        .get_cell(sheet, &pos.to_string())
                        .is_none_or(CellInfo::is_empty)
                })
                .count();
            if !corners.is_empty() && empty as f64 / corners.len() as f64 > 0.5 {
                risk = risk.max(0.5);
            }
        }
        risk
    }

    fn remember(&mut self, file_id: &str, predictions: Vec<ErrorPrediction>) {
        if self.config.cache_entries == 0 {
            return;
        }
        let key = format!("{}_{}", file_id, Utc::now().to_rfc3339());
        self.cache.retain(|entry| entry.key != key);
        self.cache.push_back(CacheEntry {
            key,
            file_id: file_id.to_string(),
            predictions,
        });
        while self.cache.len() > self.config.cache_entries {
            self.cache.pop_front();
        }
    }

    /// Most recent predictions made for `file_id`.
    pub fn cached_predictions(&self, file_id: &str) -> Option<&[ErrorPrediction]> {
        self.cache
            .iter()
            .rev()
            .find(|entry| entry.file_id == file_id)
            .map(|entry| entry.predictions.as_slice())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn prediction_summary(&self, file_id: &str) -> PredictionSummary {
        let Some(predictions) = self.cached_predictions(file_id).filter(|p| !p.is_empty()) else {
            return PredictionSummary::default();
        };
        PredictionSummary {
            has_predictions: true,
            total_risks: predictions.len(),
            high_risks: predictions.iter().filter(|p| p.risk_level == RiskLevel::High).count(),
            predictions: predictions
                .iter()
                .take(SUMMARY_ENTRIES)
                .map(|p| PredictionDigest {
                    cell: p.key(),
                    error_type: p.error_type,
                    risk_level: p.risk_level,
                    probability: (p.probability * 1000.0).round() / 10.0,
                    description: p.description.clone(),
                    tips: p.prevention_tips.iter().take(SUMMARY_TIPS).cloned().collect(),
                })
                .collect(),
        }
    }
}

/// Direct dependents of every changed cell, as (sheet, address) pairs.
fn affected_cells<S: AsRef<str>>(workbook: &WorkbookContext, changed_cells: &[S]) -> BTreeSet<(String, String)> {
    let mut affected = BTreeSet::new();
    for changed in changed_cells {
        let (sheet, address) = split_qualified(changed.as_ref());
        let sheet = sheet.unwrap_or(DEFAULT_SHEET);
        for dependent in workbook.get_dependent_cells(sheet, address) {
            let (dep_sheet, dep_address) = split_qualified(&dependent);
            affected.insert((dep_sheet.unwrap_or(sheet).to_string(), dep_address.to_string()));
        }
    }
    affected
}
