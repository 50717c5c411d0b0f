//! Data-quality detection: duplicates, gaps, type drift and outliers per column.
//!
//! The first row of each sheet is treated as the header row and is excluded
//! from every check except the missing-data header test.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use excelint_engine::model::{
    CellInfo, CellRef, CellValue, DataQualityIssue, ErrorKind, Finding, Location, Severity, SheetContext,
    WorkbookContext, format_number,
};
use regex::Regex;
use serde::Serialize;

use super::ErrorDetector;
use crate::config::DetectionConfig;
use crate::error::Result;

/// Tokens too common to be meaningful duplicates.
const TRIVIAL_TOKENS: &[&str] = &["yes", "no", "true", "false", "y", "n", "t", "f"];

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Number,
    Date,
    Email,
    Phone,
    Percentage,
    Currency,
    Text,
}

impl DataType {
    pub fn label(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Percentage => "percentage",
            DataType::Currency => "currency",
            DataType::Text => "text",
        }
    }
}

struct Patterns {
    email: Regex,
    phone: Regex,
    date: Regex,
    number: Regex,
    percentage: Regex,
    currency: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        email: Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email regex must compile"),
        phone: Regex::new(r"^\+?[\d\s\-()]{7,}$").expect("phone regex must compile"),
        date: Regex::new(r"^\d{4}[-/]\d{2}[-/]\d{2}$").expect("date regex must compile"),
        number: Regex::new(r"^-?\d+\.?\d*$").expect("number regex must compile"),
        percentage: Regex::new(r"^-?\d+\.?\d*%$").expect("percentage regex must compile"),
        currency: Regex::new(r"^[$₩€£¥]\s*-?\d+\.?\d*$").expect("currency regex must compile"),
    })
}

/// Classify a cell value. Text is matched against email, date, phone, number,
/// percentage and currency shapes in that order. A phone needs a separator,
/// so plain digit strings stay numbers.
pub fn classify_value(value: &CellValue) -> DataType {
    match value {
        CellValue::Bool(_) => DataType::Boolean,
        CellValue::Number(_) => DataType::Number,
        CellValue::Text(s) => {
            let s = s.trim();
            let p = patterns();
            if p.email.is_match(s) {
                DataType::Email
            } else if p.date.is_match(s) {
                DataType::Date
            } else if p.phone.is_match(s) && s.chars().any(|c| !c.is_ascii_digit()) {
                DataType::Phone
            } else if p.number.is_match(s) {
                DataType::Number
            } else if p.percentage.is_match(s) {
                DataType::Percentage
            } else if p.currency.is_match(s) {
                DataType::Currency
            } else {
                DataType::Text
            }
        }
    }
}

/// Quartiles using the "exclusive" (n+1) interpolation method.
/// Returns None for fewer than two samples.
pub fn exclusive_quartiles(values: &[f64]) -> Option<(f64, f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mut data = values.to_vec();
    data.sort_by(|a, b| a.total_cmp(b));

    let m = n + 1;
    let quartile = |i: usize| {
        let j = (i * m / 4).clamp(1, n - 1);
        let delta = (i * m) as f64 - (j * 4) as f64;
        (data[j - 1] * (4.0 - delta) + data[j] * delta) / 4.0
    };
    Some((quartile(1), quartile(2), quartile(3)))
}

/// Number written as text with grouping, currency or stray spaces, e.g. `"1,200"` or `"$ 35"`.
pub(crate) fn numeric_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches(['$', '₩', '€', '£', '¥'])
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub struct DataQualityDetector {
    config: DetectionConfig,
}

impl Default for DataQualityDetector {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

impl DataQualityDetector {
    pub fn from_config(config: &DetectionConfig) -> Self {
        DataQualityDetector {
            config: config.clone(),
        }
    }

    fn detect_sheet(&self, sheet: &SheetContext) -> Vec<Finding> {
        let columns = data_columns(sheet);
        let mut findings = Vec::new();
        findings.extend(self.duplicates(sheet, &columns));
        findings.extend(self.missing_data(sheet));
        findings.extend(self.type_mismatches(sheet, &columns));
        findings.extend(self.outliers(sheet, &columns));
        findings
    }

    fn duplicates(&self, sheet: &SheetContext, columns: &BTreeMap<usize, Vec<&CellInfo>>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for cells in columns.values() {
            let mut first_seen: HashMap<String, &CellInfo> = HashMap::new();
            for &cell in cells {
                let Some(value) = cell.visible_value() else {
                    continue;
                };
                let text = value.to_string();
                if text.chars().count() <= 2 || TRIVIAL_TOKENS.contains(&text.to_lowercase().as_str()) {
                    continue;
                }
                match first_seen.get(&text) {
                    Some(first) => findings.push(
                        Finding::new(
                            ErrorKind::DataQuality(DataQualityIssue::Duplicate),
                            Location::cell(&sheet.name, &cell.address),
                            Severity::Low,
                            format!("Duplicate value '{}' also appears in {}", text, first.address),
                        )
                        .with_value(text)
                        .with_suggestion("Check whether the duplicate is intended")
                        .with_confidence(0.7)
                        .potential_issue(),
                    ),
                    None => {
                        first_seen.insert(text, cell);
                    }
                }
            }
        }
        findings
    }

    fn missing_data(&self, sheet: &SheetContext) -> Vec<Finding> {
        let row_count = sheet.row_count();
        if row_count < 2 {
            return Vec::new();
        }
        let mut findings = Vec::new();

        for col in 0..sheet.column_count() {
            let Some(header) = sheet.value_at(0, col) else {
                continue;
            };
            let empties: Vec<bool> = (1..row_count).map(|row| sheet.value_at(row, col).is_none()).collect();
            let filled = empties.iter().filter(|e| !**e).count();
            let fill_rate = filled as f64 / empties.len() as f64;
            if fill_rate <= self.config.fill_rate_threshold {
                continue;
            }

            for (i, empty) in empties.iter().enumerate() {
                if !empty {
                    continue;
                }
                let lo = i.saturating_sub(2);
                let hi = (i + 3).min(empties.len());
                let nearby_empty = empties[lo..hi].iter().filter(|e| **e).count();
                if nearby_empty >= 3 {
                    continue;
                }
                let address = CellRef::new(col, i + 1).to_string();
                findings.push(
                    Finding::new(
                        ErrorKind::DataQuality(DataQualityIssue::MissingData),
                        Location::cell(&sheet.name, address),
                        Severity::Low,
                        format!("Missing value in column '{}'", header),
                    )
                    .with_suggestion("Fill in the missing value if it is required")
                    .with_confidence(0.6)
                    .potential_issue(),
                );
            }
        }
        findings
    }

    fn type_mismatches(&self, sheet: &SheetContext, columns: &BTreeMap<usize, Vec<&CellInfo>>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for cells in columns.values() {
            let typed: Vec<(&CellInfo, DataType)> = cells
                .iter()
                .filter_map(|c| c.visible_value().map(|v| (*c, classify_value(v))))
                .collect();
            if typed.is_empty() {
                continue;
            }
            let mut counts: BTreeMap<DataType, usize> = BTreeMap::new();
            for (_, t) in &typed {
                *counts.entry(*t).or_default() += 1;
            }
            let Some((&expected, &count)) = counts.iter().max_by_key(|(_, n)| **n) else {
                continue;
            };
            if (count as f64) / (typed.len() as f64) < self.config.dominant_type_ratio {
                continue;
            }

            for (cell, actual) in typed {
                if actual == expected {
                    continue;
                }
                let mut finding = Finding::new(
                    ErrorKind::DataQuality(DataQualityIssue::TypeMismatch),
                    Location::cell(&sheet.name, &cell.address),
                    Severity::Medium,
                    format!("Type mismatch: expected {}, found {}", expected.label(), actual.label()),
                )
                .with_confidence(0.85);
                if let Some(v) = cell.visible_value() {
                    finding = finding.with_value(v.to_string());
                }
                let suggestion = format!("Convert the value to {}", expected.label());
                let convertible = cell
                    .visible_value()
                    .and_then(CellValue::as_text)
                    .and_then(numeric_text)
                    .is_some();
                finding = if actual == DataType::Text && expected == DataType::Number && convertible {
                    finding.with_fix(Some(suggestion))
                } else {
                    finding.with_suggestion(suggestion)
                };
                findings.push(finding);
            }
        }
        findings
    }

    fn outliers(&self, sheet: &SheetContext, columns: &BTreeMap<usize, Vec<&CellInfo>>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for cells in columns.values() {
            let numbers: Vec<(&CellInfo, f64)> = cells
                .iter()
                .filter_map(|c| match c.value {
                    Some(CellValue::Number(n)) => Some((*c, n)),
                    _ => None,
                })
                .collect();
            if numbers.len() < self.config.min_outlier_samples {
                continue;
            }
            let values: Vec<f64> = numbers.iter().map(|(_, n)| *n).collect();
            let Some((q1, _, q3)) = exclusive_quartiles(&values) else {
                continue;
            };
            let iqr = q3 - q1;
            let lower = q1 - self.config.outlier_iqr_multiplier * iqr;
            let upper = q3 + self.config.outlier_iqr_multiplier * iqr;

            for (cell, n) in numbers {
                if n >= lower && n <= upper {
                    continue;
                }
                findings.push(
                    Finding::new(
                        ErrorKind::DataQuality(DataQualityIssue::Outlier),
                        Location::cell(&sheet.name, &cell.address),
                        Severity::Low,
                        format!(
                            "Outlier: {} is outside the expected range ({:.2} to {:.2})",
                            format_number(n),
                            lower,
                            upper
                        ),
                    )
                    .with_value(format_number(n))
                    .with_suggestion("Confirm the value is correct")
                    .with_confidence(0.7)
                    .potential_issue(),
                );
            }
        }
        findings
    }
}

impl ErrorDetector for DataQualityDetector {
    fn name(&self) -> &'static str {
        "data_quality"
    }

    fn detect(&self, workbook: &WorkbookContext) -> Result<Vec<Finding>> {
        Ok(workbook
            .sheets
            .values()
            .flat_map(|sheet| self.detect_sheet(sheet))
            .collect())
    }

    fn can_detect(&self, kind: &ErrorKind) -> bool {
        matches!(kind, ErrorKind::DataQuality(_))
    }
}

/// Non-header, non-formula cells grouped by column, each column top to bottom.
fn data_columns(sheet: &SheetContext) -> BTreeMap<usize, Vec<&CellInfo>> {
    let mut columns: BTreeMap<usize, Vec<&CellInfo>> = BTreeMap::new();
    for cell in sheet.cells_row_major() {
        if cell.position.row == 0 || cell.formula.is_some() {
            continue;
        }
        columns.entry(cell.position.col).or_default().push(cell);
    }
    columns
}
