//! Detection findings: the error records produced by detectors.
//!
//! The taxonomy is closed. Each family has its own subtype enum so fix
//! strategies route on a structural match rather than on message text.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Whether a finding is a hard error or something worth a second look.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    CriticalError,
    PotentialIssue,
}

/// Native spreadsheet error codes plus formula-level problems.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaErrorCode {
    DivZero,
    NotAvailable,
    Name,
    Null,
    Num,
    Ref,
    Value,
    Spill,
    Calc,
    CircularReference,
    BrokenFormula,
    EmptyRange,
}

impl FormulaErrorCode {
    /// The error codes a cell can display as its value.
    pub const VALUE_TOKENS: [(&'static str, FormulaErrorCode); 9] = [
        ("#DIV/0!", FormulaErrorCode::DivZero),
        ("#N/A", FormulaErrorCode::NotAvailable),
        ("#NAME?", FormulaErrorCode::Name),
        ("#NULL!", FormulaErrorCode::Null),
        ("#NUM!", FormulaErrorCode::Num),
        ("#REF!", FormulaErrorCode::Ref),
        ("#VALUE!", FormulaErrorCode::Value),
        ("#SPILL!", FormulaErrorCode::Spill),
        ("#CALC!", FormulaErrorCode::Calc),
    ];

    /// Map a displayed value such as `#DIV/0!` to its code.
    pub fn from_token(token: &str) -> Option<FormulaErrorCode> {
        let token = token.trim();
        Self::VALUE_TOKENS
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, code)| *code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FormulaErrorCode::DivZero => "#DIV/0!",
            FormulaErrorCode::NotAvailable => "#N/A",
            FormulaErrorCode::Name => "#NAME?",
            FormulaErrorCode::Null => "#NULL!",
            FormulaErrorCode::Num => "#NUM!",
            FormulaErrorCode::Ref => "#REF!",
            FormulaErrorCode::Value => "#VALUE!",
            FormulaErrorCode::Spill => "#SPILL!",
            FormulaErrorCode::Calc => "#CALC!",
            FormulaErrorCode::CircularReference => "Circular Reference",
            FormulaErrorCode::BrokenFormula => "Broken Formula",
            FormulaErrorCode::EmptyRange => "Empty Range",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            FormulaErrorCode::DivZero => "div_zero",
            FormulaErrorCode::NotAvailable => "na",
            FormulaErrorCode::Name => "name",
            FormulaErrorCode::Null => "null",
            FormulaErrorCode::Num => "num",
            FormulaErrorCode::Ref => "ref",
            FormulaErrorCode::Value => "value",
            FormulaErrorCode::Spill => "spill",
            FormulaErrorCode::Calc => "calc",
            FormulaErrorCode::CircularReference => "circular_reference",
            FormulaErrorCode::BrokenFormula => "broken_formula",
            FormulaErrorCode::EmptyRange => "empty_range",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralIssue {
    MergedCells,
    EmptyRows,
    EmptyColumns,
    EmptyHeader,
    DuplicateHeader,
    HiddenRows,
    HiddenColumns,
    InconsistentFormat,
}

impl StructuralIssue {
    pub fn label(&self) -> &'static str {
        match self {
            StructuralIssue::MergedCells => "Merged Cells",
            StructuralIssue::EmptyRows => "Empty Rows",
            StructuralIssue::EmptyColumns => "Empty Columns",
            StructuralIssue::EmptyHeader => "Empty Header",
            StructuralIssue::DuplicateHeader => "Duplicate Header",
            StructuralIssue::HiddenRows => "Hidden Rows",
            StructuralIssue::HiddenColumns => "Hidden Columns",
            StructuralIssue::InconsistentFormat => "Inconsistent Format",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            StructuralIssue::MergedCells => "merged_cells",
            StructuralIssue::EmptyRows => "empty_rows",
            StructuralIssue::EmptyColumns => "empty_columns",
            StructuralIssue::EmptyHeader => "empty_header",
            StructuralIssue::DuplicateHeader => "duplicate_header",
            StructuralIssue::HiddenRows => "hidden_rows",
            StructuralIssue::HiddenColumns => "hidden_columns",
            StructuralIssue::InconsistentFormat => "inconsistent_format",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityIssue {
    Duplicate,
    MissingData,
    TypeMismatch,
    Outlier,
}

impl DataQualityIssue {
    pub fn label(&self) -> &'static str {
        match self {
            DataQualityIssue::Duplicate => "Duplicate",
            DataQualityIssue::MissingData => "Missing Data",
            DataQualityIssue::TypeMismatch => "Type Mismatch",
            DataQualityIssue::Outlier => "Outlier",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            DataQualityIssue::Duplicate => "duplicate",
            DataQualityIssue::MissingData => "missing_data",
            DataQualityIssue::TypeMismatch => "type_mismatch",
            DataQualityIssue::Outlier => "outlier",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VbaIssue {
    MissingOptionExplicit,
    MissingErrorHandling,
    UndeclaredVariable,
    InfiniteLoop,
    HardcodedPath,
    DangerousApi,
    SqlInjection,
    UnbalancedWith,
    UnbalancedIf,
    UnusedVariable,
    SelectActivate,
    UnreleasedObject,
    DeprecatedFunction,
}

/// Broad grouping used when reporting VBA issues.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VbaCategory {
    Syntax,
    Logic,
    Security,
    Performance,
    BestPractice,
}

impl VbaCategory {
    pub fn label(&self) -> &'static str {
        match self {
            VbaCategory::Syntax => "VBA Syntax Error",
            VbaCategory::Logic => "Logic Error",
            VbaCategory::Security => "Security Risk",
            VbaCategory::Performance => "Performance Issue",
            VbaCategory::BestPractice => "Best Practice Violation",
        }
    }
}

impl VbaIssue {
    pub fn category(&self) -> VbaCategory {
        match self {
            VbaIssue::UnbalancedWith | VbaIssue::UnbalancedIf => VbaCategory::Syntax,
            VbaIssue::MissingErrorHandling | VbaIssue::InfiniteLoop => VbaCategory::Logic,
            VbaIssue::DangerousApi | VbaIssue::SqlInjection | VbaIssue::HardcodedPath => {
                VbaCategory::Security
            }
            VbaIssue::SelectActivate | VbaIssue::UnreleasedObject => VbaCategory::Performance,
            VbaIssue::MissingOptionExplicit
            | VbaIssue::UndeclaredVariable
            | VbaIssue::UnusedVariable
            | VbaIssue::DeprecatedFunction => VbaCategory::BestPractice,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VbaIssue::MissingOptionExplicit => "Missing Option Explicit",
            VbaIssue::MissingErrorHandling => "Missing Error Handling",
            VbaIssue::UndeclaredVariable => "Undeclared Variable",
            VbaIssue::InfiniteLoop => "Infinite Loop",
            VbaIssue::HardcodedPath => "Hardcoded Path",
            VbaIssue::DangerousApi => "Dangerous API",
            VbaIssue::SqlInjection => "SQL Injection",
            VbaIssue::UnbalancedWith => "Unbalanced With Block",
            VbaIssue::UnbalancedIf => "Unbalanced If Block",
            VbaIssue::UnusedVariable => "Unused Variable",
            VbaIssue::SelectActivate => "Select/Activate Pattern",
            VbaIssue::UnreleasedObject => "Unreleased Object",
            VbaIssue::DeprecatedFunction => "Deprecated Function",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            VbaIssue::MissingOptionExplicit => "missing_option_explicit",
            VbaIssue::MissingErrorHandling => "missing_error_handling",
            VbaIssue::UndeclaredVariable => "undeclared_variable",
            VbaIssue::InfiniteLoop => "infinite_loop",
            VbaIssue::HardcodedPath => "hardcoded_path",
            VbaIssue::DangerousApi => "dangerous_api",
            VbaIssue::SqlInjection => "sql_injection",
            VbaIssue::UnbalancedWith => "unbalanced_with",
            VbaIssue::UnbalancedIf => "unbalanced_if",
            VbaIssue::UnusedVariable => "unused_variable",
            VbaIssue::SelectActivate => "select_activate",
            VbaIssue::UnreleasedObject => "unreleased_object",
            VbaIssue::DeprecatedFunction => "deprecated_function",
        }
    }
}

/// Error family plus subtype.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "family", content = "subtype", rename_all = "snake_case")]
pub enum ErrorKind {
    Formula(FormulaErrorCode),
    Structural(StructuralIssue),
    DataQuality(DataQualityIssue),
    Vba(VbaIssue),
}

impl ErrorKind {
    /// Human-readable type name used in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Formula(code) => code.label(),
            ErrorKind::Structural(issue) => issue.label(),
            ErrorKind::DataQuality(issue) => issue.label(),
            ErrorKind::Vba(issue) => issue.label(),
        }
    }

    /// Stable identifier, also accepted by [`ErrorKind::from_slug`].
    pub fn slug(&self) -> &'static str {
        match self {
            ErrorKind::Formula(code) => code.slug(),
            ErrorKind::Structural(issue) => issue.slug(),
            ErrorKind::DataQuality(issue) => issue.slug(),
            ErrorKind::Vba(issue) => issue.slug(),
        }
    }

    pub fn all() -> Vec<ErrorKind> {
        use DataQualityIssue as D;
        use FormulaErrorCode as F;
        use StructuralIssue as S;
        use VbaIssue as V;

        let mut kinds: Vec<ErrorKind> = [
            F::DivZero,
            F::NotAvailable,
            F::Name,
            F::Null,
            F::Num,
            F::Ref,
            F::Value,
            F::Spill,
            F::Calc,
            F::CircularReference,
            F::BrokenFormula,
            F::EmptyRange,
        ]
        .into_iter()
        .map(ErrorKind::Formula)
        .collect();
        kinds.extend(
            [
                S::MergedCells,
                S::EmptyRows,
                S::EmptyColumns,
                S::EmptyHeader,
                S::DuplicateHeader,
                S::HiddenRows,
                S::HiddenColumns,
                S::InconsistentFormat,
            ]
            .into_iter()
            .map(ErrorKind::Structural),
        );
        kinds.extend(
            [D::Duplicate, D::MissingData, D::TypeMismatch, D::Outlier]
                .into_iter()
                .map(ErrorKind::DataQuality),
        );
        kinds.extend(
            [
                V::MissingOptionExplicit,
                V::MissingErrorHandling,
                V::UndeclaredVariable,
                V::InfiniteLoop,
                V::HardcodedPath,
                V::DangerousApi,
                V::SqlInjection,
                V::UnbalancedWith,
                V::UnbalancedIf,
                V::UnusedVariable,
                V::SelectActivate,
                V::UnreleasedObject,
                V::DeprecatedFunction,
            ]
            .into_iter()
            .map(ErrorKind::Vba),
        );
        kinds
    }

    pub fn from_slug(slug: &str) -> Option<ErrorKind> {
        let slug = slug.trim().to_ascii_lowercase();
        Self::all().into_iter().find(|k| k.slug() == slug)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a finding applies.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Location {
    Cell { sheet: String, address: String },
    /// A block of cells such as a run of empty rows, "A5:A9".
    Range { sheet: String, range: String },
    Vba { module: String, line: usize },
    Workbook,
}

impl Location {
    pub fn cell(sheet: impl Into<String>, address: impl Into<String>) -> Self {
        Location::Cell {
            sheet: sheet.into(),
            address: address.into(),
        }
    }

    pub fn range(sheet: impl Into<String>, range: impl Into<String>) -> Self {
        Location::Range {
            sheet: sheet.into(),
            range: range.into(),
        }
    }

    pub fn sheet(&self) -> Option<&str> {
        match self {
            Location::Cell { sheet, .. } | Location::Range { sheet, .. } => Some(sheet),
            _ => None,
        }
    }

    pub fn vba(module: impl Into<String>, line: usize) -> Self {
        Location::Vba {
            module: module.into(),
            line,
        }
    }

    fn id_prefix(&self) -> String {
        match self {
            Location::Cell { sheet, address } => format!("{}_{}", sheet, address),
            Location::Range { sheet, range } => format!("{}_{}", sheet, range.replace(':', "_")),
            Location::Vba { module, line } => format!("{}_{}", module, line),
            Location::Workbook => "workbook".to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Cell { sheet, address } => write!(f, "{}!{}", sheet, address),
            Location::Range { sheet, range } => write!(f, "{}!{}", sheet, range),
            Location::Vba { module, line } => write!(f, "{}:{}", module, line),
            Location::Workbook => f.write_str("workbook"),
        }
    }
}

/// One detected problem. Immutable once produced; fixes yield separate results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub kind: ErrorKind,
    pub location: Location,
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: String,
    /// Formula text for cells, the offending source line for VBA.
    pub source: Option<String>,
    pub value: Option<String>,
    pub is_auto_fixable: bool,
    pub suggested_fix: Option<String>,
    pub confidence: f64,
}

impl Finding {
    pub fn new(
        kind: ErrorKind,
        location: Location,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let id = format!("{}_{}", location.id_prefix(), kind.slug());
        Finding {
            id,
            kind,
            location,
            severity,
            category: FindingCategory::CriticalError,
            message: message.into(),
            source: None,
            value: None,
            is_auto_fixable: false,
            suggested_fix: None,
            confidence: 1.0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_fix(mut self, suggested_fix: Option<String>) -> Self {
        self.is_auto_fixable = true;
        self.suggested_fix = suggested_fix;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_fix = Some(suggestion.into());
        self
    }

    pub fn potential_issue(mut self) -> Self {
        self.category = FindingCategory::PotentialIssue;
        self
    }

    /// (sheet, address) when the finding is tied to a cell.
    pub fn cell(&self) -> Option<(&str, &str)> {
        match &self.location {
            Location::Cell { sheet, address } => Some((sheet, address)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_mapping() {
        assert_eq!(FormulaErrorCode::from_token(" #DIV/0! "), Some(FormulaErrorCode::DivZero));
        assert_eq!(FormulaErrorCode::from_token("#N/A"), Some(FormulaErrorCode::NotAvailable));
        assert_eq!(FormulaErrorCode::from_token("#OOPS"), None);
    }

    #[test]
    fn test_id_format() {
        let f = Finding::new(
            ErrorKind::Formula(FormulaErrorCode::DivZero),
            Location::cell("Sheet1", "C1"),
            Severity::High,
            "division by zero",
        );
        assert_eq!(f.id, "Sheet1_C1_div_zero");
        assert_eq!(f.cell(), Some(("Sheet1", "C1")));
    }

    #[test]
    fn test_slug_lookup_covers_every_kind() {
        for kind in ErrorKind::all() {
            assert_eq!(ErrorKind::from_slug(kind.slug()), Some(kind));
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_kind_serializes_with_family_tag() {
        let json = serde_json::to_string(&ErrorKind::Vba(VbaIssue::DangerousApi)).unwrap();
        assert_eq!(json, r#"{"family":"vba","subtype":"dangerous_api"}"#);
    }
}
