//! Work patterns mined from a user's recent actions.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use excelint_engine::model::{QualifiedRef, WorkbookContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::formula_text::body;

const MAX_ACTIONS: usize = 1000;
const KEEP_ACTIONS: usize = 500;
const DEFAULT_SHEET: &str = "Sheet1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CellEdit,
    ValueChange,
    FormulaEdit,
    ErrorCorrection,
    ErrorDetected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    pub timestamp: DateTime<Utc>,
    pub action_type: ActionType,
    /// Cell address, optionally sheet qualified.
    pub target: String,
    #[serde(default)]
    pub formula: Option<String>,
}

impl UserAction {
    pub fn new(action_type: ActionType, target: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        UserAction {
            timestamp,
            action_type,
            target: target.into(),
            formula: None,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    fn cell(&self) -> Option<QualifiedRef> {
        QualifiedRef::parse(&self.target, DEFAULT_SHEET)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Sequential,
    FormulaCopy,
    DataValidation,
    Calculation,
    ErrorLoop,
}

impl PatternType {
    fn min_actions(&self) -> usize {
        match self {
            PatternType::Sequential | PatternType::Calculation => 3,
            PatternType::FormulaCopy | PatternType::DataValidation | PatternType::ErrorLoop => 2,
        }
    }

    fn window(&self) -> Duration {
        match self {
            PatternType::Sequential | PatternType::Calculation => Duration::seconds(300),
            PatternType::FormulaCopy => Duration::seconds(120),
            PatternType::DataValidation => Duration::seconds(600),
            PatternType::ErrorLoop => Duration::seconds(180),
        }
    }

    fn confidence(&self) -> f64 {
        match self {
            PatternType::Sequential | PatternType::ErrorLoop => 0.85,
            PatternType::FormulaCopy => 0.90,
            PatternType::DataValidation => 0.75,
            PatternType::Calculation => 0.80,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            PatternType::Sequential => "Editing cells one after another along a row or column",
            PatternType::FormulaCopy => "Typing the same formula shape repeatedly",
            PatternType::DataValidation => "Repeatedly correcting entered values",
            PatternType::Calculation => "Building a chain of dependent calculations",
            PatternType::ErrorLoop => "Fixing the same error again and again",
        }
    }

    fn suggestions(&self) -> Vec<&'static str> {
        match self {
            PatternType::Sequential => vec![
                "Use AutoFill to extend the series",
                "Ctrl+D fills down and Ctrl+R fills right",
            ],
            PatternType::FormulaCopy => vec![
                "Enter one array formula over the whole range",
                "Use $ anchors so the formula can be copied as is",
            ],
            PatternType::DataValidation => vec![
                "Add data validation to the input cells",
                "Offer a drop-down list of allowed values",
            ],
            PatternType::Calculation => vec![
                "Keep intermediate results in labelled helper cells",
                "Name the steps of the calculation",
            ],
            PatternType::ErrorLoop => vec![
                "Check the referenced ranges and data types",
                "Run the automatic fixer on the affected cells",
            ],
        }
    }
}

const PATTERN_ORDER: [PatternType; 5] = [
    PatternType::Sequential,
    PatternType::FormulaCopy,
    PatternType::DataValidation,
    PatternType::Calculation,
    PatternType::ErrorLoop,
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkPattern {
    pub pattern_type: PatternType,
    pub confidence: f64,
    pub description: &'static str,
    pub frequency: usize,
    pub last_seen: DateTime<Utc>,
    pub suggestions: Vec<&'static str>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PatternInsights {
    pub has_insights: bool,
    pub patterns: Vec<WorkPattern>,
}

/// Per-session action log and the patterns last found in it.
#[derive(Debug, Default)]
pub struct PatternAnalyzer {
    actions: HashMap<String, Vec<UserAction>>,
    detected: HashMap<String, Vec<WorkPattern>>,
}

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to a session's log, keeping the most recent actions once it grows large.
    pub fn record_action(&mut self, session_id: &str, action: UserAction) {
        let log = self.actions.entry(session_id.to_string()).or_default();
        log.push(action);
        if log.len() > MAX_ACTIONS {
            log.drain(..log.len() - KEEP_ACTIONS);
        }
    }

    pub fn actions(&self, session_id: &str) -> &[UserAction] {
        self.actions.get(session_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn analyze(&mut self, session_id: &str, workbook: &WorkbookContext) -> Vec<WorkPattern> {
        self.analyze_at(session_id, workbook, Utc::now())
    }

    /// Detect patterns as of `now`. Each pattern only sees actions inside its window.
    pub fn analyze_at(&mut self, session_id: &str, workbook: &WorkbookContext, now: DateTime<Utc>) -> Vec<WorkPattern> {
        let actions = self.actions(session_id);
        if actions.len() < 2 {
            return Vec::new();
        }

        let mut found = Vec::new();
        for pattern in PATTERN_ORDER {
            let recent: Vec<&UserAction> = actions
                .iter()
                .filter(|a| now - a.timestamp <= pattern.window())
                .collect();
            if recent.len() < pattern.min_actions() {
                continue;
            }
            let frequency = match pattern {
                PatternType::Sequential => sequential_edits(&recent),
                PatternType::FormulaCopy => formula_copy(&recent),
                PatternType::DataValidation => validation_need(&recent),
                PatternType::Calculation => calculation_chain(&recent, workbook),
                PatternType::ErrorLoop => error_loop(&recent),
            };
            if let Some(frequency) = frequency {
                let last_seen = recent.iter().map(|a| a.timestamp).max().unwrap_or(now);
                found.push(WorkPattern {
                    pattern_type: pattern,
                    confidence: pattern.confidence(),
                    description: pattern.description(),
                    frequency,
                    last_seen,
                    suggestions: pattern.suggestions(),
                });
            }
        }

        debug!(session = session_id, patterns = found.len(), "pattern analysis finished");
        self.detected.insert(session_id.to_string(), found.clone());
        found
    }

    /// Up to five detected patterns, most confident first.
    pub fn insights(&self, session_id: &str) -> PatternInsights {
        let Some(patterns) = self.detected.get(session_id).filter(|p| !p.is_empty()) else {
            return PatternInsights::default();
        };
        let mut patterns = patterns.clone();
        patterns.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        patterns.truncate(5);
        PatternInsights {
            has_insights: true,
            patterns,
        }
    }

    pub fn clear(&mut self, session_id: &str) {
        self.actions.remove(session_id);
        self.detected.remove(session_id);
    }
}

/// Three or more edits stepping down one column or along one row.
fn sequential_edits(actions: &[&UserAction]) -> Option<usize> {
    let cells: Vec<QualifiedRef> = actions
        .iter()
        .filter(|a| matches!(a.action_type, ActionType::CellEdit | ActionType::ValueChange))
        .filter_map(|a| a.cell())
        .collect();
    if cells.len() < 3 {
        return None;
    }
    let same_sheet = cells.windows(2).all(|w| w[0].sheet == w[1].sheet);
    let down = cells
        .windows(2)
        .all(|w| w[0].cell.col == w[1].cell.col && w[0].cell.row + 1 == w[1].cell.row);
    let across = cells
        .windows(2)
        .all(|w| w[0].cell.row == w[1].cell.row && w[0].cell.col + 1 == w[1].cell.col);
    (same_sheet && (down || across)).then_some(cells.len())
}

/// Formula edits that are identical once references are masked.
fn formula_copy(actions: &[&UserAction]) -> Option<usize> {
    let shapes: Vec<String> = actions
        .iter()
        .filter(|a| a.action_type == ActionType::FormulaEdit)
        .filter_map(|a| a.formula.as_deref())
        .map(|f| mask_references(body(f)))
        .collect();
    if shapes.len() < 2 {
        return None;
    }
    shapes.iter().all(|s| *s == shapes[0]).then_some(shapes.len())
}

/// Replace each cell reference with `CELL`.
fn mask_references(formula: &str) -> String {
    let spans = excelint_engine::model::reference_spans(formula);
    let mut out = String::with_capacity(formula.len());
    let mut last = 0;
    for (span, _) in spans {
        out.push_str(&formula[last..span.start]);
        out.push_str("CELL");
        last = span.end;
    }
    out.push_str(&formula[last..]);
    out
}

/// The same cell changed three times, or at least two error corrections.
fn validation_need(actions: &[&UserAction]) -> Option<usize> {
    let mut edits: BTreeMap<String, usize> = BTreeMap::new();
    let mut corrections = 0;
    for action in actions {
        match action.action_type {
            ActionType::ValueChange => *edits.entry(action.target.clone()).or_insert(0) += 1,
            ActionType::ErrorCorrection => corrections += 1,
            _ => {}
        }
    }
    let most_edits = edits.values().copied().max().unwrap_or(0);
    if most_edits >= 3 || corrections >= 2 {
        Some(if edits.is_empty() { corrections } else { most_edits })
    } else {
        None
    }
}

/// Three or more formula edits where each edited cell reads the one before.
fn calculation_chain(actions: &[&UserAction], workbook: &WorkbookContext) -> Option<usize> {
    let cells: Vec<(String, &std::collections::BTreeSet<String>)> = actions
        .iter()
        .filter(|a| a.action_type == ActionType::FormulaEdit)
        .filter_map(|a| {
            let cell = a.cell()?;
            let info = workbook.get_cell(&cell.sheet, &cell.cell.to_string())?;
            (!info.dependencies.is_empty()).then(|| (info.key(), &info.dependencies))
        })
        .collect();
    if cells.len() < 3 {
        return None;
    }
    cells
        .windows(2)
        .all(|w| w[1].1.contains(&w[0].0))
        .then_some(cells.len())
}

/// Error actions that hit the same cell more than once.
fn error_loop(actions: &[&UserAction]) -> Option<usize> {
    let targets: Vec<&str> = actions
        .iter()
        .filter(|a| matches!(a.action_type, ActionType::ErrorCorrection | ActionType::ErrorDetected))
        .map(|a| a.target.as_str())
        .collect();
    if targets.len() < 2 {
        return None;
    }
    let distinct: HashSet<&str> = targets.iter().copied().collect();
    (distinct.len() < targets.len()).then_some(targets.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use excelint_engine::model::CellValue;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn kinds(patterns: &[WorkPattern]) -> Vec<PatternType> {
        patterns.iter().map(|p| p.pattern_type).collect()
    }

    #[test]
    fn test_sequential_edits_down_a_column() {
        let mut analyzer = PatternAnalyzer::new();
        for (i, cell) in ["A1", "A2", "A3"].iter().enumerate() {
            analyzer.record_action("s", UserAction::new(ActionType::CellEdit, *cell, at(i as i64)));
        }
        let wb = WorkbookContext::new("f", "book.json");
        let patterns = analyzer.analyze_at("s", &wb, at(10));
        assert_eq!(kinds(&patterns), vec![PatternType::Sequential]);
        assert_eq!(patterns[0].frequency, 3);
        assert_eq!(patterns[0].confidence, 0.85);
        assert_eq!(patterns[0].last_seen, at(2));
    }

    #[test]
    fn test_old_actions_fall_out_of_the_window() {
        let mut analyzer = PatternAnalyzer::new();
        for (i, cell) in ["A1", "A2", "A3"].iter().enumerate() {
            analyzer.record_action("s", UserAction::new(ActionType::CellEdit, *cell, at(i as i64)));
        }
        let wb = WorkbookContext::new("f", "book.json");
        assert!(analyzer.analyze_at("s", &wb, at(1000)).is_empty());
    }

    #[test]
    fn test_formula_copy_and_chain() {
        let mut wb = WorkbookContext::new("f", "book.json");
        let sheet = wb.sheet_mut("Sheet1");
        sheet.set_value("A1", CellValue::Number(1.0));
        sheet.set_formula("A2", "=A1+1");
        sheet.set_formula("A3", "=A2+1");
        sheet.set_formula("A4", "=A3+1");
        wb.rebuild_dependencies();

        let mut analyzer = PatternAnalyzer::new();
        for (i, (cell, formula)) in [("A2", "=A1+1"), ("A3", "=A2+1"), ("A4", "=A3+1")].iter().enumerate() {
            analyzer.record_action(
                "s",
                UserAction::new(ActionType::FormulaEdit, *cell, at(i as i64)).with_formula(*formula),
            );
        }
        let patterns = analyzer.analyze_at("s", &wb, at(30));
        assert_eq!(kinds(&patterns), vec![PatternType::FormulaCopy, PatternType::Calculation]);

        let insights = analyzer.insights("s");
        assert!(insights.has_insights);
        assert_eq!(insights.patterns[0].pattern_type, PatternType::FormulaCopy);
    }

    #[test]
    fn test_validation_need_and_error_loop() {
        let mut analyzer = PatternAnalyzer::new();
        for i in 0..3 {
            analyzer.record_action("s", UserAction::new(ActionType::ValueChange, "B2", at(i)));
        }
        analyzer.record_action("s", UserAction::new(ActionType::ErrorCorrection, "C1", at(3)));
        analyzer.record_action("s", UserAction::new(ActionType::ErrorDetected, "C1", at(4)));
        let wb = WorkbookContext::new("f", "book.json");
        let patterns = analyzer.analyze_at("s", &wb, at(5));
        assert_eq!(kinds(&patterns), vec![PatternType::DataValidation, PatternType::ErrorLoop]);
        assert_eq!(patterns[0].frequency, 3);
        assert_eq!(patterns[1].frequency, 2);
    }

    #[test]
    fn test_log_is_bounded_and_sessions_are_separate() {
        let mut analyzer = PatternAnalyzer::new();
        for i in 0..1001 {
            analyzer.record_action("s", UserAction::new(ActionType::CellEdit, "A1", at(i)));
        }
        assert_eq!(analyzer.actions("s").len(), KEEP_ACTIONS);
        assert_eq!(analyzer.actions("s")[0].timestamp, at(501));
        assert!(analyzer.actions("other").is_empty());
        analyzer.clear("s");
        assert!(analyzer.actions("s").is_empty());
        assert!(!analyzer.insights("s").has_insights);
    }
}
