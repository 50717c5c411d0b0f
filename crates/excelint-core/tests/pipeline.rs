//! End-to-end checks over the public API: load a file, detect, predict, fix, revalidate.

use std::path::{Path, PathBuf};

use excelint_core::predict::PredictedErrorType;
use excelint_core::storage::{self, WorkbookWriter};
use excelint_core::workflow::{backup_path, fix_file_with};
use excelint_core::{
    ErrorKind, ErrorPredictor, ExcelintError, FixMode, FixOptions, IntegratedErrorDetector,
    IntegratedErrorFixer, Severity, WorkbookContext, fix_file,
};
use excelint_engine::model::{DataQualityIssue, FormulaErrorCode};
use tempfile::TempDir;

const LEDGER: &str = r##"{
  "sheets": [
    {
      "name": "Sheet1",
      "cells": [
        {"address": "A1", "value": 10},
        {"address": "B1", "value": 0},
        {"address": "C1", "formula": "=A1/B1", "value": "#DIV/0!"},
        {"address": "D1", "formula": "=C1*2"},
        {"address": "E1", "formula": "=Rates!A1+A1"}
      ]
    },
    {
      "name": "Rates",
      "cells": [
        {"address": "A1", "value": 0.2},
        {"address": "B1", "formula": "=Sheet1!D1*A1"}
      ]
    }
  ]
}"##;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_dependency_graph_is_consistent_after_detection() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "ledger.json", LEDGER);
    let mut wb = storage::load_workbook(&path).unwrap();
    IntegratedErrorDetector::default().detect_all_errors(&mut wb);

    let mut edges = 0;
    for cell in wb.cells() {
        for dep in &cell.dependencies {
            let (sheet, address) = dep.split_once('!').unwrap();
            assert!(
                wb.get_dependent_cells(sheet, address).contains(&cell.key()),
                "{} missing from dependents of {}",
                cell.key(),
                dep
            );
            edges += 1;
        }
    }
    assert_eq!(edges, 7);
    assert_eq!(wb.get_dependent_cells("Sheet1", "D1"), vec!["Rates!B1"]);
}

#[test]
fn test_detection_twice_gives_the_same_findings() {
    let dir = TempDir::new().unwrap();
    let mut wb = storage::load_workbook(&write(&dir, "ledger.json", LEDGER)).unwrap();
    let detector = IntegratedErrorDetector::default();
    let first = detector.detect_all_errors(&mut wb);
    let second = detector.detect_all_errors(&mut wb);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.summary, second.summary);
    assert!(first.summary.has_errors);
}

#[test]
fn test_mutual_reference_is_circular() {
    let mut wb = WorkbookContext::new("loop", "loop.json");
    let sheet = wb.sheet_mut("Sheet1");
    sheet.set_formula("A1", "=B1+1");
    sheet.set_formula("B1", "=A1*2");
    let report = IntegratedErrorDetector::default().detect_all_errors(&mut wb);

    let circular: Vec<_> = report
        .errors
        .iter()
        .filter(|f| f.kind == ErrorKind::Formula(FormulaErrorCode::CircularReference))
        .collect();
    assert!(!circular.is_empty());
    assert!(circular.iter().all(|f| {
        matches!(f.severity, Severity::Critical | Severity::High) && f.confidence >= 0.8
    }));
}

#[test]
fn test_zero_divisor_change_predicts_div_zero() {
    let dir = TempDir::new().unwrap();
    let wb = storage::load_workbook(&write(&dir, "ledger.json", LEDGER)).unwrap();
    let mut predictor = ErrorPredictor::default();
    let predictions = predictor.predict_errors(&wb, &["Sheet1!B1"]);

    let c1 = predictions.iter().find(|p| p.key() == "Sheet1!C1").unwrap();
    assert_eq!(c1.error_type, PredictedErrorType::DivZero);
    assert!(c1.probability >= 0.7);
    assert_eq!(predictor.prediction_summary("ledger").total_risks, predictions.len());
}

#[test]
fn test_data_quality_scenarios() {
    let mut wb = WorkbookContext::new("people", "people.json");
    let sheet = wb.sheet_mut("Sheet1");
    sheet.set_value("A1", "Name".into());
    sheet.set_value("B1", "Amount".into());
    for (i, (name, amount)) in [
        ("Alpha", 10.0),
        ("Beta", 12.0),
        ("Alpha", 11.0),
        ("Gamma", 13.0),
        ("Delta", 9.0),
        ("Omega", 500.0),
    ]
    .into_iter()
    .enumerate()
    {
        sheet.set_value(&format!("A{}", i + 2), name.into());
        sheet.set_value(&format!("B{}", i + 2), amount.into());
    }
    let report = IntegratedErrorDetector::default().detect_all_errors(&mut wb);

    let located = |issue: DataQualityIssue| -> Vec<(String, String)> {
        report
            .errors
            .iter()
            .filter(|f| f.kind == ErrorKind::DataQuality(issue))
            .filter_map(|f| f.cell().map(|(s, a)| (s.to_string(), a.to_string())))
            .collect()
    };
    assert_eq!(located(DataQualityIssue::Duplicate), vec![("Sheet1".to_string(), "A4".to_string())]);
    assert_eq!(located(DataQualityIssue::Outlier), vec![("Sheet1".to_string(), "B7".to_string())]);
}

#[test]
fn test_safe_fix_never_applies_low_confidence() {
    let mut wb = WorkbookContext::new("mixed", "mixed.json");
    let sheet = wb.sheet_mut("Sheet1");
    sheet.set_value("A1", 1.0.into());
    sheet.set_value("B1", 0.0.into());
    sheet.set_formula("C1", "=A1/B1");
    sheet.set_value("C1", "#DIV/0!".into());
    sheet.set_formula("D1", "=#REF!+1");
    sheet.set_value("D1", "#REF!".into());
    let report = IntegratedErrorDetector::default().detect_all_errors(&mut wb);

    let mut fixer = IntegratedErrorFixer::default();
    let batch = fixer.fix_batch(&report.errors, &FixMode::Safe, Some(&wb));
    assert_eq!(batch.results.len(), report.errors.len());
    assert!(batch.success >= 1);
    for result in batch.results.iter().filter(|r| r.success) {
        assert!(result.confidence >= 0.8, "{} applied at {}", result.error_id, result.confidence);
    }
    assert_eq!(batch.success + batch.failed + batch.skipped, batch.results.len());
}

#[test]
fn test_fix_file_revalidation_never_grows() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "ledger.json", LEDGER);
    let report = fix_file(
        &path,
        &mut IntegratedErrorFixer::default(),
        &IntegratedErrorDetector::default(),
        &FixOptions::default(),
    )
    .unwrap();

    assert!(report.saved);
    assert!(report.remaining_errors <= report.total_errors_before);
    let reloaded = storage::load_workbook(&path).unwrap();
    assert_eq!(
        reloaded.get_cell("Sheet1", "C1").unwrap().formula.as_deref(),
        Some("=IFERROR(A1/B1, 0)")
    );
}

struct RejectingWriter;

impl WorkbookWriter for RejectingWriter {
    fn save(&self, _workbook: &WorkbookContext, path: &Path) -> excelint_core::Result<()> {
        std::fs::write(path, b"{\"sheets\":[")?;
        Err(ExcelintError::Fix {
            error_id: "write".to_string(),
            message: "rejected".to_string(),
        })
    }
}

#[test]
fn test_failed_write_rolls_back_to_the_backup() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "ledger.json", LEDGER);
    let err = fix_file_with(
        &path,
        &mut IntegratedErrorFixer::default(),
        &IntegratedErrorDetector::default(),
        &FixOptions::default(),
        &RejectingWriter,
    )
    .unwrap_err();

    assert!(matches!(err, ExcelintError::Fix { .. }));
    let backup = std::fs::read(backup_path(&path)).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), backup);
    assert_eq!(backup, LEDGER.as_bytes());
}
