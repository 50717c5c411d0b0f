//! Integration tests for the excelint command line.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

const BOOK: &str = r##"{"sheets":[{"name":"Sheet1","cells":[
    {"address":"A1","value":10},
    {"address":"B1","value":0},
    {"address":"C1","formula":"=A1/B1","value":"#DIV/0!"}
]}]}"##;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        // An explicit empty config keeps tests independent of the user's config.toml.
        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        Workspace { dir }
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> (String, String, i32) {
        let config = self.dir.path().join("config.toml");
        let output = Command::new("cargo")
            .arg("run")
            .arg("-q")
            .arg("--")
            .arg("--config")
            .arg(&config)
            .args(args)
            .output()
            .expect("Failed to execute command");

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        (stdout, stderr, exit_code)
    }
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_detect_json() {
    let ws = Workspace::new();
    let book = ws.file("book.json", BOOK);
    let (stdout, _, code) = ws.run(&["--json", "detect", arg(&book)]);
    assert_eq!(code, 0);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["summary"]["total_errors"], 1);
    assert_eq!(report["errors"][0]["id"], "Sheet1_C1_div_zero");
}

#[test]
fn test_detect_text() {
    let ws = Workspace::new();
    let book = ws.file("book.json", BOOK);
    let (stdout, _, code) = ws.run(&["detect", arg(&book)]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 error(s)"));
    assert!(stdout.contains("Sheet1!C1 #DIV/0!"));
}

#[test]
fn test_predict_changed_cell() {
    let ws = Workspace::new();
    let book = ws.file("book.json", BOOK);
    let (stdout, _, code) = ws.run(&["predict", arg(&book), "--changed", "Sheet1!B1"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 prediction(s)"));
    assert!(stdout.contains("[High] Sheet1!C1"));
}

#[test]
fn test_predict_sees_existing_findings() {
    let ws = Workspace::new();
    let book = ws.file(
        "flagged.json",
        r#"{"sheets":[{"name":"Sheet1","cells":[
            {"address":"A1","formula":"=SUM(Z1:Z5)"},
            {"address":"D1","formula":"=A1*2"}
        ]}]}"#,
    );
    let (stdout, _, code) = ws.run(&["predict", arg(&book), "--changed", "Sheet1!A1"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 prediction(s)"));
    assert!(stdout.contains("[Medium] Sheet1!D1 60%"));
}

#[test]
fn test_fix_writes_the_file() {
    let ws = Workspace::new();
    let book = ws.file("book.json", BOOK);
    let (stdout, _, code) = ws.run(&["fix", arg(&book)]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 error(s), 1 fixed, 0 remaining"));
    let saved = std::fs::read_to_string(&book).unwrap();
    assert!(saved.contains("=IFERROR(A1/B1, 0)"));
}

#[test]
fn test_fix_no_save() {
    let ws = Workspace::new();
    let book = ws.file("book.json", BOOK);
    let (stdout, _, code) = ws.run(&["fix", arg(&book), "--no-save"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("File not modified"));
    assert_eq!(std::fs::read_to_string(&book).unwrap(), BOOK);
}

#[test]
fn test_batch_reports_failures() {
    let ws = Workspace::new();
    let book = ws.file("book.json", BOOK);
    let missing = ws.dir.path().join("missing.json");
    let (stdout, stderr, code) = ws.run(&["batch", arg(&book), arg(&missing)]);
    assert_eq!(code, 1);
    assert!(stdout.contains("1 of 2 processed, 1 failed"));
    assert!(stderr.contains("Error: 1 file(s) failed"));
}

#[test]
fn test_unsupported_file_type() {
    let ws = Workspace::new();
    let book = ws.file("book.xlsx", "");
    let (_, stderr, code) = ws.run(&["detect", arg(&book)]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Error: Unsupported file type"));
}

#[test]
fn test_unknown_command() {
    let ws = Workspace::new();
    let (_, stderr, code) = ws.run(&["explode"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Error: Unknown command: explode"));
    assert!(stderr.contains("Usage: excelint"));
}
