//! VBA source checks.
//!
//! Works line by line over extracted module text. Comment lines (`'` or
//! `Rem`) are skipped. Line numbers in findings are 1-based; block-count
//! findings that have no single line use line 0.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use excelint_engine::model::{ErrorKind, Finding, Location, Severity, VbaCategory, VbaIssue, VbaModule, WorkbookContext};
use regex::Regex;

use super::ErrorDetector;
use crate::error::Result;

const DEFAULT_CONFIDENCE: f64 = 0.85;

/// Names that may be assigned without a declaration.
const BUILTIN_NAMES: &[&str] = &[
    "true",
    "false",
    "null",
    "nothing",
    "empty",
    "me",
    "err",
    "debug",
    "application",
    "activeworkbook",
    "activesheet",
    "selection",
    "range",
    "cells",
];

/// Dangerous calls and their severity.
const DANGEROUS_APIS: &[(&str, &str, Severity)] = &[
    ("Shell", r"(?i)(?:^|[^.\w])Shell\b", Severity::Critical),
    ("CreateObject", r"(?i)\bCreateObject\b", Severity::High),
    ("GetObject", r"(?i)\bGetObject\b", Severity::High),
    ("Environ", r"(?i)\bEnviron\b", Severity::Medium),
    ("Kill", r"(?i)\bKill\b", Severity::Critical),
    ("FileCopy", r"(?i)\bFileCopy\b", Severity::High),
    ("Name", r"(?i)^\s*Name\s+\S.*\s+As\s+", Severity::High),
    ("URLDownloadToFile", r"(?i)\bURLDownloadToFile\b", Severity::Critical),
    ("MSXML2.XMLHTTP", r"(?i)\bMSXML2\.XMLHTTP\b", Severity::Critical),
    ("WScript.Shell", r"(?i)\bWScript\.Shell\b", Severity::Critical),
];

/// A `Sub` or `Function` block. Line indices are 0-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Procedure {
    pub name: String,
    pub kind: String,
    pub params: Vec<String>,
    pub start: usize,
    pub end: Option<usize>,
}

struct Rules {
    proc_start: Regex,
    proc_end: Regex,
    option_explicit: Regex,
    on_error: Regex,
    file_op: Regex,
    declaration: Regex,
    assignment: Regex,
    for_var: Regex,
    infinite_loop: Regex,
    hardcoded_path: Regex,
    sql_injection: Regex,
    with_start: Regex,
    with_end: Regex,
    if_start: Regex,
    if_end: Regex,
    select: Regex,
    selection_use: Regex,
    create_object: Regex,
    loop_start: Regex,
    loop_end: Regex,
    do_events: Regex,
    file_search: Regex,
    assistant: Regex,
    word: Regex,
    apis: Vec<(&'static str, Regex, Severity)>,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("VBA rule regex must compile");
        Rules {
            proc_start: re(
                r"(?i)^\s*(?:(?:Public|Private|Friend)\s+)?(?:Static\s+)?(?<kind>Sub|Function)\s+(?<name>\w+)\s*(?:\((?<params>[^)]*)\))?",
            ),
            proc_end: re(r"(?i)^\s*End\s+(?:Sub|Function)\b"),
            option_explicit: re(r"(?i)^\s*Option\s+Explicit\b"),
            on_error: re(r"(?i)\bOn\s+Error\b"),
            file_op: re(r"(?i)^\s*(?:Open\s+.+\s+For\s+|Kill\s+|MkDir\s+|RmDir\s+|FileCopy\s+|Name\s+\S.*\s+As\s+)"),
            declaration: re(r"(?i)^\s*(?:Dim|Static|Const|Private|Public|Global)\s+(?<rest>.+)$"),
            assignment: re(r"(?i)^\s*(?:Let\s+|Set\s+)?(?<name>[A-Za-z_]\w*)\s*="),
            for_var: re(r"(?i)^\s*For\s+(?<name>[A-Za-z_]\w*)\s*="),
            infinite_loop: re(r"(?i)\bDo\s+While\s+True\b|^\s*While\s+True\b"),
            hardcoded_path: re(r#"["'](?:[A-Za-z]:[\\/]|\\\\)[^"']+["']"#),
            sql_injection: re(r#"(?i)\.Execute\s*\(\s*["'].*["'].*&.*&.*["']"#),
            with_start: re(r"(?i)^\s*With\s+\S"),
            with_end: re(r"(?i)^\s*End\s+With\b"),
            if_start: re(r"(?i)^\s*If\s"),
            if_end: re(r"(?i)^\s*End\s+If\b"),
            select: re(r"(?i)^\s*(?<object>\w+)\.Select\s*$"),
            selection_use: re(r"(?i)^\s*Selection\.\w+"),
            create_object: re(r"(?i)^\s*Set\s+(?<name>\w+)\s*=\s*(?:CreateObject\b|New\s)"),
            loop_start: re(r"(?i)^\s*(?:Do\b|For\s|While\s)"),
            loop_end: re(r"(?i)^\s*(?:Loop\b|Next\b|Wend\b)"),
            do_events: re(r"(?i)\bDoEvents\b"),
            file_search: re(r"(?i)\bApplication\.FileSearch\b"),
            assistant: re(r"(?i)\bAssistant\b"),
            word: re(r"[A-Za-z_]\w*"),
            apis: DANGEROUS_APIS
                .iter()
                .map(|(name, pattern, severity)| (*name, re(pattern), *severity))
                .collect(),
        }
    })
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('\'') || t.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("rem "))
}

/// Procedure blocks in source order.
pub(crate) fn procedures(code: &str) -> Vec<Procedure> {
    let rules = rules();
    let mut procs: Vec<Procedure> = Vec::new();
    for (i, line) in code.lines().enumerate() {
        if is_comment(line) {
            continue;
        }
        if rules.proc_end.is_match(line) {
            if let Some(open) = procs.iter_mut().rev().find(|p| p.end.is_none()) {
                open.end = Some(i);
            }
            continue;
        }
        if let Some(caps) = rules.proc_start.captures(line) {
            if line.trim_start().to_ascii_lowercase().starts_with("declare") {
                continue;
            }
            let params = caps
                .name("params")
                .map(|m| parameter_names(m.as_str()))
                .unwrap_or_default();
            procs.push(Procedure {
                name: caps["name"].to_string(),
                kind: caps["kind"].to_string(),
                params,
                start: i,
                end: None,
            });
        }
    }
    procs
}

fn parameter_names(params: &str) -> Vec<String> {
    params
        .split(',')
        .filter_map(|p| {
            p.split_whitespace()
                .find(|w| {
                    !matches!(
                        w.to_ascii_lowercase().as_str(),
                        "optional" | "byval" | "byref" | "paramarray"
                    )
                })
                .map(|w| w.trim_end_matches("()").to_string())
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Variable names introduced by a `Dim`/`Private`/`Const`... line. Procedure,
/// type and API declarations yield nothing.
fn declared_names(rest: &str) -> Vec<String> {
    let mut rest = rest.trim();
    let first = rest.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
    match first.as_str() {
        "sub" | "function" | "property" | "declare" | "type" | "enum" | "event" => return Vec::new(),
        "const" | "withevents" => rest = rest[first.len()..].trim_start(),
        _ => {}
    }

    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut piece = String::new();
    for ch in rest.chars().chain(std::iter::once(',')) {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                let name = piece
                    .split_whitespace()
                    .find(|w| !w.eq_ignore_ascii_case("withevents"))
                    .unwrap_or("")
                    .trim_end_matches(['%', '&', '$', '!', '#', '@']);
                if !name.is_empty() {
                    names.push(name.to_string());
                }
                piece.clear();
            }
            _ if depth == 0 => piece.push(ch),
            _ => {}
        }
    }
    names
}

#[derive(Default)]
pub struct VbaErrorDetector;

impl VbaErrorDetector {
    pub fn new() -> Self {
        VbaErrorDetector
    }

    /// All findings for one module, grouped by check.
    pub fn scan_module(&self, module: &VbaModule) -> Vec<Finding> {
        let lines: Vec<&str> = module.code.lines().collect();
        let procs = procedures(&module.code);
        let mut findings = Vec::new();

        findings.extend(self.option_explicit(module, &lines));
        findings.extend(self.error_handling(module, &lines, &procs));
        findings.extend(self.undeclared_variables(module, &lines, &procs));
        findings.extend(self.line_patterns(module, &lines));
        findings.extend(self.block_balance(module, &lines));
        findings.extend(self.unused_variables(module, &lines));
        findings.extend(self.select_activate(module, &lines));
        findings.extend(self.unreleased_objects(module, &lines));
        findings.extend(self.deprecated_calls(module, &lines));
        findings
    }

    fn option_explicit(&self, module: &VbaModule, lines: &[&str]) -> Option<Finding> {
        if lines.iter().any(|l| rules().option_explicit.is_match(l)) {
            return None;
        }
        Some(
            finding(module, 1, VbaIssue::MissingOptionExplicit, Severity::Medium, "Module is missing 'Option Explicit'")
                .with_fix(Some("Add 'Option Explicit' at the top of the module".to_string())),
        )
    }

    fn error_handling(&self, module: &VbaModule, lines: &[&str], procs: &[Procedure]) -> Vec<Finding> {
        let rules = rules();
        let mut findings = Vec::new();
        for proc in procs {
            let end = proc.end.unwrap_or(lines.len().saturating_sub(1));
            let body = &lines[proc.start..=end.min(lines.len().saturating_sub(1))];
            let code: Vec<&&str> = body.iter().filter(|l| !is_comment(l)).collect();
            let touches_files = code.iter().any(|l| rules.file_op.is_match(l));
            let handled = code.iter().any(|l| rules.on_error.is_match(l));
            if touches_files && !handled {
                findings.push(
                    finding(
                        module,
                        proc.start + 1,
                        VbaIssue::MissingErrorHandling,
                        Severity::High,
                        format!("{} '{}' performs file operations without error handling", proc.kind, proc.name),
                    )
                    .with_source(lines[proc.start].trim())
                    .with_value(proc.name.clone())
                    .with_fix(Some("Add an 'On Error GoTo ErrorHandler' block".to_string())),
                );
            }
        }
        findings
    }

    fn undeclared_variables(&self, module: &VbaModule, lines: &[&str], procs: &[Procedure]) -> Vec<Finding> {
        let rules = rules();
        let mut declared: BTreeSet<String> = BUILTIN_NAMES.iter().map(|s| s.to_string()).collect();
        for proc in procs {
            declared.insert(proc.name.to_ascii_lowercase());
            declared.extend(proc.params.iter().map(|p| p.to_ascii_lowercase()));
        }
        for line in lines.iter().filter(|l| !is_comment(l)) {
            if let Some(caps) = rules.declaration.captures(line) {
                declared.extend(declared_names(&caps["rest"]).iter().map(|n| n.to_ascii_lowercase()));
            }
        }

        let mut reported = BTreeSet::new();
        let mut findings = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if is_comment(line) || rules.declaration.is_match(line) {
                continue;
            }
            let caps = rules
                .assignment
                .captures(line)
                .or_else(|| rules.for_var.captures(line));
            let Some(caps) = caps else {
                continue;
            };
            let name = caps["name"].to_string();
            let lower = name.to_ascii_lowercase();
            if declared.contains(&lower) || !reported.insert(lower) {
                continue;
            }
            findings.push(
                finding(
                    module,
                    i + 1,
                    VbaIssue::UndeclaredVariable,
                    Severity::High,
                    format!("Variable '{}' is assigned but never declared", name),
                )
                .with_source(line.trim())
                .with_value(name.clone())
                .with_fix(Some(format!("Dim {} As Variant", name))),
            );
        }
        findings
    }

    /// Checks that look at one line at a time: loops, paths, APIs and SQL.
    fn line_patterns(&self, module: &VbaModule, lines: &[&str]) -> Vec<Finding> {
        let rules = rules();
        let mut findings = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if is_comment(line) {
                continue;
            }
            let line_no = i + 1;
            let source = line.trim();

            if rules.infinite_loop.is_match(line) {
                findings.push(
                    finding(module, line_no, VbaIssue::InfiniteLoop, Severity::Critical, "Loop condition is always true")
                        .with_source(source)
                        .with_suggestion("Add an exit condition or an 'Exit Do' guard"),
                );
            }

            if let Some(m) = rules.hardcoded_path.find(line) {
                let path = m.as_str();
                findings.push(
                    finding(
                        module,
                        line_no,
                        VbaIssue::HardcodedPath,
                        Severity::Medium,
                        format!("Hardcoded file path {}", path),
                    )
                    .with_source(source)
                    .with_value(path)
                    .with_fix(Some("Read the path from a settings sheet".to_string())),
                );
            }

            let hits: Vec<&(&str, Regex, Severity)> = rules.apis.iter().filter(|(_, re, _)| re.is_match(line)).collect();
            if let Some(severity) = hits.iter().map(|(_, _, s)| *s).max() {
                let names: Vec<&str> = hits.iter().map(|(n, _, _)| *n).collect();
                findings.push(
                    finding(
                        module,
                        line_no,
                        VbaIssue::DangerousApi,
                        severity,
                        format!("Use of dangerous API: {}", names.join(", ")),
                    )
                    .with_source(source)
                    .with_value(names.join(", "))
                    .with_suggestion("Review this call and restrict its inputs"),
                );
            }

            if rules.sql_injection.is_match(line) {
                findings.push(
                    finding(
                        module,
                        line_no,
                        VbaIssue::SqlInjection,
                        Severity::Critical,
                        "SQL statement built by string concatenation",
                    )
                    .with_source(source)
                    .with_suggestion("Use a parameterised command"),
                );
            }
        }
        findings
    }

    fn block_balance(&self, module: &VbaModule, lines: &[&str]) -> Vec<Finding> {
        let rules = rules();
        let code: Vec<&str> = lines.iter().copied().filter(|l| !is_comment(l)).collect();
        let count = |re: &Regex| code.iter().filter(|l| re.is_match(l)).count();
        let mut findings = Vec::new();

        let (with_open, with_close) = (count(&rules.with_start), count(&rules.with_end));
        if with_open != with_close {
            findings.push(finding(
                module,
                0,
                VbaIssue::UnbalancedWith,
                Severity::High,
                format!("{} 'With' blocks but {} 'End With'", with_open, with_close),
            ));
        }

        // Single-line Ifs have no End If, so only a wide gap is reported.
        let (if_open, if_close) = (count(&rules.if_start), count(&rules.if_end));
        if if_open.abs_diff(if_close) > 3 {
            findings.push(
                finding(
                    module,
                    0,
                    VbaIssue::UnbalancedIf,
                    Severity::Medium,
                    format!("{} 'If' statements but {} 'End If'", if_open, if_close),
                )
                .potential_issue(),
            );
        }
        findings
    }

    fn unused_variables(&self, module: &VbaModule, lines: &[&str]) -> Vec<Finding> {
        let rules = rules();
        let mut usage: HashMap<String, usize> = HashMap::new();
        for line in lines.iter().filter(|l| !is_comment(l)) {
            for word in rules.word.find_iter(line) {
                *usage.entry(word.as_str().to_ascii_lowercase()).or_default() += 1;
            }
        }

        let mut findings = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if is_comment(line) || !line.trim_start().to_ascii_lowercase().starts_with("dim ") {
                continue;
            }
            let Some(caps) = rules.declaration.captures(line) else {
                continue;
            };
            let unused: Vec<String> = declared_names(&caps["rest"])
                .into_iter()
                .filter(|n| usage.get(&n.to_ascii_lowercase()).copied().unwrap_or(0) <= 1)
                .collect();
            if unused.is_empty() {
                continue;
            }
            findings.push(
                finding(
                    module,
                    i + 1,
                    VbaIssue::UnusedVariable,
                    Severity::Low,
                    format!("Declared but never used: {}", unused.join(", ")),
                )
                .with_source(line.trim())
                .with_value(unused.join(", "))
                .with_suggestion("Remove the unused declaration")
                .potential_issue(),
            );
        }
        findings
    }

    fn select_activate(&self, module: &VbaModule, lines: &[&str]) -> Vec<Finding> {
        let rules = rules();
        let mut findings = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let Some(caps) = rules.select.captures(line) else {
                continue;
            };
            let next = lines[i + 1..].iter().find(|l| !l.trim().is_empty());
            if next.is_some_and(|l| rules.selection_use.is_match(l)) {
                findings.push(
                    finding(
                        module,
                        i + 1,
                        VbaIssue::SelectActivate,
                        Severity::Low,
                        format!("'{}' is selected and then used through Selection", &caps["object"]),
                    )
                    .with_source(line.trim())
                    .with_value(&caps["object"])
                    .with_fix(Some("Reference the object directly".to_string()))
                    .potential_issue(),
                );
            }
        }
        findings
    }

    fn unreleased_objects(&self, module: &VbaModule, lines: &[&str]) -> Vec<Finding> {
        let rules = rules();
        let mut findings = Vec::new();
        let mut seen = BTreeSet::new();
        for (i, line) in lines.iter().enumerate() {
            if is_comment(line) {
                continue;
            }
            let Some(caps) = rules.create_object.captures(line) else {
                continue;
            };
            let name = caps["name"].to_string();
            if !seen.insert(name.to_ascii_lowercase()) || released(lines, &name) {
                continue;
            }
            findings.push(
                finding(
                    module,
                    i + 1,
                    VbaIssue::UnreleasedObject,
                    Severity::Medium,
                    format!("Object '{}' is never released", name),
                )
                .with_source(line.trim())
                .with_value(name.clone())
                .with_fix(Some(format!("Set {} = Nothing", name))),
            );
        }
        findings
    }

    fn deprecated_calls(&self, module: &VbaModule, lines: &[&str]) -> Vec<Finding> {
        let rules = rules();
        let mut findings = Vec::new();
        let mut loop_depth = 0usize;
        for (i, line) in lines.iter().enumerate() {
            if is_comment(line) {
                continue;
            }
            if rules.loop_end.is_match(line) {
                loop_depth = loop_depth.saturating_sub(1);
            }
            let call = if loop_depth > 0 && rules.do_events.is_match(line) {
                Some("DoEvents")
            } else if rules.file_search.is_match(line) {
                Some("Application.FileSearch")
            } else if rules.assistant.is_match(line) {
                Some("Assistant")
            } else {
                None
            };
            if let Some(call) = call {
                findings.push(
                    finding(
                        module,
                        i + 1,
                        VbaIssue::DeprecatedFunction,
                        Severity::Low,
                        format!("Deprecated call: {}", call),
                    )
                    .with_source(line.trim())
                    .with_value(call)
                    .with_fix(Some("Replace with the supported equivalent".to_string()))
                    .potential_issue(),
                );
            }
            if rules.loop_start.is_match(line) && !rules.loop_end.is_match(line) {
                loop_depth += 1;
            }
        }
        findings
    }
}

fn released(lines: &[&str], name: &str) -> bool {
    lines.iter().any(|l| {
        let words: Vec<String> = l.split_whitespace().map(|w| w.to_ascii_lowercase()).collect();
        words.len() >= 4
            && words[0] == "set"
            && words[1].eq_ignore_ascii_case(name)
            && words[2] == "="
            && words[3] == "nothing"
    })
}

fn finding(
    module: &VbaModule,
    line: usize,
    issue: VbaIssue,
    severity: Severity,
    message: impl Into<String>,
) -> Finding {
    let finding = Finding::new(ErrorKind::Vba(issue), Location::vba(&module.name, line), severity, message)
        .with_confidence(DEFAULT_CONFIDENCE);
    match issue.category() {
        VbaCategory::BestPractice | VbaCategory::Performance => finding.potential_issue(),
        _ => finding,
    }
}

impl ErrorDetector for VbaErrorDetector {
    fn name(&self) -> &'static str {
        "vba"
    }

    fn detect(&self, workbook: &WorkbookContext) -> Result<Vec<Finding>> {
        Ok(workbook
            .vba_modules
            .iter()
            .flat_map(|module| self.scan_module(module))
            .collect())
    }

    fn can_detect(&self, kind: &ErrorKind) -> bool {
        matches!(kind, ErrorKind::Vba(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use excelint_engine::model::FindingCategory;

    fn scan(code: &str) -> Vec<Finding> {
        VbaErrorDetector::new().scan_module(&VbaModule::new("Module1", code))
    }

    fn issues(findings: &[Finding]) -> Vec<VbaIssue> {
        findings
            .iter()
            .filter_map(|f| match f.kind {
                ErrorKind::Vba(issue) => Some(issue),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_clean_module() {
        let code = "Option Explicit\n\nSub Hello()\n    Dim msg As String\n    msg = \"hi\"\n    MsgBox msg\nEnd Sub\n";
        assert!(scan(code).is_empty(), "{:?}", scan(code));
    }

    #[test]
    fn test_missing_option_explicit() {
        let findings = scan("Sub A()\nEnd Sub\n");
        assert_eq!(issues(&findings), vec![VbaIssue::MissingOptionExplicit]);
        assert_eq!(findings[0].location, Location::vba("Module1", 1));
        assert!(findings[0].is_auto_fixable);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_file_ops_without_error_handling() {
        let code = "Option Explicit\nSub Cleanup()\n    Kill \"temp.txt\"\nEnd Sub\n";
        let findings = scan(code);
        let missing: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.kind == ErrorKind::Vba(VbaIssue::MissingErrorHandling))
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].location, Location::vba("Module1", 2));
        assert_eq!(missing[0].value.as_deref(), Some("Cleanup"));

        let handled = "Option Explicit\nSub Cleanup()\n    On Error Resume Next\n    Kill \"temp.txt\"\nEnd Sub\n";
        assert!(!issues(&scan(handled)).contains(&VbaIssue::MissingErrorHandling));
    }

    #[test]
    fn test_undeclared_assignment() {
        let code = "Option Explicit\nSub A(ByVal n As Long)\n    Dim total As Long\n    total = n\n    counter = total + 1\n    MsgBox counter\nEnd Sub\n";
        let findings = scan(code);
        let undeclared: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.kind == ErrorKind::Vba(VbaIssue::UndeclaredVariable))
            .collect();
        assert_eq!(undeclared.len(), 1);
        assert_eq!(undeclared[0].value.as_deref(), Some("counter"));
        assert_eq!(undeclared[0].location, Location::vba("Module1", 5));
    }

    #[test]
    fn test_dangerous_apis_and_loops() {
        let code = "Option Explicit\nSub A()\n    Dim o As Object\n    Set o = CreateObject(\"WScript.Shell\")\n    Do While True\n    Loop\n    Set o = Nothing\nEnd Sub\n";
        let findings = scan(code);
        let api = findings
            .iter()
            .find(|f| f.kind == ErrorKind::Vba(VbaIssue::DangerousApi))
            .unwrap();
        assert_eq!(api.severity, Severity::Critical);
        assert_eq!(api.value.as_deref(), Some("CreateObject, WScript.Shell"));
        assert!(!api.is_auto_fixable);
        let looping = findings
            .iter()
            .find(|f| f.kind == ErrorKind::Vba(VbaIssue::InfiniteLoop))
            .unwrap();
        assert_eq!(looping.location, Location::vba("Module1", 5));
        assert!(!issues(&findings).contains(&VbaIssue::UnreleasedObject));
    }

    #[test]
    fn test_hardcoded_path_and_sql() {
        let code = "Option Explicit\nSub A(ByVal id As String)\n    Dim p As String\n    p = \"C:\\data\\in.csv\"\n    conn.Execute (\"SELECT * FROM t WHERE id='\" & id & \"'\")\nEnd Sub\n";
        let findings = scan(code);
        let path = findings
            .iter()
            .find(|f| f.kind == ErrorKind::Vba(VbaIssue::HardcodedPath))
            .unwrap();
        assert_eq!(path.value.as_deref(), Some("\"C:\\data\\in.csv\""));
        assert!(issues(&findings).contains(&VbaIssue::SqlInjection));
    }

    #[test]
    fn test_block_balance() {
        let code = "Option Explicit\nSub A()\n    With Sheet1\n        .Name = \"x\"\nEnd Sub\n";
        let findings = scan(code);
        let with = findings
            .iter()
            .find(|f| f.kind == ErrorKind::Vba(VbaIssue::UnbalancedWith))
            .unwrap();
        assert_eq!(with.location, Location::vba("Module1", 0));
        assert_eq!(with.severity, Severity::High);
    }

    #[test]
    fn test_unused_variable() {
        let code = "Option Explicit\nSub A()\n    Dim used As Long, spare As Long\n    used = 1\n    MsgBox used\nEnd Sub\n";
        let findings = scan(code);
        let unused = findings
            .iter()
            .find(|f| f.kind == ErrorKind::Vba(VbaIssue::UnusedVariable))
            .unwrap();
        assert_eq!(unused.value.as_deref(), Some("spare"));
        assert_eq!(unused.category, FindingCategory::PotentialIssue);
    }

    #[test]
    fn test_fixable_patterns() {
        let code = "Option Explicit\nSub A()\n    Dim fso As Object\n    Set fso = CreateObject(\"Scripting.FileSystemObject\")\n    Range1.Select\n    Selection.ClearContents\n    For i = 1 To 10\n        DoEvents\n    Next i\nEnd Sub\n";
        let found = issues(&scan(code));
        assert!(found.contains(&VbaIssue::UnreleasedObject));
        assert!(found.contains(&VbaIssue::SelectActivate));
        assert!(found.contains(&VbaIssue::DeprecatedFunction));
        assert!(found.contains(&VbaIssue::UndeclaredVariable));
    }

    #[test]
    fn test_procedures_are_parsed() {
        let procs = procedures("Private Function Twice(ByVal x As Long) As Long\n    Twice = x * 2\nEnd Function\nSub B()\nEnd Sub\n");
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].name, "Twice");
        assert_eq!(procs[0].params, vec!["x"]);
        assert_eq!(procs[0].end, Some(2));
        assert_eq!(procs[1].start, 3);
    }
}
