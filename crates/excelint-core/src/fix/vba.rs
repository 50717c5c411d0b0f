//! Source transforms for VBA findings.
//!
//! Each transform rewrites the whole module. Edits are found by the procedure
//! name, variable or literal the finding carries; the reported line is only a
//! hint, since earlier fixes in a batch shift lines.

use std::sync::OnceLock;

use excelint_engine::model::{ErrorKind, Finding, Location, VbaIssue, WorkbookContext};
use regex::Regex;

use super::{FixResult, FixStrategy, fix_error};
use crate::detect::procedures;
use crate::error::Result;

const SETTINGS_LOOKUP: &str = "ThisWorkbook.Worksheets(\"Settings\").Range(\"FilePath\").Value";
const WAIT_CALL: &str = "Application.Wait (Now + TimeValue(\"0:00:01\"))";
const INDENT: &str = "    ";

struct Patterns {
    option_explicit: Regex,
    on_error: Regex,
    select_pair: Regex,
    do_events: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("VBA fix regex must compile");
        Patterns {
            option_explicit: re(r"(?im)^\s*Option\s+Explicit\b"),
            on_error: re(r"(?i)\bOn\s+Error\b"),
            select_pair: re(r"(?mi)^([ \t]*)(\w+)\.Select[ \t]*\r?\n[ \t]*Selection\."),
            do_events: re(r"(?i)\bDoEvents\b"),
        }
    })
}

/// Module code as editable lines, remembering whether it ended in a newline.
struct Lines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Lines {
    fn new(code: &str) -> Self {
        Lines {
            lines: code.lines().map(str::to_string).collect(),
            trailing_newline: code.ends_with('\n'),
        }
    }

    fn finish(self) -> String {
        let mut code = self.lines.join("\n");
        if self.trailing_newline {
            code.push('\n');
        }
        code
    }
}

pub struct VbaCodeFixer;

impl VbaCodeFixer {
    fn issue(finding: &Finding) -> Option<VbaIssue> {
        match finding.kind {
            ErrorKind::Vba(issue) => Some(issue),
            _ => None,
        }
    }

    fn value<'a>(finding: &'a Finding) -> Result<&'a str> {
        finding
            .value
            .as_deref()
            .ok_or_else(|| fix_error(finding, "finding does not name its target"))
    }

    /// 0-based line index the finding points at, if any.
    fn line_index(finding: &Finding) -> Option<usize> {
        match finding.location {
            Location::Vba { line, .. } if line > 0 => Some(line - 1),
            _ => None,
        }
    }

    /// The hinted line when it still matches, else the first line that does.
    fn locate(lines: &[String], hint: Option<usize>, matches: impl Fn(&str) -> bool) -> Option<usize> {
        hint.filter(|&i| lines.get(i).is_some_and(|l| matches(l)))
            .or_else(|| lines.iter().position(|l| matches(l)))
    }

    /// `name = ...`, `Set name = ...` or `For name = ...`.
    fn assigns(line: &str, name: &str) -> bool {
        let lower = line.trim_start().to_ascii_lowercase();
        let rest = lower
            .strip_prefix("set ")
            .or_else(|| lower.strip_prefix("for "))
            .unwrap_or(lower.as_str())
            .trim_start();
        rest.strip_prefix(&name.to_ascii_lowercase())
            .is_some_and(|after| after.trim_start().starts_with('='))
    }

    fn add_option_explicit(finding: &Finding, code: &str) -> Result<String> {
        if patterns().option_explicit.is_match(code) {
            return Err(fix_error(finding, "Option Explicit is already present"));
        }
        Ok(format!("Option Explicit\n\n{}", code))
    }

    fn add_error_handler(finding: &Finding, code: &str) -> Result<String> {
        let name = Self::value(finding)?;
        let Some(proc) = procedures(code).into_iter().find(|p| p.name.eq_ignore_ascii_case(name)) else {
            return Err(fix_error(finding, format!("procedure '{}' not found", name)));
        };
        let Some(end) = proc.end else {
            return Err(fix_error(finding, format!("procedure '{}' has no End line", name)));
        };
        let mut lines = Lines::new(code);
        if lines.lines[proc.start..=end].iter().any(|l| patterns().on_error.is_match(l)) {
            return Err(fix_error(finding, format!("'{}' already handles errors", name)));
        }
        let exit = if proc.kind.eq_ignore_ascii_case("function") { "Exit Function" } else { "Exit Sub" };

        lines.lines.splice(
            end..end,
            [
                format!("{INDENT}{exit}"),
                "ErrorHandler:".to_string(),
                format!("{INDENT}MsgBox \"Error \" & Err.Number & \": \" & Err.Description"),
            ],
        );
        lines.lines.insert(proc.start + 1, format!("{INDENT}On Error GoTo ErrorHandler"));
        Ok(lines.finish())
    }

    fn remove_select(finding: &Finding, code: &str) -> Result<String> {
        let fixed = patterns().select_pair.replace_all(code, "${1}${2}.");
        if fixed == code {
            return Err(fix_error(finding, "no Select/Selection pair found"));
        }
        Ok(fixed.into_owned())
    }

    fn release_object(finding: &Finding, code: &str) -> Result<String> {
        let name = Self::value(finding)?;
        let release = format!("{INDENT}Set {} = Nothing", name);
        let mut lines = Lines::new(code);
        let assigned = Self::locate(&lines.lines, Self::line_index(finding), |l| Self::assigns(l, name));
        let end = assigned.and_then(|idx| {
            procedures(code)
                .into_iter()
                .find(|p| p.start <= idx && p.end.is_some_and(|e| idx < e))
                .and_then(|p| p.end)
        });
        match end {
            Some(end) => lines.lines.insert(end, release),
            None => lines.lines.push(release),
        }
        Ok(lines.finish())
    }

    fn replace_path(finding: &Finding, code: &str) -> Result<String> {
        let path = Self::value(finding)?;
        if !code.contains(path) {
            return Err(fix_error(finding, format!("{} no longer appears in the module", path)));
        }
        Ok(code.replace(path, SETTINGS_LOOKUP))
    }

    fn replace_deprecated(finding: &Finding, code: &str) -> Result<String> {
        let call = Self::value(finding)?;
        let mut lines = Lines::new(code);
        let needle = call.to_ascii_lowercase();
        let found = Self::locate(&lines.lines, Self::line_index(finding), |l| {
            l.to_ascii_lowercase().contains(&needle)
        });
        let Some(idx) = found else {
            return Err(fix_error(finding, format!("{} no longer appears in the module", call)));
        };

        let line = &lines.lines[idx];
        let replaced = if call.eq_ignore_ascii_case("DoEvents") {
            patterns().do_events.replace_all(line, WAIT_CALL).into_owned()
        } else {
            let indent_len = line.len() - line.trim_start().len();
            format!("{}' {}", &line[..indent_len], line.trim_start())
        };
        lines.lines[idx] = replaced;
        Ok(lines.finish())
    }

    fn declare_variable(finding: &Finding, code: &str) -> Result<String> {
        let name = Self::value(finding)?;
        let mut lines = Lines::new(code);
        let assigned = Self::locate(&lines.lines, Self::line_index(finding), |l| Self::assigns(l, name));
        let enclosing = assigned.and_then(|idx| {
            procedures(code)
                .into_iter()
                .find(|p| p.start < idx && p.end.is_none_or(|e| idx < e))
        });
        match enclosing {
            Some(proc) => lines
                .lines
                .insert(proc.start + 1, format!("{INDENT}Dim {} As Variant", name)),
            None => {
                let at = lines
                    .lines
                    .iter()
                    .position(|l| patterns().option_explicit.is_match(l))
                    .map_or(0, |i| i + 1);
                lines.lines.insert(at, format!("Dim {} As Variant", name));
            }
        }
        Ok(lines.finish())
    }
}

impl FixStrategy for VbaCodeFixer {
    fn name(&self) -> &'static str {
        "vba"
    }

    fn can_handle(&self, finding: &Finding) -> bool {
        matches!(
            Self::issue(finding),
            Some(
                VbaIssue::MissingOptionExplicit
                    | VbaIssue::MissingErrorHandling
                    | VbaIssue::SelectActivate
                    | VbaIssue::UnreleasedObject
                    | VbaIssue::HardcodedPath
                    | VbaIssue::DeprecatedFunction
                    | VbaIssue::UndeclaredVariable
            )
        )
    }

    fn get_confidence(&self, finding: &Finding) -> f64 {
        match Self::issue(finding) {
            Some(VbaIssue::MissingOptionExplicit) => 0.95,
            Some(VbaIssue::SelectActivate) => 0.90,
            Some(VbaIssue::MissingErrorHandling | VbaIssue::UndeclaredVariable) => 0.85,
            Some(VbaIssue::UnreleasedObject) => 0.80,
            Some(VbaIssue::DeprecatedFunction) => 0.75,
            Some(VbaIssue::HardcodedPath) => 0.70,
            _ => 0.0,
        }
    }

    fn apply_fix(&self, finding: &Finding, workbook: Option<&WorkbookContext>) -> Result<FixResult> {
        let Location::Vba { module, .. } = &finding.location else {
            return Err(fix_error(finding, "not a VBA finding"));
        };
        let Some(source) = workbook.and_then(|wb| wb.vba_module(module)) else {
            return Err(fix_error(finding, format!("module '{}' is not available", module)));
        };
        let code = source.code.as_str();

        let (fixed, message) = match Self::issue(finding) {
            Some(VbaIssue::MissingOptionExplicit) => {
                (Self::add_option_explicit(finding, code)?, "Added Option Explicit")
            }
            Some(VbaIssue::MissingErrorHandling) => {
                (Self::add_error_handler(finding, code)?, "Added an error handler")
            }
            Some(VbaIssue::SelectActivate) => {
                (Self::remove_select(finding, code)?, "Referenced the object directly")
            }
            Some(VbaIssue::UnreleasedObject) => {
                (Self::release_object(finding, code)?, "Released the object")
            }
            Some(VbaIssue::HardcodedPath) => {
                (Self::replace_path(finding, code)?, "Read the path from the Settings sheet")
            }
            Some(VbaIssue::DeprecatedFunction) => {
                (Self::replace_deprecated(finding, code)?, "Replaced the deprecated call")
            }
            Some(VbaIssue::UndeclaredVariable) => {
                (Self::declare_variable(finding, code)?, "Declared the variable")
            }
            _ => return Err(fix_error(finding, "no transform for this VBA issue")),
        };

        Ok(FixResult::fixed(
            finding,
            code,
            fixed,
            self.get_confidence(finding),
            message,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use excelint_engine::model::{Severity, VbaModule};

    fn workbook(code: &str) -> WorkbookContext {
        let mut wb = WorkbookContext::new("f", "book.xlsm");
        wb.vba_modules.push(VbaModule::new("Module1", code));
        wb
    }

    fn finding(issue: VbaIssue, line: usize, value: Option<&str>) -> Finding {
        let f = Finding::new(ErrorKind::Vba(issue), Location::vba("Module1", line), Severity::Medium, "vba");
        match value {
            Some(v) => f.with_value(v),
            None => f,
        }
    }

    fn fix(code: &str, f: &Finding) -> String {
        VbaCodeFixer
            .apply_fix(f, Some(&workbook(code)))
            .unwrap()
            .fixed_formula
            .unwrap()
    }

    #[test]
    fn test_option_explicit_is_prepended_once() {
        let f = finding(VbaIssue::MissingOptionExplicit, 1, None);
        assert_eq!(fix("Sub A()\nEnd Sub\n", &f), "Option Explicit\n\nSub A()\nEnd Sub\n");
        let wb = workbook("Option Explicit\nSub A()\nEnd Sub\n");
        assert!(VbaCodeFixer.apply_fix(&f, Some(&wb)).is_err());
    }

    #[test]
    fn test_error_handler_wraps_the_procedure() {
        let code = "Sub Cleanup()\n    Kill \"temp.txt\"\nEnd Sub\n";
        let f = finding(VbaIssue::MissingErrorHandling, 1, Some("Cleanup"));
        assert_eq!(
            fix(code, &f),
            "Sub Cleanup()\n    On Error GoTo ErrorHandler\n    Kill \"temp.txt\"\n    Exit Sub\nErrorHandler:\n    MsgBox \"Error \" & Err.Number & \": \" & Err.Description\nEnd Sub\n"
        );
    }

    #[test]
    fn test_select_pair_is_collapsed() {
        let code = "Sub A()\n    Range1.Select\n    Selection.ClearContents\nEnd Sub\n";
        let f = finding(VbaIssue::SelectActivate, 2, Some("Range1"));
        assert_eq!(fix(code, &f), "Sub A()\n    Range1.ClearContents\nEnd Sub\n");
    }

    #[test]
    fn test_object_released_before_end() {
        let code = "Sub A()\n    Set fso = CreateObject(\"Scripting.FileSystemObject\")\nEnd Sub\n";
        let f = finding(VbaIssue::UnreleasedObject, 2, Some("fso"));
        assert_eq!(
            fix(code, &f),
            "Sub A()\n    Set fso = CreateObject(\"Scripting.FileSystemObject\")\n    Set fso = Nothing\nEnd Sub\n"
        );
    }

    #[test]
    fn test_hardcoded_path_and_deprecated_calls() {
        let code = "Sub A()\n    p = \"C:\\in.csv\"\n    For i = 1 To 3\n        DoEvents\n    Next i\nEnd Sub\n";
        let path = finding(VbaIssue::HardcodedPath, 2, Some("\"C:\\in.csv\""));
        assert!(fix(code, &path).contains(&format!("p = {}", SETTINGS_LOOKUP)));

        let deprecated = finding(VbaIssue::DeprecatedFunction, 4, Some("DoEvents"));
        assert!(fix(code, &deprecated).contains(&format!("        {}\n", WAIT_CALL)));

        let search = finding(VbaIssue::DeprecatedFunction, 2, Some("Application.FileSearch"));
        let fixed = fix("Sub A()\n    Set fs = Application.FileSearch\nEnd Sub\n", &search);
        assert!(fixed.contains("    ' Set fs = Application.FileSearch\n"));
    }

    #[test]
    fn test_undeclared_variable_is_declared_in_its_procedure() {
        let code = "Option Explicit\nSub A()\n    counter = 1\nEnd Sub\n";
        let f = finding(VbaIssue::UndeclaredVariable, 3, Some("counter"));
        assert_eq!(
            fix(code, &f),
            "Option Explicit\nSub A()\n    Dim counter As Variant\n    counter = 1\nEnd Sub\n"
        );
    }

    #[test]
    fn test_confidence_table_and_routing() {
        assert_eq!(VbaCodeFixer.get_confidence(&finding(VbaIssue::MissingOptionExplicit, 1, None)), 0.95);
        assert_eq!(VbaCodeFixer.get_confidence(&finding(VbaIssue::HardcodedPath, 1, None)), 0.70);
        assert!(!VbaCodeFixer.can_handle(&finding(VbaIssue::DangerousApi, 1, None)));
        let missing = finding(VbaIssue::MissingOptionExplicit, 1, None);
        assert!(VbaCodeFixer.apply_fix(&missing, None).is_err());
    }
}
