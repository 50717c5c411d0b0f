//! Helpers for working with raw formula text.

use std::sync::OnceLock;

use regex::Regex;

use excelint_engine::model::strip_string_literals;

/// Functions the formula checks treat as known. Anything else is reported as `#NAME?`.
pub const KNOWN_FUNCTIONS: &[&str] = &[
    "ABS", "AND", "AVERAGE", "AVERAGEA", "AVERAGEIF", "AVERAGEIFS", "CEILING", "CHOOSE",
    "COLUMN", "COLUMNS", "CONCAT", "CONCATENATE", "COUNT", "COUNTA", "COUNTBLANK", "COUNTIF",
    "COUNTIFS", "DATE", "DATEDIF", "DATEVALUE", "DAY", "EDATE", "EOMONTH", "EXACT", "EXP",
    "FALSE", "FILTER", "FIND", "FLOOR", "HLOOKUP", "HOUR", "IF", "IFERROR", "IFNA", "IFS",
    "INDEX", "INDIRECT", "INT", "ISBLANK", "ISERROR", "ISNA", "ISNUMBER", "ISTEXT", "LARGE",
    "LEFT", "LEN", "LN", "LOG", "LOG10", "LOOKUP", "LOWER", "MATCH", "MAX", "MAXIFS",
    "MEDIAN", "MID", "MIN", "MINIFS", "MINUTE", "MOD", "MONTH", "NETWORKDAYS", "NOT", "NOW",
    "OFFSET", "OR", "PMT", "POWER", "PRODUCT", "PROPER", "RAND", "RANDBETWEEN", "RANK",
    "REPLACE", "REPT", "RIGHT", "ROUND", "ROUNDDOWN", "ROUNDUP", "ROW", "ROWS", "SEARCH",
    "SECOND", "SMALL", "SORT", "SQRT", "STDEV", "SUBSTITUTE", "SUBTOTAL", "SUM", "SUMIF",
    "SUMIFS", "SUMPRODUCT", "SWITCH", "TEXT", "TEXTJOIN", "TIME", "TIMEVALUE", "TODAY",
    "TRIM", "TRUE", "UNIQUE", "UPPER", "VALUE", "VAR", "VLOOKUP", "WEEKDAY", "WORKDAY",
    "XLOOKUP", "XOR", "YEAR",
];

/// Common misspellings and their corrections.
pub const FUNCTION_TYPOS: &[(&str, &str)] = &[
    ("VLOKUP", "VLOOKUP"),
    ("HLOKUP", "HLOOKUP"),
    ("SUMM", "SUM"),
    ("AVERGAE", "AVERAGE"),
    ("COUNTIFF", "COUNTIF"),
    ("CONCATENAT", "CONCATENATE"),
    ("IFERRO", "IFERROR"),
    ("VLOOKP", "VLOOKUP"),
    ("CONUT", "COUNT"),
    ("MACH", "MATCH"),
    ("INDX", "INDEX"),
];

/// Functions whose value changes on every recalculation.
pub const VOLATILE_FUNCTIONS: &[&str] = &["NOW", "TODAY", "RAND", "RANDBETWEEN", "OFFSET", "INDIRECT"];

pub fn is_known_function(name: &str) -> bool {
    KNOWN_FUNCTIONS.contains(&name.to_ascii_uppercase().as_str())
}

pub fn typo_correction(name: &str) -> Option<&'static str> {
    let upper = name.to_ascii_uppercase();
    FUNCTION_TYPOS
        .iter()
        .find(|(typo, _)| *typo == upper)
        .map(|(_, fixed)| *fixed)
}

fn function_call_re() -> &'static Regex {
    static FN_RE: OnceLock<Regex> = OnceLock::new();
    FN_RE.get_or_init(|| {
        Regex::new(r"(?<name>[A-Za-z_][A-Za-z0-9_.]*)\s*\(").expect("function call regex must compile")
    })
}

/// Names of functions called in `formula`, in order, string literals ignored.
/// Sheet-qualified tokens and `_xlfn.` prefixes are not function names.
pub fn function_calls(formula: &str) -> Vec<String> {
    let cleaned = strip_string_literals(formula);
    function_call_re()
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let m = caps.name("name")?;
            let before = cleaned[..m.start()].chars().next_back();
            if before.is_some_and(|c| c.is_ascii_alphanumeric() || c == '!' || c == '\'') {
                return None;
            }
            let name = m.as_str();
            let name = name.strip_prefix("_xlfn.").unwrap_or(name);
            Some(name.to_ascii_uppercase())
        })
        .collect()
}

/// Correct misspelled function names and upper-case known ones, string
/// literals untouched. Returns the new text and how many typos were fixed.
pub fn rewrite_function_names(formula: &str) -> (String, usize) {
    let cleaned = strip_string_literals(formula);
    let mut out = String::with_capacity(formula.len());
    let mut last = 0;
    let mut typos = 0;

    for caps in function_call_re().captures_iter(&cleaned) {
        let Some(m) = caps.name("name") else {
            continue;
        };
        let before = cleaned[..m.start()].chars().next_back();
        if before.is_some_and(|c| c.is_ascii_alphanumeric() || c == '!' || c == '\'') {
            continue;
        }
        let name = &formula[m.range()];
        let replacement = match typo_correction(name) {
            Some(fixed) => {
                typos += 1;
                fixed.to_string()
            }
            None if is_known_function(name) => name.to_ascii_uppercase(),
            None => continue,
        };
        out.push_str(&formula[last..m.start()]);
        out.push_str(&replacement);
        last = m.end();
    }
    out.push_str(&formula[last..]);
    (out, typos)
}

/// Formula text without the leading `=`.
pub fn body(formula: &str) -> &str {
    let trimmed = formula.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).trim()
}

/// `=IFERROR(<body>, <fallback>)`.
pub fn wrap_iferror(formula: &str, fallback: &str) -> String {
    format!("=IFERROR({}, {})", body(formula), fallback)
}

/// True when `()`, `[]` and `{}` nest correctly outside string literals.
pub fn balanced_brackets(formula: &str) -> bool {
    let mut stack = Vec::new();
    for ch in strip_string_literals(formula).chars() {
        match ch {
            '(' | '[' | '{' => stack.push(ch),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Deepest parenthesis nesting, string literals ignored.
pub fn nesting_depth(formula: &str) -> usize {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for ch in strip_string_literals(formula).chars() {
        match ch {
            '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_calls() {
        assert_eq!(
            function_calls("=IF(SUM(A1:A3)>0, VLOOKUP(B1, D:E, 2, FALSE), \"NOPE(\")"),
            vec!["IF", "SUM", "VLOOKUP"]
        );
        assert_eq!(function_calls("=_xlfn.XLOOKUP(A1,B:B,C:C)"), vec!["XLOOKUP"]);
    }

    #[test]
    fn test_balanced_brackets() {
        assert!(balanced_brackets("=SUM((A1+B1)*2)"));
        assert!(!balanced_brackets("=SUM((A1+B1)*2"));
        assert!(!balanced_brackets("=SUM(A1]"));
        assert!(balanced_brackets("=\"(\"&A1"));
    }

    #[test]
    fn test_wrap_iferror() {
        assert_eq!(wrap_iferror("=A1/B1", "0"), "=IFERROR(A1/B1, 0)");
        assert_eq!(wrap_iferror("A1", "\"\""), "=IFERROR(A1, \"\")");
    }

    #[test]
    fn test_typos_and_known_functions() {
        assert_eq!(typo_correction("vlokup"), Some("VLOOKUP"));
        assert!(is_known_function("sumifs"));
        assert!(!is_known_function("FOO"));
    }

    #[test]
    fn test_rewrite_function_names() {
        assert_eq!(
            rewrite_function_names("=vlokup(A1,B1:C9,2,false)"),
            ("=VLOOKUP(A1,B1:C9,2,false)".to_string(), 1)
        );
        assert_eq!(
            rewrite_function_names("=sum(A1:A3)&\"summ(\""),
            ("=SUM(A1:A3)&\"summ(\"".to_string(), 0)
        );
        assert_eq!(rewrite_function_names("=MyFunc(A1)"), ("=MyFunc(A1)".to_string(), 0));
    }

    #[test]
    fn test_nesting_depth() {
        assert_eq!(nesting_depth("=IF(A1,IF(B1,IF(C1,1,2),3),4)"), 3);
        assert_eq!(nesting_depth("=A1"), 0);
    }
}
