//! CSV import/export. A CSV file is one sheet named `Sheet1`.

use std::path::Path;

use excelint_engine::model::{CellRef, CellValue, SheetContext, WorkbookContext, format_number};

use super::{WorkbookLoader, WorkbookWriter, file_identity, write_atomic};
use crate::error::{ExcelintError, Result};

pub const CSV_SHEET: &str = "Sheet1";

#[derive(Clone, Copy, Debug, Default)]
pub struct CsvLoader;

impl CsvLoader {
    pub fn parse(content: &str, file_id: &str, file_name: &str) -> Result<WorkbookContext> {
        if content.trim().is_empty() {
            return Err(ExcelintError::EmptyCsv);
        }
        let mut sheet = SheetContext::new(CSV_SHEET);
        for (row_idx, line) in content.lines().enumerate() {
            let fields = parse_csv_line(line).map_err(|message| ExcelintError::Parse {
                line: row_idx + 1,
                message: message.to_string(),
            })?;
            for (col_idx, field) in fields.into_iter().enumerate() {
                if field.is_empty() {
                    continue;
                }
                let address = CellRef::new(col_idx, row_idx).to_string();
                let Some(cell) = sheet.cell_entry(&address) else {
                    return Err(ExcelintError::Parse {
                        line: row_idx + 1,
                        message: format!("cell {} is outside the sheet grid", address),
                    });
                };
                match parse_csv_field(&field) {
                    CsvField::Formula(f) => cell.formula = Some(f),
                    CsvField::Value(v) => cell.value = Some(v),
                }
            }
        }

        let mut workbook = WorkbookContext::new(file_id, file_name);
        workbook.add_sheet(sheet);
        workbook.rebuild_dependencies();
        Ok(workbook)
    }

    /// The first sheet as CSV text. Formulas are written as formulas, other
    /// cells as their cached value.
    pub fn to_csv(workbook: &WorkbookContext) -> String {
        let Some(sheet) = workbook.get_sheet(CSV_SHEET).or_else(|| workbook.sheets.values().next()) else {
            return String::new();
        };
        let mut out = String::new();
        for row in 0..sheet.row_count() {
            let fields: Vec<String> = (0..sheet.column_count())
                .map(|col| match sheet.cell_at(row, col) {
                    Some(cell) => match (&cell.formula, &cell.value) {
                        (Some(formula), _) => escape_csv_field(formula),
                        (None, Some(CellValue::Text(s))) => escape_csv_field(&guard_text(s)),
                        (None, Some(CellValue::Number(n))) => format_number(*n),
                        (None, Some(CellValue::Bool(b))) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
                        (None, None) => String::new(),
                    },
                    None => String::new(),
                })
                .collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

impl WorkbookLoader for CsvLoader {
    fn load(&self, path: &Path) -> Result<WorkbookContext> {
        let content = std::fs::read_to_string(path)?;
        let (id, name) = file_identity(path);
        Self::parse(&content, &id, &name)
    }
}

impl WorkbookWriter for CsvLoader {
    fn save(&self, workbook: &WorkbookContext, path: &Path) -> Result<()> {
        write_atomic(path, Self::to_csv(workbook).as_bytes())
    }
}

/// Parse a single CSV line, handling quoted fields
pub(crate) fn parse_csv_line(line: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut field_was_quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => {
                    in_quotes = true;
                    field_was_quoted = true;
                }
                ',' => {
                    if field_was_quoted {
                        fields.push(std::mem::take(&mut current));
                    } else {
                        fields.push(current.trim().to_string());
                        current.clear();
                    }
                    field_was_quoted = false;
                }
                _ => current.push(c),
            }
        }
    }
    if in_quotes {
        return Err("unterminated quoted field");
    }
    if field_was_quoted {
        fields.push(current);
    } else {
        fields.push(current.trim().to_string());
    }
    Ok(fields)
}

#[derive(Debug, PartialEq)]
pub(crate) enum CsvField {
    Formula(String),
    Value(CellValue),
}

/// Classify one non-empty field.
/// - `=...` -> formula
/// - `'` before `= + - @` -> the guarded text without the apostrophe
/// - valid number -> Number (unless it has leading zeros like "007")
/// - TRUE/FALSE -> Bool
/// - otherwise -> Text
pub(crate) fn parse_csv_field(field: &str) -> CsvField {
    // Quoted fields may keep surrounding whitespace; that is text.
    let trimmed = field.trim();
    if field != trimmed {
        return CsvField::Value(CellValue::Text(field.to_string()));
    }
    if trimmed.starts_with('=') && trimmed.len() > 1 {
        return CsvField::Formula(trimmed.to_string());
    }
    if let Some(rest) = trimmed.strip_prefix('\'')
        && rest.starts_with(['=', '+', '-', '@'])
    {
        return CsvField::Value(CellValue::Text(rest.to_string()));
    }

    if trimmed.starts_with('0')
        && trimmed.len() > 1
        && !trimmed.starts_with("0.")
        && trimmed.chars().nth(1).is_some_and(|c| c.is_ascii_digit())
    {
        return CsvField::Value(CellValue::Text(trimmed.to_string()));
    }
    if let Ok(n) = trimmed.parse::<f64>()
        && n.is_finite()
    {
        return CsvField::Value(CellValue::Number(n));
    }
    match trimmed.to_ascii_uppercase().as_str() {
        "TRUE" => CsvField::Value(CellValue::Bool(true)),
        "FALSE" => CsvField::Value(CellValue::Bool(false)),
        _ => CsvField::Value(CellValue::Text(trimmed.to_string())),
    }
}

/// Text that a spreadsheet would read as a formula gets a leading apostrophe.
fn guard_text(text: &str) -> String {
    let first_non_space = text.trim_start_matches([' ', '\t']).chars().next();
    if matches!(first_non_space, Some('=' | '+' | '-' | '@')) {
        format!("'{}", text)
    } else {
        text.to_string()
    }
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
