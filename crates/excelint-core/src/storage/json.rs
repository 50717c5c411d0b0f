//! JSON workbook documents.
//!
//! ```json
//! {
//!   "sheets": [
//!     {
//!       "name": "Sheet1",
//!       "cells": [
//!         { "address": "A1", "value": 10 },
//!         { "address": "C1", "formula": "=A1/B1", "value": "#DIV/0!" }
//!       ],
//!       "hidden_rows": [4],
//!       "merged_ranges": ["A1:B1"]
//!     }
//!   ],
//!   "vba_modules": [{ "name": "Module1", "code": "Sub A()\nEnd Sub\n" }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use excelint_engine::model::{CellValue, SheetContext, VbaModule, WorkbookContext};
use serde::{Deserialize, Serialize};

use super::{VbaExtractor, WorkbookLoader, WorkbookWriter, file_identity, write_atomic};
use crate::error::{ExcelintError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkbookDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sheets: Vec<SheetDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vba_modules: Vec<VbaModule>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SheetDocument {
    name: String,
    #[serde(default)]
    cells: Vec<CellDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hidden_rows: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hidden_columns: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    merged_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    named_ranges: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CellDocument {
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    number_format: Option<String>,
}

/// Reads and writes the JSON workbook document.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonWorkbookStore;

impl JsonWorkbookStore {
    /// Build a workbook from document text. `file_id`/`file_name` label it.
    pub fn parse(content: &str, file_id: &str, file_name: &str) -> Result<WorkbookContext> {
        let doc: WorkbookDocument = serde_json::from_str(content)?;
        let mut workbook = WorkbookContext::new(file_id, file_name);

        for sheet_doc in doc.sheets {
            let mut sheet = SheetContext::new(sheet_doc.name.clone());
            for cell_doc in sheet_doc.cells {
                let Some(cell) = sheet.cell_entry(&cell_doc.address) else {
                    return Err(ExcelintError::InvalidReference(format!(
                        "{}!{}",
                        sheet_doc.name, cell_doc.address
                    )));
                };
                cell.value = cell_doc.value;
                cell.formula = cell_doc.formula.filter(|f| !f.trim().is_empty());
                cell.number_format = cell_doc.number_format;
            }
            sheet.hidden_rows = sheet_doc.hidden_rows.into_iter().collect();
            sheet.hidden_columns = sheet_doc.hidden_columns.into_iter().collect();
            sheet.merged_ranges = sheet_doc.merged_ranges;
            sheet.named_ranges = sheet_doc.named_ranges;
            workbook.add_sheet(sheet);
        }
        workbook.vba_modules = doc.vba_modules;
        workbook.rebuild_dependencies();
        Ok(workbook)
    }

    /// Serialise a workbook. Cells are written in row-major order so the
    /// output is stable across runs.
    pub fn to_json(workbook: &WorkbookContext) -> Result<String> {
        let sheets = workbook
            .sheets
            .values()
            .map(|sheet| SheetDocument {
                name: sheet.name.clone(),
                cells: sheet
                    .cells_row_major()
                    .into_iter()
                    .filter(|c| !c.is_empty() || c.number_format.is_some())
                    .map(|c| CellDocument {
                        address: c.address.clone(),
                        value: c.value.clone(),
                        formula: c.formula.clone(),
                        number_format: c.number_format.clone(),
                    })
                    .collect(),
                hidden_rows: sheet.hidden_rows.iter().copied().collect(),
                hidden_columns: sheet.hidden_columns.iter().copied().collect(),
                merged_ranges: sheet.merged_ranges.clone(),
                named_ranges: sheet.named_ranges.clone(),
            })
            .collect();
        let doc = WorkbookDocument {
            sheets,
            vba_modules: workbook.vba_modules.clone(),
        };
        let mut out = serde_json::to_string_pretty(&doc)?;
        out.push('\n');
        Ok(out)
    }
}

impl WorkbookLoader for JsonWorkbookStore {
    fn load(&self, path: &Path) -> Result<WorkbookContext> {
        let content = std::fs::read_to_string(path)?;
        let (id, name) = file_identity(path);
        Self::parse(&content, &id, &name)
    }
}

impl WorkbookWriter for JsonWorkbookStore {
    fn save(&self, workbook: &WorkbookContext, path: &Path) -> Result<()> {
        let content = Self::to_json(workbook)?;
        write_atomic(path, content.as_bytes())
    }
}

impl VbaExtractor for JsonWorkbookStore {
    fn extract_modules(&self, path: &Path) -> Result<Vec<VbaModule>> {
        let content = std::fs::read_to_string(path)?;
        let doc: WorkbookDocument = serde_json::from_str(&content)?;
        Ok(doc.vba_modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r##"{
        "sheets": [
            {
                "name": "Data",
                "cells": [
                    { "address": "A1", "value": 10 },
                    { "address": "$B$1", "value": 0 },
                    { "address": "C1", "formula": "=A1/B1", "value": "#DIV/0!" },
                    { "address": "D1", "value": "12%", "number_format": "0%" },
                    { "address": "E1", "value": true }
                ],
                "hidden_rows": [3, 1],
                "merged_ranges": ["A5:B6"],
                "named_ranges": { "Rate": "Data!D1" }
            }
        ],
        "vba_modules": [
            { "name": "Module1", "module_type": "standard", "code": "Sub A()\nEnd Sub\n" }
        ]
    }"##;

    #[test]
    fn test_parse_document() {
        let wb = JsonWorkbookStore::parse(SAMPLE, "f1", "book.json").unwrap();
        let sheet = wb.get_sheet("Data").unwrap();
        assert_eq!(sheet.cells.len(), 5);
        assert_eq!(sheet.get_cell("B1").unwrap().value, Some(CellValue::Number(0.0)));
        assert_eq!(sheet.get_cell("E1").unwrap().value, Some(CellValue::Bool(true)));
        assert_eq!(sheet.get_cell("D1").unwrap().number_format.as_deref(), Some("0%"));
        assert_eq!(sheet.hidden_rows.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(sheet.named_ranges.get("Rate").map(String::as_str), Some("Data!D1"));
        assert_eq!(wb.vba_modules[0].size(), 16);
        assert_eq!(
            wb.get_dependent_cells("Data", "B1"),
            vec!["Data!C1".to_string()]
        );
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let doc = r#"{"sheets":[{"name":"S","cells":[{"address":"1A","value":1}]}]}"#;
        assert!(matches!(
            JsonWorkbookStore::parse(doc, "f", "f.json"),
            Err(ExcelintError::InvalidReference(ref r)) if r == "S!1A"
        ));
    }

    #[test]
    fn test_malformed_json_is_a_json_error() {
        assert!(matches!(
            JsonWorkbookStore::parse("{ not json", "f", "f.json"),
            Err(ExcelintError::Json(_))
        ));
    }

    #[test]
    fn test_output_is_stable() {
        let wb = JsonWorkbookStore::parse(SAMPLE, "f1", "book.json").unwrap();
        let first = JsonWorkbookStore::to_json(&wb).unwrap();
        let reparsed = JsonWorkbookStore::parse(&first, "f1", "book.json").unwrap();
        assert_eq!(JsonWorkbookStore::to_json(&reparsed).unwrap(), first);
        assert!(first.find("\"A1\"").unwrap() < first.find("\"C1\"").unwrap());
    }

    #[test]
    fn test_extract_modules_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let modules = JsonWorkbookStore.extract_modules(&path).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "Module1");

        let wb = JsonWorkbookStore.load(&path).unwrap();
        assert_eq!(wb.file_id, "book");
    }
}
