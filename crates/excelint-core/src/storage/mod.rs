//! Workbook loading and saving.
//!
//! Two on-disk forms are supported: a JSON workbook document that carries
//! everything the model knows (formulas, cached values, sheet layout, VBA
//! modules), and plain CSV imported as a single sheet.

mod csv;
mod json;

pub use csv::{CSV_SHEET, CsvLoader};
pub use json::JsonWorkbookStore;

use std::path::Path;

use excelint_engine::model::{VbaModule, WorkbookContext};

use crate::error::{ExcelintError, Result};

/// Reads a file into a workbook with its dependency graph built.
pub trait WorkbookLoader {
    fn load(&self, path: &Path) -> Result<WorkbookContext>;
}

/// Persists a workbook. Applying fixes in memory and saving are separate steps.
pub trait WorkbookWriter {
    fn save(&self, workbook: &WorkbookContext, path: &Path) -> Result<()>;
}

/// Reads the VBA modules of a file, in file order.
pub trait VbaExtractor {
    fn extract_modules(&self, path: &Path) -> Result<Vec<VbaModule>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Csv,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<FileFormat> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(FileFormat::Json),
            "csv" => Ok(FileFormat::Csv),
            _ => Err(ExcelintError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

pub fn load_workbook(path: &Path) -> Result<WorkbookContext> {
    match FileFormat::from_path(path)? {
        FileFormat::Json => JsonWorkbookStore.load(path),
        FileFormat::Csv => CsvLoader.load(path),
    }
}

pub fn save_workbook(workbook: &WorkbookContext, path: &Path) -> Result<()> {
    match FileFormat::from_path(path)? {
        FileFormat::Json => JsonWorkbookStore.save(workbook, path),
        FileFormat::Csv => CsvLoader.save(workbook, path),
    }
}

/// VBA modules of a file. CSV carries none.
pub fn extract_vba_modules(path: &Path) -> Result<Vec<VbaModule>> {
    match FileFormat::from_path(path)? {
        FileFormat::Json => JsonWorkbookStore.extract_modules(path),
        FileFormat::Csv => Ok(Vec::new()),
    }
}

/// `(file_id, file_name)` for a path: the stem and the full file name.
pub(crate) fn file_identity(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.clone());
    (id, name)
}

/// Write `contents` next to `path` first, then move it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use excelint_engine::model::CellValue;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("a/b.JSON")).unwrap(), FileFormat::Json);
        assert_eq!(FileFormat::from_path(Path::new("b.csv")).unwrap(), FileFormat::Csv);
        assert!(matches!(
            FileFormat::from_path(Path::new("b.xlsx")),
            Err(ExcelintError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_file_identity() {
        assert_eq!(
            file_identity(Path::new("/tmp/sales.json")),
            ("sales".to_string(), "sales.json".to_string())
        );
    }

    #[test]
    fn test_save_and_load_dispatch_on_extension() {
        let dir = TempDir::new().unwrap();
        let mut wb = WorkbookContext::new("book", "book.json");
        let sheet = wb.sheet_mut("Sheet1");
        sheet.set_value("A1", CellValue::Number(2.0));
        sheet.set_formula("B1", "=A1*2");

        for name in ["book.json", "book.csv"] {
            let path = dir.path().join(name);
            save_workbook(&wb, &path).unwrap();
            let loaded = load_workbook(&path).unwrap();
            assert_eq!(loaded.file_name, name);
            let b1 = loaded.get_cell("Sheet1", "B1").unwrap();
            assert_eq!(b1.formula.as_deref(), Some("=A1*2"));
            assert!(b1.dependencies.contains("Sheet1!A1"));
            assert!(!dir.path().join(format!("{}.tmp", name)).exists());
        }
    }

    #[test]
    fn test_csv_has_no_vba() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.csv");
        std::fs::write(&path, "a,b\n").unwrap();
        assert!(extract_vba_modules(&path).unwrap().is_empty());
    }
}
