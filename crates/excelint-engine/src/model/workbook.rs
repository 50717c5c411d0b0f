//! In-memory workbook model and dependency graph.
//!
//! A [`WorkbookContext`] owns its sheets, a sheet owns its cells. Each cell
//! records the qualified keys (`Sheet!A1`) it reads from; the reverse edges
//! are derived by [`WorkbookContext::rebuild_dependencies`] and are lookup
//! only. References to cells that do not exist stay in `dependencies` so the
//! predictor can flag them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cell_ref::{CellRef, QualifiedRef, split_qualified};
use super::deps::extract_dependencies;
use super::finding::Finding;
use super::value::CellValue;

#[derive(Clone, Debug, PartialEq)]
pub struct CellInfo {
    pub address: String,
    pub sheet: String,
    pub position: CellRef,
    pub value: Option<CellValue>,
    pub formula: Option<String>,
    pub number_format: Option<String>,
    pub dependencies: BTreeSet<String>,
    pub dependents: BTreeSet<String>,
    pub errors: Vec<Finding>,
}

impl CellInfo {
    pub fn new(sheet: impl Into<String>, position: CellRef) -> Self {
        CellInfo {
            address: position.to_string(),
            sheet: sheet.into(),
            position,
            value: None,
            formula: None,
            number_format: None,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}!{}", self.sheet, self.address)
    }

    /// No formula and no visible value.
    pub fn is_empty(&self) -> bool {
        self.formula.is_none() && self.value.as_ref().is_none_or(CellValue::is_blank)
    }

    /// Cached value when present and not blank.
    pub fn visible_value(&self) -> Option<&CellValue> {
        self.value.as_ref().filter(|v| !v.is_blank())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SheetContext {
    pub name: String,
    /// Keyed by canonical address ("A1").
    pub cells: HashMap<String, CellInfo>,
    /// Zero-indexed.
    pub hidden_rows: BTreeSet<usize>,
    /// Zero-indexed.
    pub hidden_columns: BTreeSet<usize>,
    /// Merged regions as "A1:B2".
    pub merged_ranges: Vec<String>,
    pub named_ranges: BTreeMap<String, String>,
}

impl SheetContext {
    pub fn new(name: impl Into<String>) -> Self {
        SheetContext {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Insert or fetch the cell at `address`. None if the address is not a valid reference.
    pub fn cell_entry(&mut self, address: &str) -> Option<&mut CellInfo> {
        let position = CellRef::parse(address)?;
        let name = self.name.clone();
        Some(
            self.cells
                .entry(position.to_string())
                .or_insert_with(|| CellInfo::new(name, position)),
        )
    }

    pub fn set_value(&mut self, address: &str, value: CellValue) -> Option<&mut CellInfo> {
        let cell = self.cell_entry(address)?;
        cell.value = Some(value);
        Some(cell)
    }

    pub fn set_formula(&mut self, address: &str, formula: impl Into<String>) -> Option<&mut CellInfo> {
        let cell = self.cell_entry(address)?;
        cell.formula = Some(formula.into());
        Some(cell)
    }

    pub fn get_cell(&self, address: &str) -> Option<&CellInfo> {
        let position = CellRef::parse(address)?;
        self.cells.get(&position.to_string())
    }

    pub fn get_cell_mut(&mut self, address: &str) -> Option<&mut CellInfo> {
        let position = CellRef::parse(address)?;
        self.cells.get_mut(&position.to_string())
    }

    pub fn cell_at(&self, row: usize, col: usize) -> Option<&CellInfo> {
        self.cells.get(&CellRef::new(col, row).to_string())
    }

    /// Visible value at a position, skipping blanks.
    pub fn value_at(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.cell_at(row, col).and_then(CellInfo::visible_value)
    }

    pub fn is_empty_at(&self, row: usize, col: usize) -> bool {
        self.cell_at(row, col).is_none_or(CellInfo::is_empty)
    }

    /// All cells in row-major order.
    pub fn cells_row_major(&self) -> Vec<&CellInfo> {
        let mut cells: Vec<&CellInfo> = self.cells.values().collect();
        cells.sort_by_key(|c| c.position);
        cells
    }

    /// One past the last used row, 0 for an empty sheet.
    pub fn row_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| !c.is_empty())
            .map(|c| c.position.row + 1)
            .max()
            .unwrap_or(0)
    }

    /// One past the last used column, 0 for an empty sheet.
    pub fn column_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| !c.is_empty())
            .map(|c| c.position.col + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn formula_count(&self) -> usize {
        self.cells.values().filter(|c| c.formula.is_some()).count()
    }
}

/// A VBA module as handed over by the extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbaModule {
    pub name: String,
    #[serde(default = "default_module_type")]
    pub module_type: String,
    pub code: String,
}

fn default_module_type() -> String {
    "standard".to_string()
}

impl VbaModule {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        VbaModule {
            name: name.into(),
            module_type: default_module_type(),
            code: code.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.code.len()
    }
}

/// Totals reported by [`WorkbookContext::summary`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkbookSummary {
    pub file_id: String,
    pub file_name: String,
    pub sheets: usize,
    pub total_cells: usize,
    pub total_formulas: usize,
    pub total_errors: usize,
    pub vba_modules: usize,
}

#[derive(Clone, Debug)]
pub struct WorkbookContext {
    pub file_id: String,
    pub file_name: String,
    pub sheets: BTreeMap<String, SheetContext>,
    pub vba_modules: Vec<VbaModule>,
    pub global_errors: Vec<Finding>,
    pub analysis_summary: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reverse edges keyed by the referenced cell, including cells that do not exist.
    dependents_index: HashMap<String, BTreeSet<String>>,
}

impl WorkbookContext {
    pub fn new(file_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        WorkbookContext {
            file_id: file_id.into(),
            file_name: file_name.into(),
            sheets: BTreeMap::new(),
            vba_modules: Vec::new(),
            global_errors: Vec::new(),
            analysis_summary: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            dependents_index: HashMap::new(),
        }
    }

    /// Fetch a sheet, creating it when missing.
    pub fn sheet_mut(&mut self, name: &str) -> &mut SheetContext {
        self.sheets
            .entry(name.to_string())
            .or_insert_with(|| SheetContext::new(name))
    }

    pub fn add_sheet(&mut self, sheet: SheetContext) {
        self.sheets.insert(sheet.name.clone(), sheet);
    }

    pub fn get_sheet(&self, name: &str) -> Option<&SheetContext> {
        self.sheets.get(name)
    }

    pub fn get_cell(&self, sheet: &str, address: &str) -> Option<&CellInfo> {
        self.sheets.get(sheet)?.get_cell(address)
    }

    pub fn get_cell_mut(&mut self, sheet: &str, address: &str) -> Option<&mut CellInfo> {
        self.sheets.get_mut(sheet)?.get_cell_mut(address)
    }

    /// Look up `Sheet!A1` (or bare `A1` against `default_sheet`).
    pub fn resolve(&self, reference: &str, default_sheet: &str) -> Option<&CellInfo> {
        let (sheet, address) = split_qualified(reference);
        self.get_cell(sheet.unwrap_or(default_sheet), address)
    }

    /// Direct dependents of a cell as `Sheet!A1` keys. Works for cells that do not exist yet.
    pub fn get_dependent_cells(&self, sheet: &str, address: &str) -> Vec<String> {
        let Some(position) = CellRef::parse(address) else {
            return Vec::new();
        };
        let key = QualifiedRef::new(sheet, position).key();
        self.dependents_index
            .get(&key)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All cells across all sheets, sheet by sheet in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &CellInfo> {
        self.sheets.values().flat_map(|s| s.cells_row_major())
    }

    /// Re-derive every cell's `dependencies` from its formula, then the reverse edges.
    pub fn rebuild_dependencies(&mut self) {
        for sheet in self.sheets.values_mut() {
            let sheet_name = sheet.name.clone();
            for cell in sheet.cells.values_mut() {
                cell.dependencies = match &cell.formula {
                    Some(formula) => extract_dependencies(formula, &sheet_name)
                        .iter()
                        .map(QualifiedRef::key)
                        .collect(),
                    None => BTreeSet::new(),
                };
            }
        }
        self.rebuild_dependents();
    }

    /// Rebuild reverse edges from the forward `dependencies` sets.
    pub fn rebuild_dependents(&mut self) {
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
        for cell in self.sheets.values().flat_map(|s| s.cells.values()) {
            let key = cell.key();
            for dep in &cell.dependencies {
                index.entry(dep.clone()).or_default().insert(key.clone());
            }
        }

        for sheet in self.sheets.values_mut() {
            for cell in sheet.cells.values_mut() {
                cell.dependents = index.get(&cell.key()).cloned().unwrap_or_default();
            }
        }
        self.dependents_index = index;
    }

    /// Replace a cell's formula and refresh the graph. Returns false for an unknown sheet or bad address.
    pub fn set_formula(&mut self, sheet: &str, address: &str, formula: impl Into<String>) -> bool {
        let updated = self
            .sheets
            .get_mut(sheet)
            .and_then(|s| s.set_formula(address, formula))
            .is_some();
        if updated {
            self.rebuild_dependencies();
            self.touch();
        }
        updated
    }

    pub fn set_value(&mut self, sheet: &str, address: &str, value: CellValue) -> bool {
        let updated = self
            .sheets
            .get_mut(sheet)
            .and_then(|s| s.set_value(address, value))
            .is_some();
        if updated {
            self.touch();
        }
        updated
    }

    pub fn vba_module(&self, name: &str) -> Option<&VbaModule> {
        self.vba_modules.iter().find(|m| m.name == name)
    }

    /// Replace a module's code. Returns false when the module does not exist.
    pub fn set_vba_code(&mut self, name: &str, code: impl Into<String>) -> bool {
        match self.vba_modules.iter_mut().find(|m| m.name == name) {
            Some(module) => {
                module.code = code.into();
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Drop per-cell and global findings from a previous pass.
    pub fn clear_errors(&mut self) {
        self.global_errors.clear();
        for cell in self.sheets.values_mut().flat_map(|s| s.cells.values_mut()) {
            cell.errors.clear();
        }
    }

    /// Replace previous findings with `findings`: cell findings attach to their
    /// cell, everything else (VBA, workbook level, unknown cells) goes global.
    pub fn attach_findings(&mut self, findings: &[Finding]) {
        self.clear_errors();
        for finding in findings {
            let target = finding
                .cell()
                .and_then(|(sheet, address)| {
                    self.sheets.get_mut(sheet).and_then(|s| s.get_cell_mut(address))
                });
            match target {
                Some(cell) => cell.errors.push(finding.clone()),
                None => self.global_errors.push(finding.clone()),
            }
        }
        self.touch();
    }

    pub fn total_cells(&self) -> usize {
        self.sheets
            .values()
            .map(|s| s.cells.values().filter(|c| !c.is_empty()).count())
            .sum()
    }

    pub fn total_formulas(&self) -> usize {
        self.sheets.values().map(SheetContext::formula_count).sum()
    }

    pub fn total_errors(&self) -> usize {
        let cell_errors: usize = self
            .sheets
            .values()
            .flat_map(|s| s.cells.values())
            .map(|c| c.errors.len())
            .sum();
        cell_errors + self.global_errors.len()
    }

    pub fn summary(&self) -> WorkbookSummary {
        WorkbookSummary {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            sheets: self.sheets.len(),
            total_cells: self.total_cells(),
            total_formulas: self.total_formulas(),
            total_errors: self.total_errors(),
            vba_modules: self.vba_modules.len(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
