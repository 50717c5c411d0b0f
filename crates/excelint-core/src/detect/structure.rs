//! Structural issue detection: layout problems that break tabular analysis.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use excelint_engine::model::{
    CellRef, ErrorKind, Finding, Location, Severity, SheetContext, StructuralIssue, WorkbookContext,
    parse_range,
};

use super::ErrorDetector;
use crate::config::DetectionConfig;
use crate::error::Result;

const TABLE_SCAN_ROWS: usize = 1000;
const TABLE_SCAN_COLS: usize = 100;
const EMPTY_COLUMN_SCAN_ROWS: usize = 100;
const FORMAT_SCAN_ROWS: usize = 100;
const FORMAT_SCAN_COLS: usize = 50;

/// A rectangular block of connected non-empty cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TableRegion {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

pub struct StructureDetector {
    config: DetectionConfig,
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

impl StructureDetector {
    pub fn from_config(config: &DetectionConfig) -> Self {
        StructureDetector {
            config: config.clone(),
        }
    }

    fn detect_sheet(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        findings.extend(self.merged_cells(sheet));
        findings.extend(self.empty_rows(sheet));
        findings.extend(self.empty_columns(sheet));
        findings.extend(self.table_headers(sheet));
        findings.extend(self.hidden_data(sheet));
        findings.extend(self.inconsistent_formats(sheet));
        findings
    }

    fn merged_cells(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for range in &sheet.merged_ranges {
            let Some((start, end)) = parse_range(range) else {
                continue;
            };
            let top = start.row.min(end.row);
            let left = start.col.min(end.col);
            if !in_data_table(sheet, top, left) {
                continue;
            }
            let spans_more = start.row.abs_diff(end.row) > 1 || start.col.abs_diff(end.col) > 1;
            findings.push(
                Finding::new(
                    ErrorKind::Structural(StructuralIssue::MergedCells),
                    Location::cell(&sheet.name, CellRef::new(left, top).to_string()),
                    if spans_more { Severity::Medium } else { Severity::Low },
                    format!("Merged cells inside a data table: {}", range),
                )
                .with_value(range.clone())
                .with_suggestion("Unmerge the cells so each row and column holds one value")
                .with_confidence(1.0),
            );
        }
        findings
    }

    fn empty_rows(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        let row_count = sheet.row_count();
        let occupied: HashSet<usize> = sheet
            .cells
            .values()
            .filter(|c| !c.is_empty())
            .map(|c| c.position.row)
            .collect();

        let mut last_data_row: Option<usize> = None;
        for row in 0..row_count {
            if !occupied.contains(&row) {
                continue;
            }
            if let Some(last) = last_data_row {
                let gap = row - last - 1;
                if gap > self.config.max_empty_rows {
                    let range = format!("A{}:A{}", last + 2, row);
                    findings.push(
                        Finding::new(
                            ErrorKind::Structural(StructuralIssue::EmptyRows),
                            Location::range(&sheet.name, range.clone()),
                            Severity::Low,
                            format!("{} consecutive empty rows between data blocks", gap),
                        )
                        .with_value(range)
                        .with_fix(Some("Remove the empty rows".to_string()))
                        .with_confidence(0.9),
                    );
                }
            }
            last_data_row = Some(row);
        }
        findings
    }

    fn empty_columns(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        let scan_rows = sheet.row_count().min(EMPTY_COLUMN_SCAN_ROWS);
        let col_count = sheet.column_count();

        let mut last_data_col: Option<usize> = None;
        for col in 0..col_count {
            let empty = (0..scan_rows).all(|row| sheet.is_empty_at(row, col));
            if empty {
                continue;
            }
            if let Some(last) = last_data_col {
                let gap = col - last - 1;
                if gap > self.config.max_empty_rows {
                    let range = format!(
                        "{}1:{}1",
                        CellRef::col_to_letters(last + 1),
                        CellRef::col_to_letters(col - 1)
                    );
                    findings.push(
                        Finding::new(
                            ErrorKind::Structural(StructuralIssue::EmptyColumns),
                            Location::range(&sheet.name, range.clone()),
                            Severity::Low,
                            format!("{} consecutive empty columns between data blocks", gap),
                        )
                        .with_value(range)
                        .with_fix(Some("Remove the empty columns".to_string()))
                        .with_confidence(0.8),
                    );
                }
            }
            last_data_col = Some(col);
        }
        findings
    }

    fn table_headers(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for table in find_tables(sheet, &self.config) {
            let header_row = table.start_row;
            let headers: Vec<Option<String>> = (table.start_col..=table.end_col)
                .map(|col| sheet.value_at(header_row, col).map(|v| v.to_string()))
                .collect();

            if let Some(offset) = headers.iter().position(Option::is_none) {
                let address = CellRef::new(table.start_col + offset, header_row).to_string();
                findings.push(
                    Finding::new(
                        ErrorKind::Structural(StructuralIssue::EmptyHeader),
                        Location::cell(&sheet.name, address),
                        Severity::Medium,
                        "Table header has an empty cell",
                    )
                    .with_suggestion("Give every column a clear header")
                    .with_confidence(0.9),
                );
            }

            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for header in headers.iter().flatten() {
                *counts.entry(header.as_str()).or_default() += 1;
            }
            let duplicates: Vec<&str> = counts
                .iter()
                .filter(|(_, n)| **n > 1)
                .map(|(h, _)| *h)
                .collect();
            if !duplicates.is_empty() {
                let address = CellRef::new(table.start_col, header_row).to_string();
                findings.push(
                    Finding::new(
                        ErrorKind::Structural(StructuralIssue::DuplicateHeader),
                        Location::cell(&sheet.name, address),
                        Severity::High,
                        format!("Duplicate headers: {}", duplicates.join(", ")),
                    )
                    .with_value(duplicates.join(", "))
                    .with_suggestion("Use a unique header for each column")
                    .with_confidence(1.0),
                );
            }
        }
        findings
    }

    fn hidden_data(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        if let Some(first) = sheet.hidden_rows.first() {
            findings.push(
                Finding::new(
                    ErrorKind::Structural(StructuralIssue::HiddenRows),
                    Location::cell(&sheet.name, CellRef::new(0, *first).to_string()),
                    Severity::Medium,
                    format!("{} hidden rows", sheet.hidden_rows.len()),
                )
                .with_suggestion("Unhide or delete the hidden rows")
                .with_confidence(1.0),
            );
        }
        if let Some(first) = sheet.hidden_columns.first() {
            findings.push(
                Finding::new(
                    ErrorKind::Structural(StructuralIssue::HiddenColumns),
                    Location::cell(&sheet.name, CellRef::new(*first, 0).to_string()),
                    Severity::Medium,
                    format!("{} hidden columns", sheet.hidden_columns.len()),
                )
                .with_suggestion("Unhide or delete the hidden columns")
                .with_confidence(1.0),
            );
        }
        findings
    }

    fn inconsistent_formats(&self, sheet: &SheetContext) -> Vec<Finding> {
        let mut per_column: BTreeMap<usize, HashMap<&str, usize>> = BTreeMap::new();
        for cell in sheet.cells.values() {
            let pos = cell.position;
            if pos.row == 0 || pos.row >= FORMAT_SCAN_ROWS || pos.col >= FORMAT_SCAN_COLS {
                continue;
            }
            if cell.visible_value().is_none() {
                continue;
            }
            let format = cell.number_format.as_deref().unwrap_or("General");
            *per_column.entry(pos.col).or_default().entry(format).or_default() += 1;
        }

        let mut findings = Vec::new();
        for (col, formats) in per_column {
            if formats.len() < 2 {
                continue;
            }
            let total: usize = formats.values().sum();
            let main = formats.values().copied().max().unwrap_or(0);
            if (main as f64) / (total as f64) >= self.config.format_consistency_ratio {
                continue;
            }
            let letters = CellRef::col_to_letters(col);
            findings.push(
                Finding::new(
                    ErrorKind::Structural(StructuralIssue::InconsistentFormat),
                    Location::cell(&sheet.name, format!("{}2", letters)),
                    Severity::Low,
                    format!("Column {} mixes {} number formats", letters, formats.len()),
                )
                .with_fix(Some("Apply one number format to the whole column".to_string()))
                .with_confidence(0.8),
            );
        }
        findings
    }
}

impl ErrorDetector for StructureDetector {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn detect(&self, workbook: &WorkbookContext) -> Result<Vec<Finding>> {
        Ok(workbook
            .sheets
            .values()
            .flat_map(|sheet| self.detect_sheet(sheet))
            .collect())
    }

    fn can_detect(&self, kind: &ErrorKind) -> bool {
        matches!(kind, ErrorKind::Structural(_))
    }
}

/// A cell counts as inside a table when at least three of its eight neighbours hold data.
fn in_data_table(sheet: &SheetContext, row: usize, col: usize) -> bool {
    let here = CellRef::new(col, row);
    let mut nearby = 0;
    for dr in -1..=1 {
        for dc in -1..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }
            if let Some(n) = here.offset(dr, dc) {
                if !sheet.is_empty_at(n.row, n.col) {
                    nearby += 1;
                }
            }
        }
    }
    nearby >= 3
}

/// Flood-fill (4-connectivity) over non-empty cells, keeping regions at least
/// `min_table_height` rows by `min_table_width` columns.
pub(crate) fn find_tables(sheet: &SheetContext, config: &DetectionConfig) -> Vec<TableRegion> {
    let max_row = sheet.row_count().min(TABLE_SCAN_ROWS);
    let max_col = sheet.column_count().min(TABLE_SCAN_COLS);
    let mut visited: HashSet<(usize, usize)> = HashSet::new();
    let mut tables = Vec::new();

    for row in 0..max_row {
        for col in 0..max_col {
            if visited.contains(&(row, col)) || sheet.is_empty_at(row, col) {
                continue;
            }
            let mut region = TableRegion {
                start_row: row,
                end_row: row,
                start_col: col,
                end_col: col,
            };
            let mut queue = VecDeque::from([(row, col)]);
            visited.insert((row, col));

            while let Some((r, c)) = queue.pop_front() {
                let neighbours = [
                    (r, c + 1),
                    (r + 1, c),
                    (r, c.wrapping_sub(1)),
                    (r.wrapping_sub(1), c),
                ];
                for (nr, nc) in neighbours {
                    if nr >= max_row || nc >= max_col || visited.contains(&(nr, nc)) {
                        continue;
                    }
                    if sheet.is_empty_at(nr, nc) {
                        continue;
                    }
                    visited.insert((nr, nc));
                    queue.push_back((nr, nc));
                    region.start_row = region.start_row.min(nr);
                    region.end_row = region.end_row.max(nr);
                    region.start_col = region.start_col.min(nc);
                    region.end_col = region.end_col.max(nc);
                }
            }

            let height = region.end_row - region.start_row + 1;
            let width = region.end_col - region.start_col + 1;
            if height >= config.min_table_height && width >= config.min_table_width {
                tables.push(region);
            }
        }
    }
    tables
}
