//! Fixing a workbook file end to end, with a backup to roll back to.

use std::path::{Path, PathBuf};

use excelint_engine::model::{Finding, WorkbookContext};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detect::IntegratedErrorDetector;
use crate::error::Result;
use crate::fix::{BatchFixReport, FixMode, IntegratedErrorFixer};
use crate::storage::{self, WorkbookWriter};

#[derive(Clone, Debug)]
pub struct FixOptions {
    pub mode: FixMode,
    /// Write the fixed workbook back to its file.
    pub auto_save: bool,
    pub create_backup: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        FixOptions {
            mode: FixMode::Safe,
            auto_save: true,
            create_backup: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FileFixReport {
    pub file: String,
    pub total_errors_before: usize,
    pub remaining_errors: usize,
    pub applied: usize,
    pub saved: bool,
    /// Backup left on disk, if any.
    pub backup: Option<PathBuf>,
    pub batch: BatchFixReport,
    pub remaining: Vec<Finding>,
}

/// `{path}.backup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".backup");
    PathBuf::from(backup)
}

/// Copy the backup over `path`.
pub fn restore_backup(path: &Path) -> Result<()> {
    std::fs::copy(backup_path(path), path)?;
    Ok(())
}

/// Writes through the format-specific store chosen by extension.
struct ExtensionWriter;

impl WorkbookWriter for ExtensionWriter {
    fn save(&self, workbook: &WorkbookContext, path: &Path) -> Result<()> {
        storage::save_workbook(workbook, path)
    }
}

/// Load, detect, fix, apply, optionally save, then revalidate one file.
pub fn fix_file(
    path: &Path,
    fixer: &mut IntegratedErrorFixer,
    detector: &IntegratedErrorDetector,
    options: &FixOptions,
) -> Result<FileFixReport> {
    fix_file_with(path, fixer, detector, options, &ExtensionWriter)
}

/// [`fix_file`] with an explicit writer.
///
/// When applying or saving fails the file is restored from its backup and
/// the error is returned. The backup is removed only after at least one fix
/// succeeded.
pub fn fix_file_with(
    path: &Path,
    fixer: &mut IntegratedErrorFixer,
    detector: &IntegratedErrorDetector,
    options: &FixOptions,
    writer: &dyn WorkbookWriter,
) -> Result<FileFixReport> {
    let backup = if options.create_backup {
        let backup = backup_path(path);
        std::fs::copy(path, &backup)?;
        debug!(backup = %backup.display(), "backup created");
        Some(backup)
    } else {
        None
    };

    let mut workbook = storage::load_workbook(path)?;
    let before = detector.detect_all_errors(&mut workbook);
    let candidates: Vec<Finding> = before
        .errors
        .iter()
        .filter(|f| f.is_auto_fixable && fixer.has_strategy_for(f))
        .cloned()
        .collect();
    let mut batch = fixer.fix_batch(&candidates, &options.mode, Some(&workbook));

    let applied = match commit(fixer, &mut workbook, &mut batch, options, writer, path) {
        Ok(applied) => applied,
        Err(e) => {
            if backup.is_some() {
                warn!(file = %path.display(), error = %e, "fix failed, restoring backup");
                if let Err(restore) = restore_backup(path) {
                    warn!(file = %path.display(), error = %restore, "backup restore failed");
                }
            }
            return Err(e);
        }
    };
    let saved = options.auto_save && applied > 0;

    let after = if saved {
        let mut reloaded = storage::load_workbook(path)?;
        detector.detect_all_errors(&mut reloaded)
    } else {
        detector.detect_all_errors(&mut workbook)
    };

    let backup = match backup {
        Some(backup) if batch.success > 0 => {
            std::fs::remove_file(&backup)?;
            None
        }
        other => other,
    };

    info!(
        file = %path.display(),
        before = before.summary.total_errors,
        after = after.summary.total_errors,
        applied,
        "file fixed"
    );
    Ok(FileFixReport {
        file: path.display().to_string(),
        total_errors_before: before.summary.total_errors,
        remaining_errors: after.summary.total_errors,
        applied,
        saved,
        backup,
        batch,
        remaining: after.errors,
    })
}

/// Apply the successful fixes and save. Returns how many were applied.
fn commit(
    fixer: &IntegratedErrorFixer,
    workbook: &mut WorkbookContext,
    batch: &mut BatchFixReport,
    options: &FixOptions,
    writer: &dyn WorkbookWriter,
    path: &Path,
) -> Result<usize> {
    let mut applied = 0;
    for result in batch.results.iter_mut().filter(|r| r.success) {
        fixer.apply_fix_to_workbook(workbook, result)?;
        applied += 1;
    }
    if options.auto_save && applied > 0 {
        writer.save(workbook, path)?;
    }
    Ok(applied)
}
