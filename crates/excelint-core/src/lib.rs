//! excelint-core - detection, prediction, fixing and storage for spreadsheets.
//!
//! The usual flow is load -> [`IntegratedErrorDetector::detect_all_errors`]
//! -> [`IntegratedErrorFixer::fix_batch`] -> apply -> save, which
//! [`workflow::fix_file`] wraps with a backup. [`ErrorPredictor`] answers
//! "what breaks if these cells change", and the [`insights`] analyzers give
//! non-error advice over the same workbook model.

pub mod batch;
pub mod config;
pub mod detect;
pub mod error;
pub mod fix;
pub mod formula_text;
pub mod insights;
pub mod predict;
pub mod storage;
pub mod workflow;

pub use batch::{BatchJob, BatchProgress, BatchReport, BatchRunner, FileOutcome};
pub use config::AnalysisConfig;
pub use detect::{DetectionReport, DetectionSummary, ErrorDetector, IntegratedErrorDetector};
pub use error::{ExcelintError, Result};
pub use fix::{BatchFixReport, FixMode, FixResult, FixStrategy, IntegratedErrorFixer, RevalidationReport};
pub use predict::{ErrorPrediction, ErrorPredictor, PredictionSummary};
pub use workflow::{FileFixReport, FixOptions, fix_file};

pub use excelint_engine::model::{CellValue, ErrorKind, Finding, Location, Severity, WorkbookContext};
