//! Concurrent detection or fixing over many files.
//!
//! Files run on the tokio pool, at most `max_concurrent` at a time. Each
//! result is sent to an aggregator task that keeps the progress counters.
//! Cancellation is cooperative: a file that has not started when the token
//! fires is reported as cancelled, a running one finishes.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::AnalysisConfig;
use crate::detect::{DetectionSummary, IntegratedErrorDetector};
use crate::error::Result;
use crate::fix::IntegratedErrorFixer;
use crate::storage;
use crate::workflow::{FileFixReport, FixOptions, fix_file};

#[derive(Clone, Debug)]
pub enum BatchJob {
    Detect,
    Fix(FixOptions),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Detected { summary: DetectionSummary },
    Fixed { report: Box<FileFixReport> },
    Failed { error: String },
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct FileResult {
    pub file: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total_files: usize,
    pub processed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchProgress {
    pub fn is_complete(&self) -> bool {
        self.processed + self.failed + self.cancelled >= self.total_files
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub progress: BatchProgress,
    /// In input order.
    pub results: Vec<FileResult>,
}

type FileLocks = Arc<DashMap<PathBuf, Arc<Mutex<()>>>>;

pub struct BatchRunner {
    config: Arc<AnalysisConfig>,
    max_concurrent: usize,
    cancel: CancellationToken,
    locks: FileLocks,
}

impl BatchRunner {
    pub fn new(config: AnalysisConfig) -> Self {
        let max_concurrent = config.batch.max_concurrent.max(1);
        BatchRunner {
            config: Arc::new(config),
            max_concurrent,
            cancel: CancellationToken::new(),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Token that stops files from starting once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn run(&self, files: Vec<PathBuf>, job: BatchJob) -> BatchReport {
        let total_files = files.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let (tx, mut rx) = mpsc::channel::<(usize, FileResult)>(total_files.max(1));

        let aggregator = tokio::spawn(async move {
            let mut progress = BatchProgress {
                total_files,
                ..BatchProgress::default()
            };
            let mut slots: Vec<Option<FileResult>> = vec![None; total_files];
            while let Some((index, result)) = rx.recv().await {
                match &result.outcome {
                    FileOutcome::Detected { .. } | FileOutcome::Fixed { .. } => progress.processed += 1,
                    FileOutcome::Failed { .. } => progress.failed += 1,
                    FileOutcome::Cancelled => progress.cancelled += 1,
                }
                slots[index] = Some(result);
            }
            (progress, slots)
        });

        let tasks: Vec<_> = files
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.clone();
                let locks = Arc::clone(&self.locks);
                let config = Arc::clone(&self.config);
                let job = job.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let file = path.display().to_string();
                    let outcome = match semaphore.acquire_owned().await {
                        Err(_) => FileOutcome::Failed {
                            error: "worker pool closed".to_string(),
                        },
                        Ok(_permit) if cancel.is_cancelled() => FileOutcome::Cancelled,
                        Ok(_permit) => {
                            let outcome = {
                                let lock = locks.entry(path.clone()).or_default().clone();
                                let _guard = lock.lock().await;
                                run_job(path.clone(), config, job).await
                            };
                            // Keep the entry while another task for this file holds it.
                            locks.remove_if(&path, |_, lock| Arc::strong_count(lock) == 1);
                            outcome
                        }
                    };
                    if let FileOutcome::Failed { error } = &outcome {
                        error!(file = %file, error = %error, "batch file failed");
                    }
                    let _ = tx.send((index, FileResult { file, outcome })).await;
                })
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "batch task panicked");
            }
        }
        drop(tx);

        let (mut progress, slots) = match aggregator.await {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "batch aggregator failed");
                (
                    BatchProgress {
                        total_files,
                        ..BatchProgress::default()
                    },
                    vec![None; total_files],
                )
            }
        };
        // A panicked task never reports; count it as failed.
        let results = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    progress.failed += 1;
                    FileResult {
                        file: String::new(),
                        outcome: FileOutcome::Failed {
                            error: "task did not report".to_string(),
                        },
                    }
                })
            })
            .collect();
        debug!(?progress, "batch finished");
        BatchReport { progress, results }
    }
}

async fn run_job(path: PathBuf, config: Arc<AnalysisConfig>, job: BatchJob) -> FileOutcome {
    let work = tokio::task::spawn_blocking(move || -> Result<FileOutcome> {
        let detector = IntegratedErrorDetector::from_config(&config.detection);
        match job {
            BatchJob::Detect => {
                let mut workbook = storage::load_workbook(&path)?;
                let report = detector.detect_all_errors(&mut workbook);
                Ok(FileOutcome::Detected {
                    summary: report.summary,
                })
            }
            BatchJob::Fix(options) => {
                let mut fixer = IntegratedErrorFixer::new(config.fixing.clone());
                let report = fix_file(&path, &mut fixer, &detector, &options)?;
                Ok(FileOutcome::Fixed {
                    report: Box::new(report),
                })
            }
        }
    });
    match work.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => FileOutcome::Failed { error: e.to_string() },
        Err(e) => FileOutcome::Failed {
            error: format!("worker failed: {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BOOK: &str = r##"{"sheets":[{"name":"Sheet1","cells":[
        {"address":"A1","value":10},
        {"address":"B1","value":0},
        {"address":"C1","formula":"=A1/B1","value":"#DIV/0!"}
    ]}]}"##;

    fn files(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("book{}.json", i));
                std::fs::write(&path, BOOK).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_detect_many_files() {
        let dir = TempDir::new().unwrap();
        let mut paths = files(&dir, 3);
        paths.push(dir.path().join("missing.json"));

        let mut config = AnalysisConfig::default();
        config.batch.max_concurrent = 2;
        let report = BatchRunner::new(config).run(paths, BatchJob::Detect).await;

        assert_eq!(report.progress.total_files, 4);
        assert_eq!(report.progress.processed, 3);
        assert_eq!(report.progress.failed, 1);
        assert!(report.progress.is_complete());
        assert!(matches!(
            &report.results[0].outcome,
            FileOutcome::Detected { summary } if summary.total_errors == 1
        ));
        assert!(report.results[3].file.ends_with("missing.json"));
        assert!(matches!(report.results[3].outcome, FileOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let runner = BatchRunner::new(AnalysisConfig::default());
        runner.cancellation_token().cancel();
        let report = runner.run(files(&dir, 2), BatchJob::Detect).await;
        assert_eq!(report.progress.cancelled, 2);
        assert_eq!(report.progress.processed, 0);
        assert!(report.results.iter().all(|r| matches!(r.outcome, FileOutcome::Cancelled)));
    }

    #[tokio::test]
    async fn test_same_file_twice_is_serialised() {
        let dir = TempDir::new().unwrap();
        let path = files(&dir, 1).remove(0);
        let options = FixOptions {
            create_backup: false,
            ..FixOptions::default()
        };
        let runner = BatchRunner::new(AnalysisConfig::default());
        let report = runner
            .run(vec![path.clone(), path.clone()], BatchJob::Fix(options))
            .await;
        assert_eq!(report.progress.processed, 2);

        let applied: usize = report
            .results
            .iter()
            .map(|r| match &r.outcome {
                FileOutcome::Fixed { report } => report.applied,
                _ => 0,
            })
            .sum();
        assert_eq!(applied, 1);
        assert!(runner.locks.is_empty());
        let saved = storage::load_workbook(&path).unwrap();
        assert_eq!(
            saved.get_cell("Sheet1", "C1").unwrap().formula.as_deref(),
            Some("=IFERROR(A1/B1, 0)")
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = BatchRunner::new(AnalysisConfig::default())
            .run(Vec::new(), BatchJob::Detect)
            .await;
        assert_eq!(report.progress, BatchProgress::default());
        assert!(report.results.is_empty());
    }
}
