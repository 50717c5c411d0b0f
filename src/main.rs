//! excelint - spreadsheet error detection, prediction and automated fixing

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use excelint_core::batch::FileOutcome;
use excelint_core::insights::OptimizationAdvisor;
use excelint_core::storage;
use excelint_core::{
    AnalysisConfig, BatchJob, BatchRunner, ErrorPredictor, ExcelintError, FixMode, FixOptions,
    IntegratedErrorDetector, IntegratedErrorFixer, fix_file,
};
use excelint_engine::model::Finding;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    eprintln!("Usage: excelint [OPTIONS] <COMMAND> [ARGS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  detect <FILE>                     Report every error found in a workbook");
    eprintln!("  predict <FILE> --changed <CELL>   Predict errors caused by changing cells (repeatable)");
    eprintln!("  fix <FILE>                        Fix errors in place, keeping a backup");
    eprintln!("      --mode <safe|aggressive>      Confidence threshold to apply (default: safe)");
    eprintln!("      --only <KIND>                 Only fix these kinds, e.g. div_zero (repeatable)");
    eprintln!("      --no-save                     Report fixes without writing the file");
    eprintln!("  optimize <FILE>                   Suggest formula and structure improvements");
    eprintln!("  batch <FILE>...                   Detect errors in many files concurrently");
    eprintln!();
    eprintln!("Files ending in .json or .csv are supported.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <FILE>                   Load settings from a TOML file");
    eprintln!("  --json                            Print results as JSON");
    eprintln!("  -v, --verbose                     Debug logging on stderr");
    eprintln!("  -h, --help                        Print help");
}

#[derive(Debug, PartialEq)]
enum Command {
    Detect(PathBuf),
    Predict { file: PathBuf, changed: Vec<String> },
    Fix { file: PathBuf, mode: FixMode, save: bool },
    Optimize(PathBuf),
    Batch(Vec<PathBuf>),
}

#[derive(Debug, PartialEq)]
struct Cli {
    command: Command,
    config: Option<PathBuf>,
    json: bool,
    verbose: bool,
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a String> {
    args.get(i + 1).with_context(|| format!("{} requires a value", flag))
}

/// `Ok(None)` means help was requested.
fn parse_args(args: &[String]) -> Result<Option<Cli>> {
    let mut command_name: Option<String> = None;
    let mut files: Vec<PathBuf> = Vec::new();
    let mut changed: Vec<String> = Vec::new();
    let mut mode: Option<String> = None;
    let mut only: Vec<String> = Vec::new();
    let mut save = true;
    let mut config: Option<PathBuf> = None;
    let mut json = false;
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(None),
            "-v" | "--verbose" => verbose = true,
            "--json" => json = true,
            "--no-save" => save = false,
            "--config" => {
                config = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 1;
            }
            "--changed" => {
                changed.push(flag_value(args, i, "--changed")?.clone());
                i += 1;
            }
            "--mode" => {
                mode = Some(flag_value(args, i, "--mode")?.clone());
                i += 1;
            }
            "--only" => {
                only.push(flag_value(args, i, "--only")?.clone());
                i += 1;
            }
            arg if arg.starts_with('-') => bail!("Unknown option: {}", arg),
            arg => {
                if command_name.is_none() {
                    command_name = Some(arg.to_string());
                } else {
                    files.push(PathBuf::from(arg));
                }
            }
        }
        i += 1;
    }

    let Some(name) = command_name else {
        bail!("Missing command");
    };
    let single = |files: &mut Vec<PathBuf>| -> Result<PathBuf> {
        match files.len() {
            0 => bail!("{} requires a file", name),
            1 => Ok(files.remove(0)),
            _ => bail!("Unexpected argument: {}", files[1].display()),
        }
    };

    let command = match name.as_str() {
        "detect" => Command::Detect(single(&mut files)?),
        "predict" => {
            if changed.is_empty() {
                bail!("predict requires at least one --changed cell");
            }
            Command::Predict {
                file: single(&mut files)?,
                changed,
            }
        }
        "fix" => {
            let mode = match (mode, only.is_empty()) {
                (Some(_), false) => bail!("--mode and --only cannot be combined"),
                (None, false) => only.join(",").parse::<FixMode>().map_err(anyhow::Error::msg)?,
                (Some(m), true) if m == "safe" || m == "aggressive" => {
                    m.parse::<FixMode>().map_err(anyhow::Error::msg)?
                }
                (Some(m), true) => bail!("Unknown fix mode: {}", m),
                (None, true) => FixMode::Safe,
            };
            Command::Fix {
                file: single(&mut files)?,
                mode,
                save,
            }
        }
        "optimize" => Command::Optimize(single(&mut files)?),
        "batch" => {
            if files.is_empty() {
                bail!("batch requires at least one file");
            }
            Command::Batch(files)
        }
        other => bail!("Unknown command: {}", other),
    };

    Ok(Some(Cli {
        command,
        config,
        json,
        verbose,
    }))
}

fn default_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "excelint")?;
    Some(proj.config_dir().join("config.toml"))
}

fn load_config(explicit: Option<&Path>) -> Result<AnalysisConfig> {
    if let Some(path) = explicit {
        return AnalysisConfig::load(path).with_context(|| format!("reading {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.is_file() => {
            debug!(path = %path.display(), "loading config");
            AnalysisConfig::load(&path).with_context(|| format!("reading {}", path.display()))
        }
        _ => Ok(AnalysisConfig::default()),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_finding(finding: &Finding) {
    println!(
        "  [{}] {} {}: {}",
        finding.severity, finding.location, finding.kind, finding.message
    );
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let detector = IntegratedErrorDetector::from_config(&config.detection);

    match cli.command {
        Command::Detect(file) => {
            let mut workbook = storage::load_workbook(&file)?;
            let report = detector.detect_all_errors(&mut workbook);
            if cli.json {
                return print_json(&report);
            }
            println!("{}: {} error(s)", file.display(), report.summary.total_errors);
            for finding in &report.errors {
                print_finding(finding);
            }
            if let Some(common) = &report.summary.most_common_error_type {
                println!(
                    "Most common: {}, auto-fixable: {}%",
                    common, report.summary.auto_fixable_percentage
                );
            }
        }
        Command::Predict { file, changed } => {
            let mut workbook = storage::load_workbook(&file)?;
            // Existing findings feed the dependency heuristics.
            detector.detect_all_errors(&mut workbook);
            let mut predictor = ErrorPredictor::new(&config.prediction, &config.detection);
            let predictions = predictor.predict_errors(&workbook, &changed);
            if cli.json {
                return print_json(&predictor.prediction_summary(&workbook.file_id));
            }
            println!("{}: {} prediction(s)", file.display(), predictions.len());
            for p in &predictions {
                println!(
                    "  [{:?}] {} {:.0}%: {}",
                    p.risk_level,
                    p.key(),
                    p.probability * 100.0,
                    p.description
                );
            }
        }
        Command::Fix { file, mode, save } => {
            let options = FixOptions {
                mode,
                auto_save: save,
                create_backup: config.fixing.create_backup,
            };
            let mut fixer = IntegratedErrorFixer::new(config.fixing.clone());
            let report = fix_file(&file, &mut fixer, &detector, &options)?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "{}: {} error(s), {} fixed, {} remaining",
                file.display(),
                report.total_errors_before,
                report.applied,
                report.remaining_errors
            );
            for result in &report.batch.results {
                let status = if result.success {
                    "fixed"
                } else if result.skipped {
                    "skipped"
                } else {
                    "failed"
                };
                println!("  [{}] {} {}: {}", status, result.location, result.kind, result.message);
            }
            if !report.saved {
                println!("File not modified");
            }
        }
        Command::Optimize(file) => {
            let workbook = storage::load_workbook(&file)?;
            let mut advisor = OptimizationAdvisor::new();
            let suggestions = advisor.analyze(&workbook);
            if cli.json {
                return print_json(&advisor.summary(&workbook.file_id));
            }
            println!("{}: {} suggestion(s)", file.display(), suggestions.len());
            for s in &suggestions {
                println!("  [P{}] {}: {}", s.priority, s.title, s.description);
            }
        }
        Command::Batch(files) => {
            let runner = BatchRunner::new(config);
            let token = runner.cancellation_token();
            let runtime = tokio::runtime::Runtime::new()?;
            let report = runtime.block_on(async {
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        token.cancel();
                    }
                });
                runner.run(files, BatchJob::Detect).await
            });
            if cli.json {
                print_json(&report)?;
            } else {
                for result in &report.results {
                    match &result.outcome {
                        FileOutcome::Detected { summary } => {
                            println!("{}: {} error(s)", result.file, summary.total_errors)
                        }
                        FileOutcome::Fixed { report } => {
                            println!("{}: {} fixed", result.file, report.applied)
                        }
                        FileOutcome::Failed { error } => println!("{}: failed: {}", result.file, error),
                        FileOutcome::Cancelled => println!("{}: cancelled", result.file),
                    }
                }
                println!(
                    "{} of {} processed, {} failed",
                    report.progress.processed, report.progress.total_files, report.progress.failed
                );
            }
            if report.progress.cancelled > 0 {
                return Err(ExcelintError::Cancelled.into());
            }
            if report.progress.failed > 0 {
                bail!("{} file(s) failed", report.progress.failed);
            }
        }
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    init_logging(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
