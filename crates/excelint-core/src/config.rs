//! Analysis configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! yields the stock thresholds.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detection: DetectionConfig,
    pub fixing: FixingConfig,
    pub prediction: PredictionConfig,
    pub batch: BatchConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub max_cycle_depth: usize,
    pub max_empty_rows: usize,
    pub min_table_width: usize,
    pub min_table_height: usize,
    pub format_consistency_ratio: f64,
    pub fill_rate_threshold: f64,
    pub dominant_type_ratio: f64,
    pub outlier_iqr_multiplier: f64,
    pub min_outlier_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            max_cycle_depth: 10,
            max_empty_rows: 3,
            min_table_width: 2,
            min_table_height: 3,
            format_consistency_ratio: 0.7,
            fill_rate_threshold: 0.8,
            dominant_type_ratio: 0.8,
            outlier_iqr_multiplier: 1.5,
            min_outlier_samples: 4,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixingConfig {
    pub safe_confidence_threshold: f64,
    pub aggressive_confidence_threshold: f64,
    pub create_backup: bool,
}

impl Default for FixingConfig {
    fn default() -> Self {
        FixingConfig {
            safe_confidence_threshold: 0.8,
            aggressive_confidence_threshold: 0.5,
            create_backup: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictionConfig {
    pub max_predictions: usize,
    pub cache_entries: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        PredictionConfig {
            max_predictions: 10,
            cache_entries: 32,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig { max_concurrent: 4 }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
