// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::error::ConfigError;

/// Environment variable that supplies the OCR endpoint when the config file leaves it unset.
pub const OCR_ENDPOINT_ENV: &str = "DISCLOSURE_OCR_ENDPOINT";

/// Template detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum fingerprint score a template must reach to be selected.
    pub min_match_score: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { min_match_score: 0.5 }
    }
}

/// Thresholds that turn a baseline/candidate comparison into a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionPolicy {
    /// Minimum gain in aggregate confidence for a PROMOTE recommendation.
    pub min_aggregate_improvement: f64,
    /// Maximum tolerated drop in any field's extraction rate or mean confidence.
    pub field_regression_threshold: f64,
    /// Per-field regression thresholds, keyed by field name (sub-record fields as `kind.field`).
    pub field_thresholds: BTreeMap<String, f64>,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            min_aggregate_improvement: 0.03,
            field_regression_threshold: 0.05,
            field_thresholds: BTreeMap::new(),
        }
    }
}

impl PromotionPolicy {
    pub fn threshold_for(&self, field: &str) -> f64 {
        self.field_thresholds
            .get(field)
            .copied()
            .unwrap_or(self.field_regression_threshold)
    }
}

/// Engine configuration, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root for `documents/`, `results/`, `registry/` and `queue/`.
    pub data_dir: PathBuf,
    pub ocr_endpoint: Option<String>,
    pub ocr_timeout_secs: u64,
    pub default_batch_size: usize,
    pub max_concurrency: usize,
    /// Fewer decoded characters than this means the document has no usable text layer.
    pub min_text_chars: usize,
    pub detector: DetectorConfig,
    pub promotion: PromotionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            ocr_endpoint: None,
            ocr_timeout_secs: 60,
            default_batch_size: 100,
            max_concurrency: 4,
            min_text_chars: 40,
            detector: DetectorConfig::default(),
            promotion: PromotionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml(&raw)
    }

    /// Fills unset values from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if self.ocr_endpoint.is_none() {
            if let Ok(endpoint) = std::env::var(OCR_ENDPOINT_ENV) {
                if !endpoint.trim().is_empty() {
                    self.ocr_endpoint = Some(endpoint);
                }
            }
        }
        self
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.data_dir.join("registry")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_batch_size == 0 {
            return Err(ConfigError::Invalid("default_batch_size must be greater than 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be greater than 0".into()));
        }
        if self.ocr_timeout_secs == 0 {
            return Err(ConfigError::Invalid("ocr_timeout_secs must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.detector.min_match_score) {
            return Err(ConfigError::Invalid("detector.min_match_score must be within [0, 1]".into()));
        }
        let policy = &self.promotion;
        let thresholds = std::iter::once(("field_regression_threshold", policy.field_regression_threshold))
            .chain(std::iter::once(("min_aggregate_improvement", policy.min_aggregate_improvement)))
            .chain(policy.field_thresholds.iter().map(|(k, v)| (k.as_str(), *v)));
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "promotion threshold '{}' must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}
