use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GridlyError, Result};

pub const DEFAULT_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.0-flash", "gemini-2.0-flash-lite"];

/// Limits applied while ingesting uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Data rows kept per file; the rest are dropped.
    pub max_rows: usize,
    pub max_file_size_bytes: u64,
    /// Files accepted per batch.
    pub max_files: usize,
    /// Data rows included in the text sent for analysis.
    pub sample_rows_for_text: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_file_size_bytes: 10 * 1024 * 1024,
            max_files: 5,
            sample_rows_for_text: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 15_000,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10 * 60 * 1_000,
            capacity: 50,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridlyConfig {
    pub ingest: IngestOptions,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    /// Model fallback order, highest priority first.
    pub models: Vec<String>,
}

impl Default for GridlyConfig {
    fn default() -> Self {
        Self {
            ingest: IngestOptions::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl GridlyConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GridlyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `GRIDLY_MODELS` (comma separated) when set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(models) = std::env::var("GRIDLY_MODELS") {
            self.models = parse_model_list(&models);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(GridlyError::InvalidConfig(
                "at least one model must be configured".to_string(),
            ));
        }
        if self.ingest.max_files == 0 {
            return Err(GridlyError::InvalidConfig(
                "ingest.max_files must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(GridlyError::InvalidConfig(format!(
                "retry.jitter_ratio {} must be between 0.0 and 1.0",
                self.retry.jitter_ratio
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(GridlyError::InvalidConfig(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}
