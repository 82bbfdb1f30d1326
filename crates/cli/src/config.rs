//! Startup settings: defaults, then the optional YAML file, then flags/env.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use nsward_core::CriteriaConfig;
use nsward_queue::Backoff;
use serde::Deserialize;

/// YAML file layout. Criteria fields sit at the top level next to runtime knobs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    #[serde(flatten)]
    pub criteria: CriteriaConfig,
    pub workers: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Flag/env values; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub label_key: Option<String>,
    pub label_values: Option<Vec<String>>,
    pub annotation_key: Option<String>,
    pub annotation_values: Option<Vec<String>>,
    pub workers: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub criteria: CriteriaConfig,
    pub workers: usize,
    pub fetch_timeout: Duration,
    pub backoff: Backoff,
}

impl Settings {
    pub fn resolve(file: Option<FileConfig>, o: &Overrides) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Backoff::default();
        Self {
            criteria: apply_criteria(file.criteria, o),
            workers: o.workers.or(file.workers).unwrap_or(2).max(1),
            fetch_timeout: Duration::from_secs(o.fetch_timeout_secs.or(file.fetch_timeout_secs).unwrap_or(10)),
            backoff: Backoff {
                base: o.backoff_base_ms.or(file.backoff_base_ms).map(Duration::from_millis).unwrap_or(defaults.base),
                max: o.backoff_max_secs.or(file.backoff_max_secs).map(Duration::from_secs).unwrap_or(defaults.max),
            },
        }
    }

    pub fn load(path: Option<&Path>, o: &Overrides) -> Result<Self> {
        let file = path.map(FileConfig::load).transpose()?;
        Ok(Self::resolve(file, o))
    }
}

/// Criteria from the file with flag/env values laid on top.
pub fn apply_criteria(mut c: CriteriaConfig, o: &Overrides) -> CriteriaConfig {
    if let Some(v) = &o.label_key { c.label_key = v.clone(); }
    if let Some(v) = &o.label_values { c.label_values = v.clone(); }
    if let Some(v) = &o.annotation_key { c.annotation_key = v.clone(); }
    if let Some(v) = &o.annotation_values { c.annotation_values = v.clone(); }
    c
}
