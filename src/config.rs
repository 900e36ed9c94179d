use crate::estimation::device::{MOVEMENT_THRESHOLD, WIFI_ERROR};
use crate::pipeline::{PipelineParams, RecencyCheck};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_ACTIVE_TIME_SECS: i64 = 3 * 60;
pub const DEFAULT_ACTIVE_COUNT: usize = 2;
pub const DEFAULT_RETENTION_SECS: i64 = 20 * 60;
pub const DEFAULT_BATCH_GAP_SECS: i64 = 5 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub assets: AssetsSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub pipeline: Option<PipelineSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsSection {
    /// JSON object of map id -> floor id
    pub floor_mapping: PathBuf,
    /// JSON object of z-score -> one-sided tail probability.
    /// When absent, a standard normal table is generated at startup.
    pub movement_table: Option<PathBuf>,
    /// JSON object of floor id -> room outlines
    pub floor_plan: PathBuf,
    /// Room/floor/department metadata for occupancy aggregation
    pub metadata: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSection {
    /// Newline-delimited JSON fixes to replay
    pub input: PathBuf,
    pub working_set: PathBuf,
    pub refined_output: PathBuf,
    pub occupancy_output: Option<PathBuf>,
    /// Start the run from an empty working set (default: true)
    pub reset_working_set: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineSection {
    pub wifi_error: Option<f64>,
    pub movement_threshold: Option<f64>,
    pub active_time_secs: Option<i64>,
    pub active_count: Option<usize>,
    pub retention_secs: Option<i64>,
    pub batch_gap_secs: Option<i64>,
    /// "device" (default) or "batch"
    pub recency: Option<RecencyCheck>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    fn pipeline_section(&self) -> PipelineSection {
        self.pipeline.clone().unwrap_or_default()
    }

    /// Estimator and activity parameters with defaults filled in.
    pub fn pipeline_params(&self) -> PipelineParams {
        let section = self.pipeline_section();
        let mut params = PipelineParams::default();
        params.estimator.wifi_error = section.wifi_error.unwrap_or(WIFI_ERROR);
        params.estimator.movement_threshold =
            section.movement_threshold.unwrap_or(MOVEMENT_THRESHOLD);
        params.active_time_secs = section
            .active_time_secs
            .unwrap_or(DEFAULT_ACTIVE_TIME_SECS);
        params.active_count = section.active_count.unwrap_or(DEFAULT_ACTIVE_COUNT);
        params.retention_secs = section.retention_secs.unwrap_or(DEFAULT_RETENTION_SECS);
        params.recency = section.recency.unwrap_or_default();
        params
    }

    /// Gap between fixes that starts a new replay batch (default: 5 minutes)
    pub fn batch_gap_secs(&self) -> i64 {
        self.pipeline_section()
            .batch_gap_secs
            .unwrap_or(DEFAULT_BATCH_GAP_SECS)
    }

    pub fn reset_working_set(&self) -> bool {
        self.storage.reset_working_set.unwrap_or(true)
    }

    /// Occupancy output is written only when both metadata and a target path are configured.
    pub fn occupancy_paths(&self) -> Option<(&Path, &Path)> {
        let metadata = self.assets.metadata.as_deref()?;
        let output = self.storage.occupancy_output.as_deref()?;
        if metadata.as_os_str().is_empty() || output.as_os_str().is_empty() {
            None
        } else {
            Some((metadata, output))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    const MINIMAL: &str = r#"
[app]
name = "occupancy-flow"

[logging]
level = "info"

[assets]
floor_mapping = "data/floor_mapping.json"
floor_plan = "data/floor_plan.json"

[storage]
input = "data/fixes.jsonl"
working_set = "data/out/working_set.json"
refined_output = "data/out/refined.jsonl"
"#;

    #[test]
    fn default_config_includes_asset_paths() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;
        assert!(!config.assets.floor_plan.as_os_str().is_empty());
        assert!(!config.assets.floor_mapping.as_os_str().is_empty());
        Ok(())
    }

    #[test]
    fn missing_pipeline_section_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(MINIMAL)?;

        let params = config.pipeline_params();

        assert_eq!(params.estimator.wifi_error, WIFI_ERROR);
        assert_eq!(params.estimator.movement_threshold, MOVEMENT_THRESHOLD);
        assert_eq!(params.active_time_secs, DEFAULT_ACTIVE_TIME_SECS);
        assert_eq!(params.active_count, DEFAULT_ACTIVE_COUNT);
        assert_eq!(params.retention_secs, DEFAULT_RETENTION_SECS);
        assert_eq!(params.recency, RecencyCheck::Device);
        assert_eq!(config.batch_gap_secs(), DEFAULT_BATCH_GAP_SECS);
        assert!(config.reset_working_set());
        assert!(config.occupancy_paths().is_none());
        Ok(())
    }

    #[test]
    fn pipeline_overrides_are_applied() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            "{MINIMAL}\n[pipeline]\nwifi_error = 8.0\nactive_count = 3\nrecency = \"batch\"\n"
        );
        let config: Config = toml::from_str(&contents)?;

        let params = config.pipeline_params();

        assert_eq!(params.estimator.wifi_error, 8.0);
        assert_eq!(params.active_count, 3);
        assert_eq!(params.recency, RecencyCheck::Batch);
        Ok(())
    }

    #[test]
    fn empty_occupancy_output_is_treated_as_missing() -> Result<(), Box<dyn std::error::Error>> {
        let contents = MINIMAL
            .replace(
                "floor_plan = \"data/floor_plan.json\"",
                "floor_plan = \"data/floor_plan.json\"\nmetadata = \"data/metadata.json\"",
            )
            .replace(
                "refined_output = \"data/out/refined.jsonl\"",
                "refined_output = \"data/out/refined.jsonl\"\noccupancy_output = \"\"",
            );
        let config: Config = toml::from_str(&contents)?;

        assert!(config.occupancy_paths().is_none());
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let temp_dir = std::env::temp_dir();
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = temp_dir.join(format!("occupancy-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = std::env::temp_dir();
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = temp_dir.join(format!("occupancy-config-invalid-{unique}.toml"));
        fs::write(&path, "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
