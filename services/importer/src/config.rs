//! Importer configuration.
//!
//! Loaded from a single YAML file (`config/importer.yaml` by default). Every
//! key has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use forecast_common::{Model, Parameter};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::download::RetryConfig;
use crate::orchestrator::RetryPolicy;
use crate::scheduler::ScheduleConfig;
use crate::tiles::TilerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Root of the published tile tree.
    pub tiles_path: PathBuf,
    /// Scratch space for downloads and staging artifacts.
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Directory holding the job store database.
    pub state_dir: PathBuf,
    /// NOMADS GRIB filter endpoint.
    pub gfs_url: String,
    /// ECMWF open-data root.
    pub ecmwf_url: String,
    /// Last forecast horizon, in hours.
    pub max_forecast_step: u32,
    /// Spacing of forecast horizons, in hours.
    pub forecast_step: u32,
    /// Tile directories older than this many days are deleted.
    pub retention_days: u32,
    pub download: RetryConfig,
    pub retry: RetryPolicy,
    pub tiler: TilerConfig,
    pub schedule: ScheduleConfig,
    pub models: ModelsConfig,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            tiles_path: PathBuf::from("tiles"),
            temp_dir: PathBuf::from("tmp"),
            log_dir: PathBuf::from("logs"),
            state_dir: PathBuf::from("state"),
            gfs_url: "https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_0p25.pl".to_string(),
            ecmwf_url: "https://data.ecmwf.int/forecasts".to_string(),
            max_forecast_step: 72,
            forecast_step: 6,
            retention_days: 1,
            download: RetryConfig::default(),
            retry: RetryPolicy::default(),
            tiler: TilerConfig::default(),
            schedule: ScheduleConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

/// Per-model switches and parameter lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub gfs: ModelSettings,
    pub ecmwf: ModelSettings,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            gfs: ModelSettings {
                enabled: true,
                parameters: vec![Parameter::Precipitation, Parameter::Humidity],
            },
            ecmwf: ModelSettings {
                enabled: true,
                parameters: vec![Parameter::Wind, Parameter::Temperature, Parameter::Pressure],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

fn default_enabled() -> bool {
    true
}

impl ImporterConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "Loaded importer configuration");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.forecast_step == 0 {
            bail!("forecast_step must be positive");
        }
        if self.schedule.triggers.iter().any(|t| t.latency_minutes < 0) {
            bail!("trigger latency must not be negative");
        }
        Ok(())
    }

    pub fn model(&self, model: Model) -> &ModelSettings {
        match model {
            Model::Gfs => &self.models.gfs,
            Model::Ecmwf => &self.models.ecmwf,
        }
    }

    /// Enabled models in trigger order.
    pub fn enabled_models(&self) -> Vec<Model> {
        Model::ALL
            .into_iter()
            .filter(|m| self.model(*m).enabled)
            .collect()
    }

    pub fn job_db_path(&self) -> PathBuf {
        self.state_dir.join("jobs.db")
    }
}

/// `HH:MM` (de)serialization for daily trigger times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use forecast_common::Cycle;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ImporterConfig::from_yaml("").unwrap();
        assert_eq!(config.forecast_step, 6);
        assert_eq!(config.retention_days, 1);
        assert_eq!(config.enabled_models(), vec![Model::Ecmwf, Model::Gfs]);
        assert_eq!(config.schedule.triggers.len(), 4);
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.retry.attempt_cap, 15);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
tiles_path: /srv/tiles
temp_dir: /var/tmp/importer
max_forecast_step: 120
download:
  max_attempts: 3
tiler:
  zoom_levels: "0-5"
schedule:
  janitor_at: "02:30"
  triggers:
    - at: "05:00"
      cycle: 18
      latency_minutes: 660
models:
  gfs:
    enabled: false
  ecmwf:
    parameters: [wind, cloud_cover]
"#;
        let config = ImporterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.tiles_path, PathBuf::from("/srv/tiles"));
        assert_eq!(config.max_forecast_step, 120);
        assert_eq!(config.download.max_attempts, 3);
        assert_eq!(config.download.initial_backoff_ms, 100);
        assert_eq!(config.tiler.zoom_levels, "0-5");
        assert_eq!(
            config.schedule.janitor_at,
            NaiveTime::from_hms_opt(2, 30, 0).unwrap()
        );
        assert_eq!(config.schedule.triggers[0].cycle, Cycle::H18);
        assert_eq!(config.enabled_models(), vec![Model::Ecmwf]);
        assert_eq!(
            config.model(Model::Ecmwf).parameters,
            vec![Parameter::Wind, Parameter::CloudCover]
        );
    }

    #[test]
    fn test_invalid_cycle_rejected() {
        let yaml = r#"
schedule:
  triggers:
    - at: "05:00"
      cycle: 3
      latency_minutes: 600
"#;
        assert!(ImporterConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/importer.yaml");
        let shipped = ImporterConfig::load(&path).unwrap();
        let defaults = ImporterConfig::default();

        assert_eq!(shipped.schedule.triggers, defaults.schedule.triggers);
        assert_eq!(shipped.schedule.janitor_at, defaults.schedule.janitor_at);
        assert_eq!(shipped.retry.long_cooldown_secs, defaults.retry.long_cooldown_secs);
        assert_eq!(shipped.retry.max_run_secs, defaults.retry.max_run_secs);
        assert_eq!(
            shipped.download.index_timeout_secs,
            defaults.download.index_timeout_secs
        );
        assert_eq!(shipped.model(Model::Gfs).parameters, defaults.model(Model::Gfs).parameters);
    }

    #[test]
    fn test_zero_forecast_step_rejected() {
        assert!(ImporterConfig::from_yaml("forecast_step: 0").is_err());
    }
}
