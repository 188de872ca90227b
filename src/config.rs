//! Configuration management for regionpace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{RegionPaceError, Result};
use crate::ratelimit::{parse_descriptor, LimitTier};

/// Prefix for environment overrides, e.g. `REGIONPACE__PACING__MAX_WAIT_SECS`.
const ENV_PREFIX: &str = "REGIONPACE";

/// Main configuration for regionpace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionPaceConfig {
    /// Application quotas per region
    #[serde(default)]
    pub regions: BTreeMap<String, RegionConfig>,

    /// Pacing behaviour
    #[serde(default)]
    pub pacing: PacingConfig,
}

/// Quotas of one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Application limits descriptor, shortest window first (e.g. `20:1,100:120`)
    pub application_limits: String,
}

impl RegionConfig {
    /// Parse the application limits.
    pub fn tiers(&self) -> Result<Vec<LimitTier>> {
        Ok(parse_descriptor(&self.application_limits)?)
    }
}

/// Pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Longest single sleep before re-checking quotas
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait(),
        }
    }
}

fn default_max_wait() -> u64 {
    10
}

impl RegionPaceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RegionPaceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RegionPaceError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and apply `REGIONPACE__*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration with environment overrides");

        let config: RegionPaceConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RegionPaceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a region.
    pub fn region(&self, name: &str) -> Result<&RegionConfig> {
        self.regions
            .get(name)
            .ok_or_else(|| RegionPaceError::Config(format!("Unknown region: {}", name)))
    }

    /// Reject descriptors that would fail later, at first use.
    fn validate(&self) -> Result<()> {
        for (name, region) in &self.regions {
            region.tiers().map_err(|e| {
                RegionPaceError::Config(format!("region {}: {}", name, e))
            })?;
        }
        if self.pacing.max_wait_secs == 0 {
            return Err(RegionPaceError::Config(
                "pacing.max_wait_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegionPaceConfig::default();
        assert!(config.regions.is_empty());
        assert_eq!(config.pacing.max_wait_secs, 10);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
regions:
  na1:
    application_limits: "20:1,100:120"
  euw1:
    application_limits: "500:10"
pacing:
  max_wait_secs: 3
"#;
        let config = RegionPaceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.regions.len(), 2);
        assert_eq!(
            config.region("na1").unwrap().tiers().unwrap(),
            vec![LimitTier::new(20, 1), LimitTier::new(100, 120)]
        );
        assert_eq!(config.pacing.max_wait_secs, 3);
    }

    #[test]
    fn test_pacing_defaults_when_omitted() {
        let yaml = r#"
regions:
  kr:
    application_limits: "20:1"
"#;
        let config = RegionPaceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pacing.max_wait_secs, 10);
    }

    #[test]
    fn test_reject_bad_descriptor() {
        let yaml = r#"
regions:
  na1:
    application_limits: "20/1"
"#;
        let err = RegionPaceConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("na1"));
    }

    #[test]
    fn test_reject_zero_max_wait() {
        let yaml = "pacing:\n  max_wait_secs: 0\n";
        assert!(matches!(
            RegionPaceConfig::from_yaml(yaml),
            Err(RegionPaceError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_region() {
        let config = RegionPaceConfig::default();
        assert!(matches!(config.region("oc1"), Err(RegionPaceError::Config(_))));
    }

    #[test]
    fn test_from_file_missing() {
        let err = RegionPaceConfig::from_file("/nonexistent/regionpace.yaml").unwrap_err();
        assert!(matches!(err, RegionPaceError::Io(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("regionpace-{}.yaml", std::process::id()));
        std::fs::write(&path, "regions:\n  na1:\n    application_limits: \"20:1,100:120\"\n").unwrap();

        let config = RegionPaceConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.region("na1").unwrap().application_limits, "20:1,100:120");
        assert_eq!(config.pacing.max_wait_secs, 10);
    }
}
