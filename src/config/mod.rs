use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{config_error, core::error::OrchestratorResult};

static DEPENDENCY_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_dependency_keys"))]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub orchestrator: OrchestratorSettings,

    /// Per-dependency breaker policy and call deadline overrides
    #[serde(default = "Config::default_dependencies")]
    #[validate(nested)]
    pub dependencies: Vec<DependencyConfig>,

    /// Breaker policy for dependencies without an entry above
    #[serde(default)]
    #[validate(nested)]
    pub default_breaker: BreakerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[validate(nested)]
    pub log: Option<Log>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorSettings::default(),
            dependencies: Self::default_dependencies(),
            default_breaker: BreakerSettings::default(),
            health: HealthSettings::default(),
            metrics: MetricsSettings::default(),
            log: None,
        }
    }
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> OrchestratorResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {path}: {e}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> OrchestratorResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {e}"))?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| config_error!("Conf file valid failed: {e}"))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> OrchestratorResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to render yaml conf: {e}"))
    }

    /// Look up the entry for a dependency key
    pub fn dependency(&self, key: &str) -> Option<&DependencyConfig> {
        self.dependencies.iter().find(|d| d.key == key)
    }

    /// Per-call deadline for a dependency key
    pub fn call_timeout_for(&self, key: &str) -> Duration {
        self.dependency(key)
            .and_then(|d| d.call_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.orchestrator.call_timeout())
    }

    fn default_dependencies() -> Vec<DependencyConfig> {
        vec![
            DependencyConfig::new("analytics", 5, 60),
            DependencyConfig::new("certification", 3, 30),
            DependencyConfig::new("performance", 4, 45),
        ]
    }

    fn validate_dependency_keys(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for dependency in &self.dependencies {
            if !DEPENDENCY_KEY.is_match(&dependency.key) {
                let mut err = ValidationError::new("invalid_dependency_key");
                err.add_param("key".into(), &dependency.key);
                return Err(err);
            }
            if !seen.insert(dependency.key.as_str()) {
                let mut err = ValidationError::new("duplicate_dependency_key");
                err.add_param("key".into(), &dependency.key);
                return Err(err);
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrchestratorSettings {
    /// Deadline applied to every dependency call, in milliseconds
    #[serde(default = "OrchestratorSettings::default_call_timeout_ms")]
    #[validate(range(min = 1))]
    pub call_timeout_ms: u64,

    /// Buffered events per topic before slow subscribers start lagging
    #[serde(default = "OrchestratorSettings::default_event_capacity")]
    #[validate(range(min = 1))]
    pub event_capacity: usize,

    #[serde(default = "OrchestratorSettings::default_dashboard_cache_ttl_secs")]
    pub dashboard_cache_ttl_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: Self::default_call_timeout_ms(),
            event_capacity: Self::default_event_capacity(),
            dashboard_cache_ttl_secs: Self::default_dashboard_cache_ttl_secs(),
        }
    }
}

impl OrchestratorSettings {
    fn default_call_timeout_ms() -> u64 {
        5000
    }

    fn default_event_capacity() -> usize {
        256
    }

    fn default_dashboard_cache_ttl_secs() -> u64 {
        300
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn dashboard_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dashboard_cache_ttl_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct DependencyConfig {
    pub key: String,
    #[validate(range(min = 1))]
    pub threshold: u32,
    /// How long an open breaker waits before allowing a trial call
    pub cooldown_secs: u64,
    #[validate(range(min = 1))]
    pub call_timeout_ms: Option<u64>,
}

impl DependencyConfig {
    pub fn new(key: impl Into<String>, threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            key: key.into(),
            threshold,
            cooldown_secs,
            call_timeout_ms: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct BreakerSettings {
    #[serde(default = "BreakerSettings::default_threshold")]
    #[validate(range(min = 1))]
    pub threshold: u32,
    #[serde(default = "BreakerSettings::default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
            cooldown_secs: Self::default_cooldown_secs(),
        }
    }
}

impl BreakerSettings {
    fn default_threshold() -> u32 {
        5
    }

    fn default_cooldown_secs() -> u64 {
        60
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Background poll interval; 0 disables polling
    #[serde(default = "HealthSettings::default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl HealthSettings {
    fn default_interval_secs() -> u64 {
        30
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Periodic metrics report interval; 0 disables reporting
    #[serde(default = "MetricsSettings::default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            report_interval_secs: Self::default_report_interval_secs(),
        }
    }
}

impl MetricsSettings {
    fn default_report_interval_secs() -> u64 {
        60
    }

    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,
}
