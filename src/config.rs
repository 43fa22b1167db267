use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Environment variables and the config keys they override.
const ENV_KEYS: &[(&str, &str)] = &[
    ("KAFKA_BOOTSTRAP_SERVERS", "kafka.bootstrap_servers"),
    ("CONSUMER_GROUP", "kafka.consumer_group"),
    ("MONITORED_TOPICS", "kafka.topics"),
    ("KAFKA_TIMEOUT_MS", "kafka.request_timeout_ms"),
    ("TARGET_SERVICE", "target.service"),
    ("IMAGE_NAME", "target.image"),
    ("TARGET_NETWORK", "target.network"),
    ("TARGET_VOLUMES", "target.volumes"),
    ("SELF_NAME_MARKER", "target.self_marker"),
    ("STOP_TIMEOUT", "target.stop_timeout_secs"),
    ("MIN_REPLICAS", "scaling.min_replicas"),
    ("MAX_REPLICAS", "scaling.max_replicas"),
    ("SCALE_UP_THRESHOLD", "scaling.scale_up_threshold"),
    ("SCALE_DOWN_THRESHOLD", "scaling.scale_down_threshold"),
    ("CHECK_INTERVAL", "scaling.check_interval_secs"),
    ("COOLDOWN_PERIOD", "scaling.cooldown_secs"),
    ("AUTO_UPGRADE", "upgrade.auto_upgrade"),
    ("IMAGE_CHECK_INTERVAL", "upgrade.check_interval_secs"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub kafka: KafkaConfig,
    pub target: TargetConfig,
    pub scaling: ScalingConfig,
    pub upgrade: UpgradeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    /// Group whose committed offsets define the backlog.
    pub consumer_group: String,
    #[serde(deserialize_with = "list_or_csv")]
    pub topics: Vec<String>,
    /// Upper bound for each metadata/offset request to the broker.
    pub request_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "kafka:29092".into(),
            consumer_group: "renderer-group".into(),
            topics: vec!["script-created".into(), "assets-ready".into()],
            request_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base container name of the scaled worker service.
    pub service: String,
    /// Image reference new replicas are launched from.
    pub image: String,
    /// Network used when no reference replica exists to copy it from.
    pub network: String,
    /// Volume binds used when no reference replica exists to copy them from.
    #[serde(deserialize_with = "list_or_csv")]
    pub volumes: Vec<String>,
    /// Containers whose name contains this are never counted or touched.
    pub self_marker: String,
    pub stop_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            service: "shorts-renderer".into(),
            image: "shorts-worker:latest".into(),
            network: "science-news-shorts-automation_default".into(),
            volumes: vec![
                "science-news-shorts-automation_shorts-shared-data:/app/shared-data:rw".into(),
                "science-news-shorts-automation_shorts-tokens:/app/tokens:rw".into(),
            ],
            self_marker: "autoscaler".into(),
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub scale_up_threshold: u64,
    pub scale_down_threshold: u64,
    /// Seconds between ticks.
    pub check_interval_secs: u64,
    /// Minimum seconds between two scaling actions.
    pub cooldown_secs: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 5,
            scale_up_threshold: 5,
            scale_down_threshold: 2,
            check_interval_secs: 30,
            cooldown_secs: 60,
        }
    }
}

impl ScalingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    #[serde(deserialize_with = "strict_bool")]
    pub auto_upgrade: bool,
    /// Seconds between image pulls; independent of the tick interval.
    pub check_interval_secs: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            auto_upgrade: true,
            check_interval_secs: 300,
        }
    }
}

impl UpgradeConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl AppConfig {
    /// Defaults, then the TOML file (if present), then environment overrides, then validation.
    ///
    /// The file path comes from `CONFIG_FILE` and defaults to `autoscaler.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let path = Env::var_or("CONFIG_FILE", "autoscaler.toml");
        Self::extract(
            Self::defaults()
                .merge(Toml::file(path))
                .merge(env_overrides()),
        )
    }

    /// Parse and validate config from a string (e.g. for tests). Environment is ignored.
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        Self::extract(Self::defaults().merge(Toml::string(s)))
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
    }

    fn extract(figment: Figment) -> anyhow::Result<Self> {
        let config: AppConfig = figment.extract().map_err(name_env_var)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.kafka.bootstrap_servers.trim().is_empty(),
            "kafka.bootstrap_servers must be non-empty"
        );
        anyhow::ensure!(
            !self.kafka.consumer_group.trim().is_empty(),
            "kafka.consumer_group must be non-empty"
        );
        anyhow::ensure!(
            !self.kafka.topics.is_empty(),
            "kafka.topics must list at least one topic"
        );
        anyhow::ensure!(
            self.kafka.request_timeout_ms > 0,
            "kafka.request_timeout_ms must be > 0, got {}",
            self.kafka.request_timeout_ms
        );
        anyhow::ensure!(
            !self.target.service.trim().is_empty(),
            "target.service must be non-empty"
        );
        anyhow::ensure!(
            !self.target.image.trim().is_empty(),
            "target.image must be non-empty"
        );
        anyhow::ensure!(
            !self.target.self_marker.trim().is_empty(),
            "target.self_marker must be non-empty"
        );
        anyhow::ensure!(
            !self.target.service.contains(&self.target.self_marker),
            "target.service {:?} contains target.self_marker {:?}; no replica would ever be counted",
            self.target.service,
            self.target.self_marker
        );
        anyhow::ensure!(
            self.scaling.max_replicas >= 1,
            "scaling.max_replicas must be >= 1, got {}",
            self.scaling.max_replicas
        );
        anyhow::ensure!(
            self.scaling.min_replicas <= self.scaling.max_replicas,
            "scaling.min_replicas ({}) must be <= scaling.max_replicas ({})",
            self.scaling.min_replicas,
            self.scaling.max_replicas
        );
        anyhow::ensure!(
            self.scaling.scale_down_threshold < self.scaling.scale_up_threshold,
            "scaling.scale_down_threshold ({}) must be < scaling.scale_up_threshold ({})",
            self.scaling.scale_down_threshold,
            self.scaling.scale_up_threshold
        );
        anyhow::ensure!(
            self.scaling.check_interval_secs > 0,
            "scaling.check_interval_secs must be > 0, got {}",
            self.scaling.check_interval_secs
        );
        anyhow::ensure!(
            self.upgrade.check_interval_secs > 0,
            "upgrade.check_interval_secs must be > 0, got {}",
            self.upgrade.check_interval_secs
        );
        Ok(())
    }
}

/// Only the known variables, renamed to their nested config keys.
fn env_overrides() -> Env {
    let vars: Vec<&str> = ENV_KEYS.iter().map(|(var, _)| *var).collect();
    Env::raw().only(&vars).map(|k| {
        ENV_KEYS
            .iter()
            .find(|(var, _)| k.as_str().eq_ignore_ascii_case(var))
            .map_or(k.as_str(), |(_, key)| *key)
            .to_string()
            .into()
    })
}

/// Prefix an extraction error with the environment variable that feeds the failing key.
fn name_env_var(err: figment::Error) -> anyhow::Error {
    let path = err.path.join(".");
    match ENV_KEYS.iter().find(|(_, key)| *key == path) {
        Some((var, key)) => anyhow::anyhow!("invalid {} ({}): {}", var, key, err),
        None => anyhow::anyhow!(err),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

/// TOML arrays or comma-separated strings from the environment.
fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items,
        ListOrCsv::Csv(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

/// `true` or `false` in any case; anything else is rejected rather than read as false.
fn strict_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        Flag::Text(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        Flag::Text(s) => Err(serde::de::Error::custom(format!(
            "expected true or false, got {:?}",
            s
        ))),
    }
}
