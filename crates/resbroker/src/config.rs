use std::path::Path;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_RESCAN_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Tunables of the resource broker.
///
/// Can be built in code through [`BrokerConfigBuilder`] or read from TOML, where
/// durations are written in human readable form (`"60s"`, `"500ms"`).
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(default)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// How long a request stays queryable after it reached a terminal state.
    #[serde(deserialize_with = "deserialize_duration")]
    pub eviction_grace: Duration,

    /// Delay before the whole backlog is scanned again when nothing could be matched.
    #[serde(deserialize_with = "deserialize_duration")]
    pub rescan_delay: Duration,

    /// Capacity of the channel carrying inventory events to the assigner.
    pub event_channel_capacity: usize,

    /// Waiting requests whose owner did not wait on them for this long are cancelled.
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub abandon_timeout: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            eviction_grace: DEFAULT_EVICTION_GRACE,
            rescan_delay: DEFAULT_RESCAN_DELAY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            abandon_timeout: None,
        }
    }
}

impl BrokerConfig {
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        let config: BrokerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::ConfigError(
                "event_channel_capacity has to be at least 1".to_string(),
            ));
        }
        if self.rescan_delay.is_zero() {
            return Err(crate::Error::ConfigError(
                "rescan_delay cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn deserialize_opt_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
        .transpose()
}
