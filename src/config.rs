//! Worker-wide settings shared by every job a process handles.
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default time a lease may go unrenewed before it's considered abandoned.
pub const DEFAULT_LEASE_LIFETIME: Duration = Duration::from_secs(10 * 60);

const MAX_LEASE_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Settings as read from a file or flags. Validated into [`Settings`] by
/// [`Config::normalise`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Config {
    /// Recorded as `lastModifiedBy` on every job this worker saves.
    pub worker_name: Option<String>,
    /// How long a lease survives without a `touch`, e.g. `"10m"`.
    #[serde(with = "humantime_serde")]
    pub lease_lifetime: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_name: None,
            lease_lifetime: DEFAULT_LEASE_LIFETIME,
        }
    }
}

/// Validated settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub worker_name: Option<String>,
    pub lease_lifetime: TimeDelta,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_name: None,
            lease_lifetime: TimeDelta::minutes(10),
        }
    }
}

impl Config {
    pub fn normalise(self) -> Result<Settings, ConfigError> {
        if self.lease_lifetime < Duration::from_millis(1)
            || self.lease_lifetime > MAX_LEASE_LIFETIME
        {
            return Err(ConfigError::LeaseLifetime(
                humantime::format_duration(self.lease_lifetime).to_string(),
            ));
        }
        // Bounded above, so always representable.
        let lease_lifetime = TimeDelta::from_std(self.lease_lifetime)
            .map_err(|error| ConfigError::LeaseLifetime(error.to_string()))?;

        let worker_name = match self.worker_name {
            Some(name) if name.trim().is_empty() => {
                return Err(ConfigError::BlankWorkerName)
            },
            Some(name) => Some(name.trim().to_owned()),
            None => None,
        };

        Ok(Settings {
            worker_name,
            lease_lifetime,
        })
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer
            .collect_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Config::default().normalise().unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_yaml() {
        let config: Config = serde_yaml::from_str(
            "worker-name: ' worker-1 '\nlease-lifetime: 90s\n",
        )
        .unwrap();
        assert_eq!(config.lease_lifetime, Duration::from_secs(90));

        let settings = config.normalise().unwrap();
        assert_eq!(settings.worker_name.as_deref(), Some("worker-1"));
        assert_eq!(settings.lease_lifetime, TimeDelta::seconds(90));

        let empty: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(empty, Config::default());

        assert!(serde_yaml::from_str::<Config>("lease-lifetime: soon").is_err());
        assert!(serde_yaml::from_str::<Config>("lease: 5m").is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero = Config {
            lease_lifetime: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(zero.normalise(), Err(ConfigError::LeaseLifetime(_))));

        let blank = Config {
            worker_name: Some("  ".into()),
            ..Config::default()
        };
        assert_eq!(blank.normalise(), Err(ConfigError::BlankWorkerName));
    }
}
