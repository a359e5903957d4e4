use std::time::Duration;

use serde::Deserialize;

use crate::error::ConduitError;

/// Timing knobs of a session. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound of the random delay before trying to become a group's
    /// discovery host.
    pub takeover_max_delay_secs: f64,
    pub discovery_initial_reconnect_delay_secs: f64,
    /// A discovery dial that has not opened by then counts as failed.
    pub discovery_connection_timeout_secs: f64,
    pub network_reconnect_delay_secs: f64,
    /// Seeds the election jitter. Random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            takeover_max_delay_secs: 1.0,
            discovery_initial_reconnect_delay_secs: 0.3,
            discovery_connection_timeout_secs: 4.0,
            network_reconnect_delay_secs: 0.25,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConduitError> {
        Ok(toml::from_str(text)?)
    }

    pub fn takeover_max_delay(&self) -> Duration {
        secs(self.takeover_max_delay_secs)
    }

    pub fn discovery_initial_reconnect_delay(&self) -> Duration {
        secs(self.discovery_initial_reconnect_delay_secs)
    }

    pub fn discovery_connection_timeout(&self) -> Duration {
        secs(self.discovery_connection_timeout_secs)
    }

    pub fn network_reconnect_delay(&self) -> Duration {
        secs(self.network_reconnect_delay_secs)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.takeover_max_delay(), Duration::from_secs(1));
        assert_eq!(config.discovery_initial_reconnect_delay(), Duration::from_secs_f64(0.3));
        assert_eq!(config.discovery_connection_timeout(), Duration::from_secs(4));
        assert_eq!(config.network_reconnect_delay(), Duration::from_millis(250));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str("takeover_max_delay_secs = 2.5\nrng_seed = 7\n").unwrap();
        assert_eq!(config.takeover_max_delay(), Duration::from_millis(2500));
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.network_reconnect_delay_secs, 0.25);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = SessionConfig::from_toml_str("takeover_max_delay_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConduitError::Config(_)));
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        let config = SessionConfig {
            network_reconnect_delay_secs: -1.0,
            ..SessionConfig::default()
        };
        assert_eq!(config.network_reconnect_delay(), Duration::ZERO);
    }
}
