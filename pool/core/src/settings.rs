//! Pool Settings
//!
//! Configuration for the connection pool. Durations are expressed as
//! millisecond fields (0 = disabled) so the struct round-trips through
//! config files unchanged; `Option<Duration>` accessors are provided for
//! code that wants the decoded view. Loading the settings from a file is
//! the embedding application's job; the core only validates them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Connection pool configuration.
///
/// Built with [`PoolSettings::default`] plus the `with_*` methods, or
/// deserialized from an application config. Always run
/// [`validate`](Self::validate) (the pool constructor does) before use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of slots, i.e. the maximum number of concurrent connections
    /// to the host. Must be at least 1.
    pub max_connections: usize,

    /// Warm-connection floor: the dispatcher pre-connects idle slots until
    /// this many slots hold (or are establishing) a connection.
    pub min_connections: usize,

    /// Requests in flight per connection. Only 1 is supported: a second
    /// request queued behind a response blocks work that another slot
    /// could have picked up.
    pub pipelining_limit: usize,

    /// Default retry budget given to each request. Only idempotent
    /// requests with replayable entities are ever retried.
    pub max_retries: usize,

    /// How long a dispatched response may sit with an unsubscribed entity
    /// before the slot drops the connection. 0 disables the timeout.
    pub response_entity_subscription_timeout_ms: u64,

    /// How long an idle connection is kept before it is closed.
    /// 0 disables the idle timeout.
    pub connection_idle_timeout_ms: u64,

    /// Upper bound on a connection's total lifetime, checked while idle.
    /// 0 disables the bound.
    pub connection_lifetime_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            min_connections: 0,
            pipelining_limit: 1,
            max_retries: 2,
            response_entity_subscription_timeout_ms: 1_000,
            connection_idle_timeout_ms: 30_000,
            connection_lifetime_ms: 0,
        }
    }
}

impl PoolSettings {
    /// Set the slot count.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the warm-connection floor.
    #[must_use]
    pub fn with_min_connections(mut self, min_connections: usize) -> Self {
        self.min_connections = min_connections;
        self
    }

    /// Set the per-request retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the response entity subscription timeout. `None` disables it.
    #[must_use]
    pub fn with_response_entity_subscription_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_entity_subscription_timeout_ms =
            timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    /// Set the idle timeout for open connections. `None` disables it.
    #[must_use]
    pub fn with_connection_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_idle_timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    /// Set the maximum connection lifetime. `None` disables it.
    #[must_use]
    pub fn with_connection_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.connection_lifetime_ms = lifetime.map_or(0, |t| t.as_millis() as u64);
        self
    }

    /// Decoded view of `response_entity_subscription_timeout_ms`.
    #[must_use]
    pub fn response_entity_subscription_timeout(&self) -> Option<Duration> {
        millis_opt(self.response_entity_subscription_timeout_ms)
    }

    /// Decoded view of `connection_idle_timeout_ms`.
    #[must_use]
    pub fn connection_idle_timeout(&self) -> Option<Duration> {
        millis_opt(self.connection_idle_timeout_ms)
    }

    /// Decoded view of `connection_lifetime_ms`.
    #[must_use]
    pub fn connection_lifetime(&self) -> Option<Duration> {
        millis_opt(self.connection_lifetime_ms)
    }

    /// Check the settings for internal consistency.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_connections == 0 {
            return Err(SettingsError::NoConnections);
        }
        if self.min_connections > self.max_connections {
            return Err(SettingsError::MinAboveMax {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        if self.pipelining_limit != 1 {
            return Err(SettingsError::PipeliningUnsupported(self.pipelining_limit));
        }
        Ok(())
    }
}

fn millis_opt(millis: u64) -> Option<Duration> {
    if millis == 0 {
        None
    } else {
        Some(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::SettingsError;

    #[test]
    fn defaults_are_valid() {
        let settings = PoolSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(
            settings.response_entity_subscription_timeout(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(settings.connection_lifetime(), None);
    }

    #[test]
    fn zero_slots_are_rejected() {
        let settings = PoolSettings::default().with_max_connections(0);
        assert_eq!(settings.validate(), Err(SettingsError::NoConnections));
    }

    #[test]
    fn min_above_max_is_rejected() {
        let settings = PoolSettings::default()
            .with_max_connections(2)
            .with_min_connections(3);
        assert_eq!(
            settings.validate(),
            Err(SettingsError::MinAboveMax { min: 3, max: 2 })
        );
    }

    #[test]
    fn pipelining_is_locked_to_one() {
        let settings = PoolSettings {
            pipelining_limit: 4,
            ..PoolSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(SettingsError::PipeliningUnsupported(4))
        );
    }

    #[test]
    fn builder_round_trips_durations() {
        let settings = PoolSettings::default()
            .with_response_entity_subscription_timeout(Some(Duration::from_millis(250)))
            .with_connection_idle_timeout(None)
            .with_connection_lifetime(Some(Duration::from_secs(60)));

        assert_eq!(
            settings.response_entity_subscription_timeout(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(settings.connection_idle_timeout(), None);
        assert_eq!(settings.connection_lifetime(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let settings = PoolSettings::default()
            .with_max_connections(8)
            .with_min_connections(2);

        let encoded = toml::to_string(&settings).expect("serialize settings");
        let decoded: PoolSettings = toml::from_str(&encoded).expect("parse settings");
        assert_eq!(decoded, settings);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let decoded: PoolSettings =
            toml::from_str("max_connections = 16\n").expect("parse settings");
        assert_eq!(decoded.max_connections, 16);
        assert_eq!(decoded.pipelining_limit, 1);
        assert_eq!(decoded.max_retries, PoolSettings::default().max_retries);
    }
}
