// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration types.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::event::DeviceId;
use crate::protocol::{Endpoint, ReadPolicy};

/// Setting key holding the appliance address.
pub const ADDRESS_KEY: &str = "address";
/// Setting key holding the appliance token.
pub const TOKEN_KEY: &str = "token";
/// Setting key holding the poll interval in seconds.
pub const POLLING_KEY: &str = "polling";

/// Settings whose change requires a new connection.
pub const CONNECTION_KEYS: &[&str] = &[ADDRESS_KEY, TOKEN_KEY, POLLING_KEY];

/// Default time between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for one appliance.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use miot_sync::DeviceConfig;
///
/// let config = DeviceConfig::new("192.168.1.40", "0123456789abcdef0123456789abcdef", "miot.airp.v1")
///     .with_friendly_name("Bedroom purifier")
///     .with_poll_interval(Duration::from_secs(15));
///
/// assert_eq!(config.poll_interval, Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Stable identifier; keys the durable derived-state record.
    pub id: DeviceId,
    /// Address and token.
    pub endpoint: Endpoint,
    /// Model identifier used to resolve the address table.
    pub model: String,
    /// Optional friendly name for display.
    pub friendly_name: Option<String>,
    /// Time between two polls.
    pub poll_interval: Duration,
    /// Chunking and timeouts for remote calls.
    pub read_policy: ReadPolicy,
    /// Reconnection behavior after a failure.
    pub reconnection: ReconnectionPolicy,
    /// Offset of the local day used by daily counters.
    pub utc_offset: FixedOffset,
}

impl DeviceConfig {
    /// Creates a configuration with default policies.
    #[must_use]
    pub fn new(address: impl Into<String>, token: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(),
            endpoint: Endpoint::new(address, token),
            model: model.into(),
            friendly_name: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_policy: ReadPolicy::default(),
            reconnection: ReconnectionPolicy::default(),
            utc_offset: utc(),
        }
    }

    /// Builds a configuration from the host settings map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `address` or `token` is missing or any
    /// connection key has the wrong type.
    pub fn from_settings(settings: &Map<String, Value>, model: impl Into<String>) -> Result<Self> {
        let address = required_str(settings, ADDRESS_KEY)?;
        let token = required_str(settings, TOKEN_KEY)?;
        let mut config = Self::new(address, token, model);
        if let Some(value) = settings.get(POLLING_KEY) {
            config.poll_interval = parse_polling(value)?;
        }
        Ok(config)
    }

    /// Applies changed settings, returning `true` if a connection key changed.
    ///
    /// Non-connection keys are ignored here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a connection key has the wrong type; the
    /// configuration is left unchanged.
    pub fn apply_settings(&mut self, changes: &Map<String, Value>) -> Result<bool> {
        let mut next = self.clone();
        if let Some(value) = changes.get(ADDRESS_KEY) {
            let address = as_str(value, ADDRESS_KEY)?;
            next.endpoint = Endpoint::new(address, next.endpoint.token());
        }
        if let Some(value) = changes.get(TOKEN_KEY) {
            let token = as_str(value, TOKEN_KEY)?;
            next.endpoint = Endpoint::new(next.endpoint.address(), token);
        }
        if let Some(value) = changes.get(POLLING_KEY) {
            next.poll_interval = parse_polling(value)?;
        }

        let changed = next.endpoint != self.endpoint || next.poll_interval != self.poll_interval;
        *self = next;
        Ok(changed)
    }

    /// Returns `true` if changing `key` requires a new connection.
    #[must_use]
    pub fn is_connection_key(key: &str) -> bool {
        CONNECTION_KEYS.contains(&key)
    }

    /// Uses a stable identifier.
    #[must_use]
    pub fn with_id(mut self, id: DeviceId) -> Self {
        self.id = id;
        self
    }

    /// Sets a friendly name for the device.
    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    /// Sets the poll interval.
    ///
    /// A zero interval is rejected when the device is built.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the read policy.
    #[must_use]
    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets the offset of the local day.
    #[must_use]
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn as_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Config(format!("setting {key} must be a non-empty string")))
}

fn required_str<'a>(settings: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .ok_or_else(|| Error::Config(format!("missing setting {key}")))
        .and_then(|v| as_str(v, key))
}

fn parse_polling(value: &Value) -> Result<Duration> {
    let seconds = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match seconds {
        Some(s) if s > 0 => Ok(Duration::from_secs(s)),
        _ => Err(Error::Config(format!(
            "setting {POLLING_KEY} must be a positive number of seconds, got {value}"
        ))),
    }
}

/// Policy for reconnecting after a failure.
///
/// The default schedules one attempt 60 s after each failure, forever. A
/// backoff multiplier above `1.0` stretches the delay after consecutive
/// failures, capped at `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use miot_sync::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::default()
///     .with_backoff_multiplier(2.0)
///     .with_max_delay(Duration::from_secs(600));
///
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(60));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(120));
/// assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Maximum consecutive attempts; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts.
    pub backoff_multiplier: f64,
}

impl ReconnectionPolicy {
    /// Creates the default fixed-delay policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that never reconnects automatically.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Limits the number of consecutive attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the delay before the first attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor. Values below `1.0` are treated as `1.0`.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Returns the delay before attempt number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let delay = self.initial_delay.mul_f64(multiplier.min(1.0e6));
        delay.min(self.max_delay.max(self.initial_delay))
    }

    /// Returns `true` if attempt number `attempt` should be made.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
        }
    }
}
