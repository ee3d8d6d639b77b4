// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_STATUS_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse config file: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid value for {var}: {value}")]
	InvalidValue { var: &'static str, value: String },

	#[error("at least one tenant must be configured")]
	NoTenants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
	#[default]
	Azure,
	Google,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
	pub name: String,
	#[serde(default)]
	pub auth_provider: AuthProvider,
}

impl TenantConfig {
	pub fn new(name: impl Into<String>, auth_provider: AuthProvider) -> Self {
		Self {
			name: name.into(),
			auth_provider,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
	/// Log in on the first entry to `Disconnected` without waiting for the user.
	pub auto_connect: bool,
	/// Queue length per status observer; updates beyond it are dropped.
	pub status_queue_capacity: usize,
	#[serde(with = "secs")]
	pub auth_timeout: Duration,
	#[serde(with = "secs")]
	pub enroll_timeout: Duration,
	#[serde(with = "secs")]
	pub helper_timeout: Duration,
	/// Reconnect backoff is `api_retry_base * attempt^3`.
	#[serde(with = "millis")]
	pub api_retry_base: Duration,
	/// Pause between rounds of gateway reachability checks while connected.
	#[serde(with = "secs")]
	pub gateway_check_interval: Duration,
	#[serde(with = "secs")]
	pub gateway_check_timeout: Duration,
	/// The first tenant is active at startup.
	pub tenants: Vec<TenantConfig>,
}

impl Default for AgentConfig {
	fn default() -> Self {
		Self {
			auto_connect: false,
			status_queue_capacity: DEFAULT_STATUS_QUEUE_CAPACITY,
			auth_timeout: Duration::from_secs(60),
			enroll_timeout: Duration::from_secs(60),
			helper_timeout: Duration::from_secs(20),
			api_retry_base: Duration::from_millis(10),
			gateway_check_interval: Duration::from_secs(20),
			gateway_check_timeout: Duration::from_secs(2),
			tenants: vec![TenantConfig::new("default", AuthProvider::Azure)],
		}
	}
}

impl AgentConfig {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		let config: Self = toml::from_str(&contents)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|var| std::env::var(var).ok())
	}

	/// Defaults overridden by `PALISADE_*` variables from `lookup`.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(v) = lookup("PALISADE_AUTO_CONNECT") {
			config.auto_connect = parse_bool("PALISADE_AUTO_CONNECT", &v)?;
		}
		if let Some(v) = lookup("PALISADE_STATUS_QUEUE_CAPACITY") {
			config.status_queue_capacity = parse_number("PALISADE_STATUS_QUEUE_CAPACITY", &v)? as usize;
		}
		if let Some(v) = lookup("PALISADE_AUTH_TIMEOUT_SECS") {
			config.auth_timeout = Duration::from_secs(parse_number("PALISADE_AUTH_TIMEOUT_SECS", &v)?);
		}
		if let Some(v) = lookup("PALISADE_ENROLL_TIMEOUT_SECS") {
			config.enroll_timeout = Duration::from_secs(parse_number("PALISADE_ENROLL_TIMEOUT_SECS", &v)?);
		}
		if let Some(v) = lookup("PALISADE_HELPER_TIMEOUT_SECS") {
			config.helper_timeout = Duration::from_secs(parse_number("PALISADE_HELPER_TIMEOUT_SECS", &v)?);
		}
		if let Some(v) = lookup("PALISADE_GATEWAY_CHECK_INTERVAL_SECS") {
			config.gateway_check_interval =
				Duration::from_secs(parse_number("PALISADE_GATEWAY_CHECK_INTERVAL_SECS", &v)?);
		}

		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.tenants.is_empty() {
			return Err(ConfigError::NoTenants);
		}
		if self.status_queue_capacity == 0 {
			return Err(ConfigError::InvalidValue {
				var: "status_queue_capacity",
				value: "0".to_string(),
			});
		}
		if self.gateway_check_interval.is_zero() {
			return Err(ConfigError::InvalidValue {
				var: "gateway_check_interval",
				value: "0".to_string(),
			});
		}
		Ok(())
	}
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
	palisade_common::env::parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
		var,
		value: value.to_string(),
	})
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::InvalidValue {
		var,
		value: value.to_string(),
	})
}

mod secs {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		duration.as_secs().serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let secs = u64::deserialize(deserializer)?;
		Ok(Duration::from_secs(secs))
	}
}

mod millis {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		(duration.as_millis() as u64).serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let millis = u64::deserialize(deserializer)?;
		Ok(Duration::from_millis(millis))
	}
}
