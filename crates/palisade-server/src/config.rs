// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{Ipv4Addr, Ipv6Addr};

const DEFAULT_IPV4_NETWORK: Ipv4Addr = Ipv4Addr::new(10, 255, 240, 0);
const DEFAULT_IPV4_PREFIX_LEN: u8 = 21;
const DEFAULT_IPV6_NETWORK: Ipv6Addr = Ipv6Addr::new(0xfd75, 0x568f, 0x0d24, 0x0001, 0, 0, 0, 0);
const DEFAULT_IPV6_PREFIX_LEN: u8 = 64;
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub ipv4_prefix: Ipv4Net,
	pub ipv6_prefix: Ipv6Net,
	/// Addresses never handed out, e.g. the API server's own tunnel address.
	pub reserved_ipv4: Vec<Ipv4Addr>,
	/// Health given to devices that have not been checked yet.
	pub default_device_health: bool,
	/// Per-subscriber push queue length.
	pub stream_capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("invalid IPv4 prefix: {0}")]
	InvalidIpv4Prefix(String),

	#[error("invalid IPv6 prefix: {0}")]
	InvalidIpv6Prefix(String),

	#[error("invalid reserved address: {0}")]
	InvalidReservedAddress(String),

	#[error("reserved address {0} is outside {1}")]
	ReservedOutsidePrefix(Ipv4Addr, Ipv4Net),

	#[error("invalid value for {var}: {value}")]
	InvalidValue { var: &'static str, value: String },
}

fn default_ipv4_prefix() -> Ipv4Net {
	Ipv4Net::new(DEFAULT_IPV4_NETWORK, DEFAULT_IPV4_PREFIX_LEN)
		.unwrap_or_else(|_| Ipv4Net::from(DEFAULT_IPV4_NETWORK))
}

fn default_ipv6_prefix() -> Ipv6Net {
	Ipv6Net::new(DEFAULT_IPV6_NETWORK, DEFAULT_IPV6_PREFIX_LEN)
		.unwrap_or_else(|_| Ipv6Net::from(DEFAULT_IPV6_NETWORK))
}

/// First host address of the prefix; the API server sits there by convention.
fn first_host(prefix: &Ipv4Net) -> Ipv4Addr {
	prefix.hosts().next().unwrap_or_else(|| prefix.network())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
	palisade_common::env::parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
		var,
		value: value.to_string(),
	})
}

impl Default for ServerConfig {
	fn default() -> Self {
		let ipv4_prefix = default_ipv4_prefix();
		Self {
			reserved_ipv4: vec![first_host(&ipv4_prefix)],
			ipv4_prefix,
			ipv6_prefix: default_ipv6_prefix(),
			default_device_health: false,
			stream_capacity: DEFAULT_STREAM_CAPACITY,
		}
	}
}

impl ServerConfig {
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|var| std::env::var(var).ok())
	}

	/// Builds the config from an arbitrary variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let ipv4_prefix: Ipv4Net = match lookup("PALISADE_WG_IPV4_PREFIX") {
			Some(v) => v
				.trim()
				.parse()
				.map_err(|e| ConfigError::InvalidIpv4Prefix(format!("{v}: {e}")))?,
			None => default_ipv4_prefix(),
		};

		let ipv6_prefix: Ipv6Net = match lookup("PALISADE_WG_IPV6_PREFIX") {
			Some(v) => v
				.trim()
				.parse()
				.map_err(|e| ConfigError::InvalidIpv6Prefix(format!("{v}: {e}")))?,
			None => default_ipv6_prefix(),
		};

		let reserved_ipv4 = match lookup("PALISADE_APISERVER_WG_IP") {
			Some(v) => v
				.split(',')
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(|s| {
					s.parse::<Ipv4Addr>()
						.map_err(|e| ConfigError::InvalidReservedAddress(format!("{s}: {e}")))
				})
				.collect::<Result<Vec<_>, _>>()?,
			None => vec![first_host(&ipv4_prefix)],
		};

		if let Some(outside) = reserved_ipv4.iter().find(|ip| !ipv4_prefix.contains(*ip)) {
			return Err(ConfigError::ReservedOutsidePrefix(*outside, ipv4_prefix));
		}

		let default_device_health = match lookup("PALISADE_DEFAULT_DEVICE_HEALTH") {
			Some(v) => parse_bool("PALISADE_DEFAULT_DEVICE_HEALTH", &v)?,
			None => false,
		};

		let stream_capacity = match lookup("PALISADE_STREAM_CAPACITY") {
			Some(v) => match v.trim().parse::<usize>() {
				Ok(n) if n > 0 => n,
				_ => {
					return Err(ConfigError::InvalidValue {
						var: "PALISADE_STREAM_CAPACITY",
						value: v,
					})
				}
			},
			None => DEFAULT_STREAM_CAPACITY,
		};

		Ok(Self {
			ipv4_prefix,
			ipv6_prefix,
			reserved_ipv4,
			default_device_health,
			stream_capacity,
		})
	}
}
