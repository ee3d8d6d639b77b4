// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::WgPublicKey;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Tunnel-facing projection of a device or gateway. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
	pub name: String,
	pub public_key: WgPublicKey,
	#[serde(default)]
	pub ipv4: Option<Ipv4Addr>,
	#[serde(default)]
	pub ipv6: Option<Ipv6Addr>,
	/// Routed networks behind the peer. Empty for devices.
	#[serde(default)]
	pub allowed_ips: Vec<IpNet>,
	#[serde(default)]
	pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConfigStatus {
	Healthy,
	Unhealthy,
}

/// One update on a device's push stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
	pub status: DeviceConfigStatus,
	#[serde(default)]
	pub gateways: Vec<Peer>,
}

impl DeviceConfiguration {
	pub fn healthy(gateways: Vec<Peer>) -> Self {
		Self {
			status: DeviceConfigStatus::Healthy,
			gateways,
		}
	}

	pub fn unhealthy() -> Self {
		Self {
			status: DeviceConfigStatus::Unhealthy,
			gateways: Vec::new(),
		}
	}

	pub fn is_healthy(&self) -> bool {
		self.status == DeviceConfigStatus::Healthy
	}
}

/// One update on a gateway's push stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayConfiguration {
	#[serde(default)]
	pub devices: Vec<Peer>,
	#[serde(default)]
	pub routes: Vec<IpNet>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unhealthy_has_no_gateways() {
		let cfg = DeviceConfiguration::unhealthy();
		assert!(!cfg.is_healthy());
		assert!(cfg.gateways.is_empty());
	}

	#[test]
	fn status_wire_format() {
		let cfg = DeviceConfiguration::unhealthy();
		let json = serde_json::to_value(&cfg).unwrap();
		assert_eq!(json["status"], "unhealthy");
		assert_eq!(json["gateways"], serde_json::json!([]));
	}

	#[test]
	fn peer_optional_fields_default() {
		let key = WgPublicKey::from_bytes([3u8; 32]);
		let json = format!(r#"{{"name":"gw","public_key":"{}"}}"#, key.to_base64());
		let peer: Peer = serde_json::from_str(&json).unwrap();
		assert_eq!(peer.public_key, key);
		assert!(peer.ipv4.is_none());
		assert!(peer.allowed_ips.is_empty());
		assert!(peer.endpoint.is_none());
	}
}
