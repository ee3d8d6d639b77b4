// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::ids::{DeviceId, SessionKey};
use crate::keys::WgPublicKey;
use crate::peer::Peer;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// An enrolled end-user machine.
///
/// Overlay addresses are assigned once and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
	pub id: DeviceId,
	pub serial: String,
	pub username: String,
	#[serde(default)]
	pub platform: String,
	pub public_key: WgPublicKey,
	#[serde(default)]
	pub ipv4: Option<Ipv4Addr>,
	#[serde(default)]
	pub ipv6: Option<Ipv6Addr>,
	/// `None` means no posture report has been received yet.
	#[serde(default)]
	pub healthy: Option<bool>,
	#[serde(default)]
	pub last_health_check: Option<DateTime<Utc>>,
}

impl Device {
	pub fn new(serial: impl Into<String>, username: impl Into<String>, public_key: WgPublicKey) -> Self {
		Self {
			id: DeviceId::new(),
			serial: serial.into(),
			username: username.into(),
			platform: String::new(),
			public_key,
			ipv4: None,
			ipv6: None,
			healthy: None,
			last_health_check: None,
		}
	}

	/// Unknown health counts as unhealthy.
	pub fn is_healthy(&self) -> bool {
		self.healthy == Some(true)
	}

	pub fn set_health(&mut self, healthy: bool, checked_at: DateTime<Utc>) {
		self.healthy = Some(healthy);
		self.last_health_check = Some(checked_at);
	}

	pub fn peer(&self) -> Peer {
		Peer {
			name: self.serial.clone(),
			public_key: self.public_key,
			ipv4: self.ipv4,
			ipv6: self.ipv6,
			allowed_ips: Vec::new(),
			endpoint: None,
		}
	}
}

/// A backend access point and the networks it routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
	pub name: String,
	pub public_key: WgPublicKey,
	#[serde(default)]
	pub endpoint: Option<String>,
	#[serde(default)]
	pub ipv4: Option<Ipv4Addr>,
	#[serde(default)]
	pub ipv6: Option<Ipv6Addr>,
	#[serde(default)]
	pub routes: Vec<IpNet>,
	#[serde(default)]
	pub access_group_ids: Vec<String>,
	#[serde(default)]
	pub requires_privileged_access: bool,
}

impl Gateway {
	pub fn new(name: impl Into<String>, public_key: WgPublicKey) -> Self {
		Self {
			name: name.into(),
			public_key,
			endpoint: None,
			ipv4: None,
			ipv6: None,
			routes: Vec::new(),
			access_group_ids: Vec::new(),
			requires_privileged_access: false,
		}
	}

	pub fn peer(&self) -> Peer {
		Peer {
			name: self.name.clone(),
			public_key: self.public_key,
			ipv4: self.ipv4,
			ipv6: self.ipv6,
			allowed_ips: self.routes.clone(),
			endpoint: self.endpoint.clone(),
		}
	}
}

/// An authenticated principal bound to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	pub key: SessionKey,
	pub device_id: DeviceId,
	/// Identity-provider object id of the principal.
	pub object_id: String,
	#[serde(default)]
	pub groups: Vec<String>,
	pub expiry: DateTime<Utc>,
}

impl Session {
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		self.expiry <= now
	}

	pub fn is_expired(&self) -> bool {
		self.is_expired_at(Utc::now())
	}
}
