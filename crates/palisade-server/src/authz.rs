// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer authorization and health gate.
//!
//! Pure projections from directory records to the peers a party may see.
//! Unhealthy or unauthorized outcomes are data, never errors.
//!
//! Records are taken by reference, so a missing device or gateway cannot
//! reach these functions. The registries report it from the directory lookup
//! as `DeviceNotFound` / `GatewayNotFound` before anything is computed.

use async_trait::async_trait;
use palisade_common::{Device, DeviceConfiguration, Gateway, Peer, Session};
use std::collections::HashSet;

use crate::directory::DirectoryError;

pub(crate) fn has_intersection(a: &[String], b: &[String]) -> bool {
	a.iter().any(|x| b.contains(x))
}

/// Gateways a device may reach, or `Unhealthy` with no peers.
///
/// Gateways keep the directory's iteration order. `device` must be a record
/// already loaded from the directory.
pub fn compute_device_peers(device: &Device, gateways: &[Gateway], user_groups: &[String]) -> DeviceConfiguration {
	if !device.is_healthy() {
		return DeviceConfiguration::unhealthy();
	}

	let peers = gateways
		.iter()
		.filter(|gw| has_intersection(&gw.access_group_ids, user_groups))
		.map(Gateway::peer)
		.collect();
	DeviceConfiguration::healthy(peers)
}

/// Healthy devices only; everything else is silently excluded. Takes the
/// loaded device list, never a lookup that may miss.
pub fn compute_gateway_peers(devices: &[Device]) -> Vec<Peer> {
	devices.iter().filter(|d| d.is_healthy()).map(Device::peer).collect()
}

/// Devices of live sessions that may reach `gateway`, one peer per device.
pub fn compute_gateway_session_peers(
	gateway: &Gateway,
	sessions: &[(Session, Device)],
	privileged_users: &[String],
) -> Vec<Peer> {
	let mut seen = HashSet::new();
	sessions
		.iter()
		.filter(|(session, _)| {
			!gateway.requires_privileged_access || privileged_users.contains(&session.object_id)
		})
		.filter(|(session, _)| has_intersection(&gateway.access_group_ids, &session.groups))
		.filter(|(_, device)| device.is_healthy())
		.filter(|(_, device)| seen.insert(device.id))
		.map(|(_, device)| device.peer())
		.collect()
}

/// Source of principals currently granted just-in-time access to a gateway.
#[async_trait]
pub trait PrivilegedAccess: Send + Sync {
	async fn privileged_users(&self, gateway: &str) -> Result<Vec<String>, DirectoryError>;
}

/// Nobody is privileged; gateways that require it receive no devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrivilegedAccess;

#[async_trait]
impl PrivilegedAccess for NoPrivilegedAccess {
	async fn privileged_users(&self, _gateway: &str) -> Result<Vec<String>, DirectoryError> {
		Ok(Vec::new())
	}
}
