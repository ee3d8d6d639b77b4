// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read/assign interface over the device, gateway and session records.
//!
//! Persistence is external; the control plane only relies on every call
//! being linearizable per entity. [`MemoryDirectory`] is the in-process
//! implementation used by tests and by embedders that keep state elsewhere.

use crate::error::ErrorKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palisade_common::{Device, DeviceId, Gateway, Session, SessionKey, WgPublicKey};
use std::net::IpAddr;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum DirectoryError {
	#[error("directory unavailable: {0}")]
	Unavailable(String),

	#[error("unknown entity: {0}")]
	UnknownEntity(String),

	#[error("address {0} is already held by another entity")]
	AddressInUse(IpAddr),

	#[error("{0} already has an address of that family")]
	AddressAlreadyAssigned(String),
}

impl DirectoryError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			DirectoryError::Unavailable(_) => ErrorKind::Transient,
			DirectoryError::UnknownEntity(_) => ErrorKind::NotFound,
			DirectoryError::AddressInUse(_) | DirectoryError::AddressAlreadyAssigned(_) => {
				ErrorKind::Conflict
			}
		}
	}
}

/// How a device is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
	Id(DeviceId),
	Serial(String),
	PublicKey(WgPublicKey),
}

impl DeviceSelector {
	fn matches(&self, device: &Device) -> bool {
		match self {
			DeviceSelector::Id(id) => device.id == *id,
			DeviceSelector::Serial(serial) => device.serial == *serial,
			DeviceSelector::PublicKey(key) => device.public_key == *key,
		}
	}
}

/// Entity that can hold overlay addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
	Device(DeviceId),
	Gateway(String),
}

impl std::fmt::Display for EntityRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			EntityRef::Device(id) => write!(f, "device {id}"),
			EntityRef::Gateway(name) => write!(f, "gateway {name}"),
		}
	}
}

#[async_trait]
pub trait Directory: Send + Sync {
	/// Returns `None` for unknown and for expired sessions.
	async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, DirectoryError>;

	/// All non-expired sessions.
	async fn list_sessions(&self) -> Result<Vec<Session>, DirectoryError>;

	async fn get_device(&self, selector: &DeviceSelector) -> Result<Option<Device>, DirectoryError>;

	async fn list_devices(&self) -> Result<Vec<Device>, DirectoryError>;

	async fn get_gateway(&self, name: &str) -> Result<Option<Gateway>, DirectoryError>;

	async fn list_gateways(&self) -> Result<Vec<Gateway>, DirectoryError>;

	/// Persists an overlay address. Fails if the entity already holds one of
	/// the same family or another entity holds `address`.
	async fn assign_address(&self, entity: &EntityRef, address: IpAddr) -> Result<(), DirectoryError>;
}

#[derive(Default)]
struct Records {
	devices: Vec<Device>,
	gateways: Vec<Gateway>,
	sessions: Vec<Session>,
}

impl Records {
	fn address_in_use(&self, address: IpAddr) -> bool {
		let held = |v4: Option<std::net::Ipv4Addr>, v6: Option<std::net::Ipv6Addr>| match address {
			IpAddr::V4(a) => v4 == Some(a),
			IpAddr::V6(a) => v6 == Some(a),
		};
		self.devices.iter().any(|d| held(d.ipv4, d.ipv6))
			|| self.gateways.iter().any(|g| held(g.ipv4, g.ipv6))
	}
}

/// Insertion-ordered in-memory directory.
#[derive(Default)]
pub struct MemoryDirectory {
	records: RwLock<Records>,
}

impl MemoryDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces (by id) a device record.
	pub async fn upsert_device(&self, device: Device) {
		let mut records = self.records.write().await;
		match records.devices.iter_mut().find(|d| d.id == device.id) {
			Some(existing) => *existing = device,
			None => records.devices.push(device),
		}
	}

	/// Removing a device frees its addresses for reuse by the v4 pool.
	pub async fn remove_device(&self, id: DeviceId) -> Option<Device> {
		let mut records = self.records.write().await;
		let pos = records.devices.iter().position(|d| d.id == id)?;
		Some(records.devices.remove(pos))
	}

	/// Inserts or replaces (by name) a gateway record.
	pub async fn upsert_gateway(&self, gateway: Gateway) {
		let mut records = self.records.write().await;
		match records.gateways.iter_mut().find(|g| g.name == gateway.name) {
			Some(existing) => *existing = gateway,
			None => records.gateways.push(gateway),
		}
	}

	pub async fn remove_gateway(&self, name: &str) -> Option<Gateway> {
		let mut records = self.records.write().await;
		let pos = records.gateways.iter().position(|g| g.name == name)?;
		Some(records.gateways.remove(pos))
	}

	pub async fn insert_session(&self, session: Session) {
		let mut records = self.records.write().await;
		match records.sessions.iter_mut().find(|s| s.key == session.key) {
			Some(existing) => *existing = session,
			None => records.sessions.push(session),
		}
	}

	pub async fn remove_session(&self, key: &SessionKey) -> Option<Session> {
		let mut records = self.records.write().await;
		let pos = records.sessions.iter().position(|s| s.key == *key)?;
		Some(records.sessions.remove(pos))
	}

	#[instrument(skip(self), fields(%id, healthy))]
	pub async fn set_device_health(
		&self,
		id: DeviceId,
		healthy: bool,
		checked_at: DateTime<Utc>,
	) -> Result<(), DirectoryError> {
		let mut records = self.records.write().await;
		let device = records
			.devices
			.iter_mut()
			.find(|d| d.id == id)
			.ok_or_else(|| DirectoryError::UnknownEntity(format!("device {id}")))?;
		device.set_health(healthy, checked_at);
		Ok(())
	}
}

#[async_trait]
impl Directory for MemoryDirectory {
	async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, DirectoryError> {
		let now = Utc::now();
		let records = self.records.read().await;
		Ok(records
			.sessions
			.iter()
			.find(|s| s.key == *key && !s.is_expired_at(now))
			.cloned())
	}

	async fn list_sessions(&self) -> Result<Vec<Session>, DirectoryError> {
		let now = Utc::now();
		let records = self.records.read().await;
		Ok(records
			.sessions
			.iter()
			.filter(|s| !s.is_expired_at(now))
			.cloned()
			.collect())
	}

	async fn get_device(&self, selector: &DeviceSelector) -> Result<Option<Device>, DirectoryError> {
		let records = self.records.read().await;
		Ok(records.devices.iter().find(|d| selector.matches(d)).cloned())
	}

	async fn list_devices(&self) -> Result<Vec<Device>, DirectoryError> {
		Ok(self.records.read().await.devices.clone())
	}

	async fn get_gateway(&self, name: &str) -> Result<Option<Gateway>, DirectoryError> {
		let records = self.records.read().await;
		Ok(records.gateways.iter().find(|g| g.name == name).cloned())
	}

	async fn list_gateways(&self) -> Result<Vec<Gateway>, DirectoryError> {
		Ok(self.records.read().await.gateways.clone())
	}

	#[instrument(skip(self), fields(%entity, %address))]
	async fn assign_address(&self, entity: &EntityRef, address: IpAddr) -> Result<(), DirectoryError> {
		let mut records = self.records.write().await;
		if records.address_in_use(address) {
			return Err(DirectoryError::AddressInUse(address));
		}

		let (v4, v6) = match entity {
			EntityRef::Device(id) => {
				let device = records
					.devices
					.iter_mut()
					.find(|d| d.id == *id)
					.ok_or_else(|| DirectoryError::UnknownEntity(entity.to_string()))?;
				(&mut device.ipv4, &mut device.ipv6)
			}
			EntityRef::Gateway(name) => {
				let gateway = records
					.gateways
					.iter_mut()
					.find(|g| g.name == *name)
					.ok_or_else(|| DirectoryError::UnknownEntity(entity.to_string()))?;
				(&mut gateway.ipv4, &mut gateway.ipv6)
			}
		};

		match address {
			IpAddr::V4(a) => {
				if v4.is_some() {
					return Err(DirectoryError::AddressAlreadyAssigned(entity.to_string()));
				}
				*v4 = Some(a);
			}
			IpAddr::V6(a) => {
				if v6.is_some() {
					return Err(DirectoryError::AddressAlreadyAssigned(entity.to_string()));
				}
				*v6 = Some(a);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	fn key(b: u8) -> WgPublicKey {
		WgPublicKey::from_bytes([b; 32])
	}

	fn session(key: &str, device_id: DeviceId, expiry: DateTime<Utc>) -> Session {
		Session {
			key: SessionKey::new(key),
			device_id,
			object_id: "user-1".to_string(),
			groups: vec![],
			expiry,
		}
	}

	#[tokio::test]
	async fn expired_sessions_are_invisible() {
		let dir = MemoryDirectory::new();
		let device = Device::new("serial-1", "alice", key(1));
		let now = Utc::now();
		dir.insert_session(session("live", device.id, now + Duration::hours(1)))
			.await;
		dir.insert_session(session("old", device.id, now - Duration::seconds(1)))
			.await;

		assert!(dir.get_session(&SessionKey::new("live")).await.unwrap().is_some());
		assert!(dir.get_session(&SessionKey::new("old")).await.unwrap().is_none());
		assert_eq!(dir.list_sessions().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn device_lookup_by_each_selector() {
		let dir = MemoryDirectory::new();
		let device = Device::new("serial-1", "alice", key(7));
		dir.upsert_device(device.clone()).await;

		for selector in [
			DeviceSelector::Id(device.id),
			DeviceSelector::Serial("serial-1".to_string()),
			DeviceSelector::PublicKey(key(7)),
		] {
			let found = dir.get_device(&selector).await.unwrap();
			assert_eq!(found.map(|d| d.id), Some(device.id));
		}
		assert!(dir
			.get_device(&DeviceSelector::Serial("other".to_string()))
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn upsert_keeps_insertion_order() {
		let dir = MemoryDirectory::new();
		dir.upsert_gateway(Gateway::new("b", key(1))).await;
		dir.upsert_gateway(Gateway::new("a", key(2))).await;
		let mut replaced = Gateway::new("b", key(3));
		replaced.routes = vec!["10.0.0.0/8".parse().unwrap()];
		dir.upsert_gateway(replaced).await;

		let names: Vec<_> = dir
			.list_gateways()
			.await
			.unwrap()
			.into_iter()
			.map(|g| (g.name, g.routes.len()))
			.collect();
		assert_eq!(names, vec![("b".to_string(), 1), ("a".to_string(), 0)]);
	}

	#[tokio::test]
	async fn assign_address_is_stable_and_unique() {
		let dir = MemoryDirectory::new();
		let a = Device::new("a", "alice", key(1));
		let b = Device::new("b", "bob", key(2));
		dir.upsert_device(a.clone()).await;
		dir.upsert_device(b.clone()).await;

		let ip: IpAddr = "10.0.0.2".parse().unwrap();
		dir.assign_address(&EntityRef::Device(a.id), ip).await.unwrap();

		let again = dir
			.assign_address(&EntityRef::Device(a.id), "10.0.0.3".parse().unwrap())
			.await;
		assert!(matches!(again, Err(DirectoryError::AddressAlreadyAssigned(_))));

		let taken = dir.assign_address(&EntityRef::Device(b.id), ip).await;
		assert!(matches!(taken, Err(DirectoryError::AddressInUse(_))));

		let missing = dir
			.assign_address(&EntityRef::Gateway("nope".to_string()), ip)
			.await;
		assert!(matches!(missing, Err(DirectoryError::AddressInUse(_))));

		let missing = dir
			.assign_address(
				&EntityRef::Gateway("nope".to_string()),
				"10.0.0.9".parse().unwrap(),
			)
			.await;
		assert!(matches!(missing, Err(DirectoryError::UnknownEntity(_))));
	}

	#[tokio::test]
	async fn set_health_on_unknown_device_fails() {
		let dir = MemoryDirectory::new();
		let result = dir.set_device_health(DeviceId::new(), true, Utc::now()).await;
		assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
	}
}
