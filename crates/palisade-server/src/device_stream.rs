// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::authz::compute_device_peers;
use crate::directory::{DeviceSelector, Directory};
use crate::error::{Result, ServerError};
use crate::metrics::PushMetrics;
use crate::streams::{KeyedLocks, SendFailure, StreamHandle, StreamSet};
use palisade_common::{DeviceConfiguration, DeviceId, SessionKey};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of a sweep over many streams. Failures are logged, not returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
	pub attempted: usize,
	pub failed: usize,
}

impl PushSummary {
	fn record<T>(&mut self, result: &Result<T>) {
		self.attempted += 1;
		if result.is_err() {
			self.failed += 1;
		}
	}
}

/// One live configuration stream per session key.
pub struct SessionStreamRegistry {
	streams: StreamSet<SessionKey, DeviceConfiguration>,
	pushes: KeyedLocks<SessionKey>,
	directory: Arc<dyn Directory>,
	metrics: Arc<PushMetrics>,
	capacity: usize,
}

impl SessionStreamRegistry {
	pub fn new(directory: Arc<dyn Directory>, metrics: Arc<PushMetrics>, capacity: usize) -> Self {
		Self {
			streams: StreamSet::new(),
			pushes: KeyedLocks::new(),
			directory,
			metrics,
			capacity: capacity.max(1),
		}
	}

	/// Installs `tx` as the session's subscriber. A previous subscriber for
	/// the same key is replaced and receives nothing further.
	#[instrument(skip(self, tx), fields(session = ?key))]
	pub fn register(&self, key: SessionKey, tx: mpsc::Sender<DeviceConfiguration>) -> StreamHandle {
		let (handle, replaced) = self.streams.insert(key, tx);
		if replaced {
			info!(handle = handle.id(), "replaced existing config stream");
		} else {
			debug!(handle = handle.id(), "registered config stream");
		}
		self.update_gauge();
		handle
	}

	/// Creates a bounded channel and registers its sender.
	pub fn subscribe(&self, key: SessionKey) -> (StreamHandle, mpsc::Receiver<DeviceConfiguration>) {
		let (tx, rx) = mpsc::channel(self.capacity);
		(self.register(key, tx), rx)
	}

	/// Subscribes and sends the session its current configuration straight
	/// away. A failed first push is logged; the stream stays open for later
	/// pushes.
	#[instrument(skip(self), fields(session = ?key))]
	pub async fn connect(&self, key: SessionKey) -> (StreamHandle, mpsc::Receiver<DeviceConfiguration>) {
		let (handle, rx) = self.subscribe(key.clone());
		if let Err(e) = self.push(&key).await {
			error!(error = %e, "send initial device configuration");
		}
		(handle, rx)
	}

	/// No-op unless `handle` is still the current registration.
	#[instrument(skip(self), fields(session = ?key, handle = handle.id()))]
	pub fn unregister(&self, key: &SessionKey, handle: StreamHandle) -> bool {
		let removed = self.streams.remove_if_current(key, handle);
		if removed {
			debug!("unregistered config stream");
			self.update_gauge();
		} else {
			debug!("stale unregister ignored");
		}
		removed
	}

	pub fn is_registered(&self, key: &SessionKey) -> bool {
		self.streams.contains(key)
	}

	pub fn connected(&self) -> usize {
		self.streams.len()
	}

	/// Recomputes the session's configuration and sends it to the current
	/// subscriber. Directory errors are returned unchanged.
	///
	/// Pushes for one session run one at a time, from directory read to send,
	/// so a slow push can never overwrite the result of a later one.
	#[instrument(skip(self), fields(session = ?key))]
	pub async fn push(&self, key: &SessionKey) -> Result<()> {
		self.pushes.run(key, self.push_serialized(key)).await
	}

	async fn push_serialized(&self, key: &SessionKey) -> Result<()> {
		if !self.streams.contains(key) {
			return Err(ServerError::NoActiveStream);
		}

		let session = self
			.directory
			.get_session(key)
			.await?
			.ok_or(ServerError::SessionNotFound)?;
		let device = self
			.directory
			.get_device(&DeviceSelector::Id(session.device_id))
			.await?
			.ok_or(ServerError::DeviceNotFound)?;

		let config = if device.is_healthy() {
			let gateways = self.directory.list_gateways().await?;
			compute_device_peers(&device, &gateways, &session.groups)
		} else {
			DeviceConfiguration::unhealthy()
		};
		let healthy = config.is_healthy();
		let peers = config.gateways.len();

		match self.streams.send(key, config) {
			Ok(_) => {}
			Err(SendFailure::NotRegistered) => return Err(ServerError::NoActiveStream),
			Err(SendFailure::Full) => return Err(ServerError::StreamBackpressure),
			Err(SendFailure::Closed) => {
				self.update_gauge();
				return Err(ServerError::StreamClosed);
			}
		}

		if healthy {
			self.metrics.record_device_config(&device.serial, &device.username);
		}
		debug!(serial = %device.serial, healthy, peers, "pushed device config");
		Ok(())
	}

	/// Pushes to every live session of one device.
	#[instrument(skip(self), fields(%device_id))]
	pub async fn push_device(&self, device_id: DeviceId) -> Result<PushSummary> {
		let sessions = self.directory.list_sessions().await?;
		let mut summary = PushSummary::default();
		for session in sessions.iter().filter(|s| s.device_id == device_id) {
			if !self.streams.contains(&session.key) {
				continue;
			}
			let result = self.push(&session.key).await;
			if let Err(e) = &result {
				warn!(session = ?session.key, error = %e, "device push failed");
			}
			summary.record(&result);
		}
		Ok(summary)
	}

	/// Pushes to every registered session without stopping at failures.
	#[instrument(skip(self))]
	pub async fn push_all(&self) -> PushSummary {
		let mut summary = PushSummary::default();
		for key in self.streams.keys() {
			let result = self.push(&key).await;
			if let Err(e) = &result {
				warn!(session = ?key, error = %e, "device push failed");
			}
			summary.record(&result);
		}
		summary
	}

	fn update_gauge(&self) {
		self.metrics.devices_connected.set(self.streams.len() as f64);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::directory::{DirectoryError, EntityRef, MemoryDirectory};
	use async_trait::async_trait;
	use chrono::{Duration, Utc};
	use palisade_common::{Device, DeviceConfigStatus, Gateway, Session, WgPublicKey};
	use std::net::IpAddr;
	use std::sync::atomic::{AtomicBool, Ordering};
	use tokio::sync::Notify;

	struct Fixture {
		dir: Arc<MemoryDirectory>,
		metrics: Arc<PushMetrics>,
		registry: SessionStreamRegistry,
		device: Device,
		key: SessionKey,
	}

	async fn fixture(healthy: Option<bool>) -> Fixture {
		let dir = Arc::new(MemoryDirectory::new());
		let metrics = Arc::new(PushMetrics::new().unwrap());

		let mut device = Device::new("serial-1", "alice", WgPublicKey::from_bytes([1; 32]));
		device.healthy = healthy;
		dir.upsert_device(device.clone()).await;

		let mut gw = Gateway::new("gw-1", WgPublicKey::from_bytes([2; 32]));
		gw.access_group_ids = vec!["eng".to_string()];
		dir.upsert_gateway(gw).await;

		let key = SessionKey::new("session-1");
		dir.insert_session(Session {
			key: key.clone(),
			device_id: device.id,
			object_id: "alice-oid".to_string(),
			groups: vec!["eng".to_string()],
			expiry: Utc::now() + Duration::hours(1),
		})
		.await;

		let registry = SessionStreamRegistry::new(dir.clone(), metrics.clone(), 4);
		Fixture {
			dir,
			metrics,
			registry,
			device,
			key,
		}
	}

	#[tokio::test]
	async fn push_without_stream_is_not_found() {
		let f = fixture(Some(true)).await;
		let err = f.registry.push(&f.key).await.unwrap_err();
		assert!(matches!(err, ServerError::NoActiveStream));
	}

	#[tokio::test]
	async fn healthy_push_delivers_authorized_gateways() {
		let f = fixture(Some(true)).await;
		let (_handle, mut rx) = f.registry.subscribe(f.key.clone());

		f.registry.push(&f.key).await.unwrap();
		let config = rx.recv().await.unwrap();
		assert_eq!(config.status, DeviceConfigStatus::Healthy);
		assert_eq!(config.gateways.len(), 1);
		assert_eq!(
			f.metrics
				.device_configs_returned
				.with_label_values(&["serial-1", "alice"])
				.get(),
			1.0
		);
	}

	#[tokio::test]
	async fn unhealthy_push_is_not_counted() {
		let f = fixture(None).await;
		let (_handle, mut rx) = f.registry.subscribe(f.key.clone());

		f.registry.push(&f.key).await.unwrap();
		let config = rx.recv().await.unwrap();
		assert_eq!(config, DeviceConfiguration::unhealthy());
		assert_eq!(
			f.metrics
				.device_configs_returned
				.with_label_values(&["serial-1", "alice"])
				.get(),
			0.0
		);
	}

	#[tokio::test]
	async fn replacement_receives_subsequent_pushes() {
		let f = fixture(Some(true)).await;
		let (old, mut old_rx) = f.registry.subscribe(f.key.clone());
		let (new, mut new_rx) = f.registry.subscribe(f.key.clone());
		assert_eq!(f.registry.connected(), 1);

		f.registry.push(&f.key).await.unwrap();
		assert!(new_rx.recv().await.is_some());
		assert!(old_rx.recv().await.is_none());

		assert!(!f.registry.unregister(&f.key, old));
		f.registry.push(&f.key).await.unwrap();
		assert!(new_rx.recv().await.is_some());

		assert!(f.registry.unregister(&f.key, new));
		assert_eq!(f.metrics.devices_connected.get(), 0.0);
	}

	#[tokio::test]
	async fn expired_or_removed_session_is_not_found() {
		let f = fixture(Some(true)).await;
		let (_handle, _rx) = f.registry.subscribe(f.key.clone());
		f.dir.remove_session(&f.key).await;

		let err = f.registry.push(&f.key).await.unwrap_err();
		assert!(matches!(err, ServerError::SessionNotFound));
	}

	#[tokio::test]
	async fn missing_device_is_not_found() {
		let f = fixture(Some(true)).await;
		let (_handle, _rx) = f.registry.subscribe(f.key.clone());
		f.dir.remove_device(f.device.id).await;

		let err = f.registry.push(&f.key).await.unwrap_err();
		assert!(matches!(err, ServerError::DeviceNotFound));
	}

	#[tokio::test]
	async fn full_queue_and_closed_receiver() {
		let f = fixture(Some(true)).await;
		let (tx, rx) = mpsc::channel(1);
		f.registry.register(f.key.clone(), tx);

		f.registry.push(&f.key).await.unwrap();
		let err = f.registry.push(&f.key).await.unwrap_err();
		assert!(matches!(err, ServerError::StreamBackpressure));

		drop(rx);
		let err = f.registry.push(&f.key).await.unwrap_err();
		assert!(matches!(err, ServerError::StreamClosed));
		assert!(!f.registry.is_registered(&f.key));
	}

	#[tokio::test]
	async fn push_all_counts_failures() {
		let f = fixture(Some(true)).await;
		let (_a, mut rx) = f.registry.subscribe(f.key.clone());
		let (_b, _orphan_rx) = f.registry.subscribe(SessionKey::new("orphan"));

		let summary = f.registry.push_all().await;
		assert_eq!(
			summary,
			PushSummary {
				attempted: 2,
				failed: 1
			}
		);
		assert!(rx.recv().await.is_some());
	}

	#[tokio::test]
	async fn push_device_targets_its_sessions() {
		let f = fixture(Some(true)).await;
		let (_handle, mut rx) = f.registry.subscribe(f.key.clone());

		let summary = f.registry.push_device(f.device.id).await.unwrap();
		assert_eq!(summary.attempted, 1);
		assert!(rx.recv().await.is_some());

		let summary = f.registry.push_device(DeviceId::new()).await.unwrap();
		assert_eq!(summary.attempted, 0);
	}

	#[tokio::test]
	async fn connect_sends_initial_configuration() {
		let f = fixture(Some(true)).await;
		let (_handle, mut rx) = f.registry.connect(f.key.clone()).await;

		let config = rx.try_recv().unwrap();
		assert_eq!(config.status, DeviceConfigStatus::Healthy);
		assert_eq!(config.gateways.len(), 1);
	}

	#[tokio::test]
	async fn connect_keeps_stream_when_first_push_fails() {
		let f = fixture(Some(true)).await;
		f.dir.remove_session(&f.key).await;

		let (_handle, mut rx) = f.registry.connect(f.key.clone()).await;
		assert!(rx.try_recv().is_err());
		assert!(f.registry.is_registered(&f.key));
	}

	/// Holds the first `get_device` call after it has read the record.
	struct StallingDirectory {
		inner: Arc<MemoryDirectory>,
		armed: AtomicBool,
		stalled: Notify,
		release: Notify,
	}

	#[async_trait]
	impl Directory for StallingDirectory {
		async fn get_session(&self, key: &SessionKey) -> std::result::Result<Option<Session>, DirectoryError> {
			self.inner.get_session(key).await
		}

		async fn list_sessions(&self) -> std::result::Result<Vec<Session>, DirectoryError> {
			self.inner.list_sessions().await
		}

		async fn get_device(&self, selector: &DeviceSelector) -> std::result::Result<Option<Device>, DirectoryError> {
			let device = self.inner.get_device(selector).await;
			if self.armed.swap(false, Ordering::SeqCst) {
				self.stalled.notify_one();
				self.release.notified().await;
			}
			device
		}

		async fn list_devices(&self) -> std::result::Result<Vec<Device>, DirectoryError> {
			self.inner.list_devices().await
		}

		async fn get_gateway(&self, name: &str) -> std::result::Result<Option<Gateway>, DirectoryError> {
			self.inner.get_gateway(name).await
		}

		async fn list_gateways(&self) -> std::result::Result<Vec<Gateway>, DirectoryError> {
			self.inner.list_gateways().await
		}

		async fn assign_address(&self, entity: &EntityRef, address: IpAddr) -> std::result::Result<(), DirectoryError> {
			self.inner.assign_address(entity, address).await
		}
	}

	#[tokio::test]
	async fn slow_healthy_push_cannot_overwrite_later_unhealthy_one() {
		let f = fixture(Some(true)).await;
		let dir = Arc::new(StallingDirectory {
			inner: f.dir.clone(),
			armed: AtomicBool::new(true),
			stalled: Notify::new(),
			release: Notify::new(),
		});
		let registry = Arc::new(SessionStreamRegistry::new(dir.clone(), f.metrics.clone(), 4));
		let (_handle, mut rx) = registry.subscribe(f.key.clone());

		let slow = {
			let registry = registry.clone();
			let key = f.key.clone();
			tokio::spawn(async move { registry.push(&key).await })
		};
		dir.stalled.notified().await;

		f.dir.set_device_health(f.device.id, false, Utc::now()).await.unwrap();
		let fast = {
			let registry = registry.clone();
			let key = f.key.clone();
			tokio::spawn(async move { registry.push(&key).await })
		};
		for _ in 0..8 {
			tokio::task::yield_now().await;
		}
		assert!(rx.try_recv().is_err());

		dir.release.notify_one();
		slow.await.unwrap().unwrap();
		fast.await.unwrap().unwrap();

		let first = rx.recv().await.unwrap();
		let last = rx.recv().await.unwrap();
		assert_eq!(first.status, DeviceConfigStatus::Healthy);
		assert_eq!(last, DeviceConfiguration::unhealthy());
	}
}
