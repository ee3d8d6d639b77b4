// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::authz::{compute_gateway_session_peers, PrivilegedAccess};
use crate::device_stream::PushSummary;
use crate::directory::Directory;
use crate::error::{Result, ServerError};
use crate::metrics::PushMetrics;
use crate::streams::{KeyedLocks, SendFailure, StreamHandle, StreamSet};
use palisade_common::{Device, GatewayConfiguration, Session};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// At most one live configuration stream per gateway.
pub struct GatewayStreamRegistry {
	streams: StreamSet<String, GatewayConfiguration>,
	pushes: KeyedLocks<String>,
	directory: Arc<dyn Directory>,
	privileged: Arc<dyn PrivilegedAccess>,
	metrics: Arc<PushMetrics>,
	capacity: usize,
}

impl GatewayStreamRegistry {
	pub fn new(
		directory: Arc<dyn Directory>,
		privileged: Arc<dyn PrivilegedAccess>,
		metrics: Arc<PushMetrics>,
		capacity: usize,
	) -> Self {
		Self {
			streams: StreamSet::new(),
			pushes: KeyedLocks::new(),
			directory,
			privileged,
			metrics,
			capacity: capacity.max(1),
		}
	}

	#[instrument(skip(self, tx))]
	pub fn register(&self, gateway: &str, tx: mpsc::Sender<GatewayConfiguration>) -> Result<StreamHandle> {
		let handle = self
			.streams
			.insert_if_vacant(gateway.to_string(), tx)
			.ok_or_else(|| ServerError::GatewayAlreadyConnected(gateway.to_string()))?;
		debug!(handle = handle.id(), "registered gateway stream");
		self.update_gauge();
		Ok(handle)
	}

	pub fn subscribe(&self, gateway: &str) -> Result<(StreamHandle, mpsc::Receiver<GatewayConfiguration>)> {
		let (tx, rx) = mpsc::channel(self.capacity);
		let handle = self.register(gateway, tx)?;
		Ok((handle, rx))
	}

	/// Subscribes and sends the initial configuration. If that first push
	/// fails the registration is withdrawn and the error returned.
	#[instrument(skip(self))]
	pub async fn connect(&self, gateway: &str) -> Result<(StreamHandle, mpsc::Receiver<GatewayConfiguration>)> {
		let (handle, rx) = self.subscribe(gateway)?;
		if let Err(e) = self.push(gateway).await {
			warn!(error = %e, "send initial gateway configuration");
			self.unregister(gateway, handle);
			return Err(e);
		}
		Ok((handle, rx))
	}

	#[instrument(skip(self), fields(handle = handle.id()))]
	pub fn unregister(&self, gateway: &str, handle: StreamHandle) -> bool {
		let removed = self.streams.remove_if_current(&gateway.to_string(), handle);
		if removed {
			self.update_gauge();
		}
		removed
	}

	pub fn is_registered(&self, gateway: &str) -> bool {
		self.streams.contains(&gateway.to_string())
	}

	pub fn connected(&self) -> usize {
		self.streams.len()
	}

	/// Sends the gateway the devices of every live session allowed through it.
	#[instrument(skip(self))]
	pub async fn push(&self, gateway: &str) -> Result<()> {
		let key = gateway.to_string();
		self.pushes.run(&key, self.push_serialized(gateway)).await
	}

	async fn push_serialized(&self, gateway: &str) -> Result<()> {
		let key = gateway.to_string();
		if !self.streams.contains(&key) {
			return Err(ServerError::NoActiveGatewayStream(key));
		}

		let record = self
			.directory
			.get_gateway(gateway)
			.await?
			.ok_or_else(|| ServerError::GatewayNotFound(key.clone()))?;

		let sessions = self.directory.list_sessions().await?;
		let devices: HashMap<_, Device> = self
			.directory
			.list_devices()
			.await?
			.into_iter()
			.map(|d| (d.id, d))
			.collect();
		let pairs: Vec<(Session, Device)> = sessions
			.into_iter()
			.filter_map(|s| devices.get(&s.device_id).cloned().map(|d| (s, d)))
			.collect();

		let privileged_users = if record.requires_privileged_access {
			self.privileged.privileged_users(gateway).await?
		} else {
			Vec::new()
		};

		let config = GatewayConfiguration {
			devices: compute_gateway_session_peers(&record, &pairs, &privileged_users),
			routes: record.routes.clone(),
		};
		let peers = config.devices.len();

		match self.streams.send(&key, config) {
			Ok(_) => {}
			Err(SendFailure::NotRegistered) => return Err(ServerError::NoActiveGatewayStream(key)),
			Err(SendFailure::Full) => return Err(ServerError::StreamBackpressure),
			Err(SendFailure::Closed) => {
				self.update_gauge();
				return Err(ServerError::StreamClosed);
			}
		}

		self.metrics.record_gateway_config(gateway, privileged_users.len());
		debug!(peers, "pushed gateway config");
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn push_all(&self) -> PushSummary {
		let mut summary = PushSummary::default();
		for gateway in self.streams.keys() {
			summary.attempted += 1;
			if let Err(e) = self.push(&gateway).await {
				warn!(%gateway, error = %e, "gateway push failed");
				summary.failed += 1;
			}
		}
		summary
	}

	fn update_gauge(&self) {
		self.metrics.gateways_connected.set(self.streams.len() as f64);
	}
}
