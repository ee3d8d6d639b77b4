// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod authz;
pub mod config;
pub mod device_stream;
pub mod directory;
pub mod error;
pub mod gateway_stream;
pub mod ip_allocator;
pub mod metrics;
mod streams;

pub use authz::{
	compute_device_peers, compute_gateway_peers, compute_gateway_session_peers, NoPrivilegedAccess,
	PrivilegedAccess,
};
pub use config::{ConfigError, ServerConfig};
pub use device_stream::{PushSummary, SessionStreamRegistry};
pub use directory::{DeviceSelector, Directory, DirectoryError, EntityRef, MemoryDirectory};
pub use error::{ErrorKind, Result, ServerError};
pub use gateway_stream::GatewayStreamRegistry;
pub use ip_allocator::{next_ipv4, next_ipv6, AddressPools, AssignedAddresses, Ipv4Allocator, Ipv6Allocator};
pub use metrics::PushMetrics;
pub use streams::StreamHandle;

use palisade_common::{Device, DeviceId, Gateway, SessionKey};
use std::sync::Arc;
use tracing::{info, instrument};

/// Everything the transport layer needs, wired around one directory.
#[derive(Clone)]
pub struct ControlPlaneServices {
	pub directory: Arc<dyn Directory>,
	pub pools: Arc<AddressPools>,
	pub device_streams: Arc<SessionStreamRegistry>,
	pub gateway_streams: Arc<GatewayStreamRegistry>,
	pub metrics: Arc<PushMetrics>,
	pub config: Arc<ServerConfig>,
}

impl ControlPlaneServices {
	pub fn new(
		directory: Arc<dyn Directory>,
		privileged: Arc<dyn PrivilegedAccess>,
		config: ServerConfig,
	) -> Result<Self> {
		let config = Arc::new(config);
		let metrics = Arc::new(PushMetrics::new()?);
		let pools = Arc::new(AddressPools::new(
			Ipv4Allocator::new(config.ipv4_prefix, config.reserved_ipv4.clone()),
			Ipv6Allocator::new(config.ipv6_prefix),
		));
		let device_streams = Arc::new(SessionStreamRegistry::new(
			directory.clone(),
			metrics.clone(),
			config.stream_capacity,
		));
		let gateway_streams = Arc::new(GatewayStreamRegistry::new(
			directory.clone(),
			privileged,
			metrics.clone(),
			config.stream_capacity,
		));

		Ok(Self {
			directory,
			pools,
			device_streams,
			gateway_streams,
			metrics,
			config,
		})
	}

	/// Health given to a device before its first posture report.
	pub fn initial_device_health(&self) -> Option<bool> {
		Some(self.config.default_device_health)
	}

	pub async fn assign_device_addresses(&self, device: &Device) -> Result<AssignedAddresses> {
		self.pools.assign_device(self.directory.as_ref(), device).await
	}

	pub async fn assign_gateway_addresses(&self, gateway: &Gateway) -> Result<AssignedAddresses> {
		self.pools.assign_gateway(self.directory.as_ref(), gateway).await
	}

	/// A new session can change what every gateway should admit.
	#[instrument(skip(self), fields(session = ?key))]
	pub async fn session_started(&self, key: &SessionKey) -> Result<PushSummary> {
		if self.directory.get_session(key).await?.is_none() {
			return Err(ServerError::SessionNotFound);
		}
		Ok(self.gateway_streams.push_all().await)
	}

	/// Health-sync hook: the device's own streams and all gateways.
	#[instrument(skip(self), fields(%device_id))]
	pub async fn device_health_changed(&self, device_id: DeviceId) -> Result<PushSummary> {
		let devices = self.device_streams.push_device(device_id).await?;
		let gateways = self.gateway_streams.push_all().await;
		info!(
			device_pushes = devices.attempted,
			gateway_pushes = gateways.attempted,
			"propagated health change"
		);
		Ok(PushSummary {
			attempted: devices.attempted + gateways.attempted,
			failed: devices.failed + gateways.failed,
		})
	}

	/// Gateway-sync hook: routes or access groups changed somewhere.
	#[instrument(skip(self))]
	pub async fn gateways_changed(&self) -> PushSummary {
		let devices = self.device_streams.push_all().await;
		let gateways = self.gateway_streams.push_all().await;
		PushSummary {
			attempted: devices.attempted + gateways.attempted,
			failed: devices.failed + gateways.failed,
		}
	}
}
