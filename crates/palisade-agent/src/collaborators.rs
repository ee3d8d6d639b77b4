// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interfaces to everything outside the agent process: the identity
//! provider, the privileged tunnel helper, enrollment, the API server and
//! gateway reachability.

use crate::config::TenantConfig;
use crate::error::{AgentError, Result};
use crate::runtime::{Enrollment, SessionInfo, Tokens};
use async_trait::async_trait;
use futures::stream::BoxStream;
use palisade_common::{DeviceConfiguration, Peer};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

/// Desired state of the local tunnel interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
	pub ipv4: Option<Ipv4Addr>,
	pub ipv6: Option<Ipv6Addr>,
	pub peers: Vec<Peer>,
}

pub type ConfigStream = BoxStream<'static, Result<DeviceConfiguration>>;

#[async_trait]
pub trait TokenSource: Send + Sync {
	async fn get_token(&self, tenant: &TenantConfig) -> Result<Tokens>;
}

#[async_trait]
pub trait DeviceHelper: Send + Sync {
	async fn serial(&self) -> Result<String>;

	async fn configure(&self, config: TunnelConfig) -> Result<()>;

	async fn teardown(&self) -> Result<()>;
}

#[async_trait]
pub trait Enroller: Send + Sync {
	/// Previously persisted enrollment for the tenant, if any.
	async fn load(&self, tenant: &TenantConfig) -> Result<Option<Enrollment>>;

	async fn enroll(&self, tenant: &TenantConfig, serial: &str, tokens: &Tokens) -> Result<Enrollment>;
}

#[async_trait]
pub trait ApiServer: Send + Sync {
	async fn login(&self, endpoint: &str, tokens: &Tokens, serial: &str) -> Result<SessionInfo>;

	/// Long-lived stream of pushed configurations for the session.
	async fn device_configurations(&self, endpoint: &str, session: &SessionInfo) -> Result<ConfigStream>;
}

/// Tells whether a gateway answers through the tunnel.
#[async_trait]
pub trait GatewayChecker: Send + Sync {
	async fn check(&self, gateway: &Peer) -> Result<()>;
}

/// Port every gateway listens on for reachability checks.
pub const GATEWAY_CHECK_PORT: u16 = 3000;

/// Opens a TCP connection to the gateway's tunnel address.
#[derive(Debug, Clone, Copy)]
pub struct TcpGatewayChecker {
	pub port: u16,
}

impl Default for TcpGatewayChecker {
	fn default() -> Self {
		Self {
			port: GATEWAY_CHECK_PORT,
		}
	}
}

#[async_trait]
impl GatewayChecker for TcpGatewayChecker {
	async fn check(&self, gateway: &Peer) -> Result<()> {
		let ip = gateway
			.ipv4
			.ok_or_else(|| AgentError::Other(format!("gateway {} has no tunnel address", gateway.name)))?;
		tokio::net::TcpStream::connect(SocketAddr::from((ip, self.port)))
			.await
			.map_err(|e| AgentError::Unavailable(format!("gateway {}: {e}", gateway.name)))?;
		Ok(())
	}
}

#[derive(Clone)]
pub struct Collaborators {
	pub tokens: Arc<dyn TokenSource>,
	pub helper: Arc<dyn DeviceHelper>,
	pub enroller: Arc<dyn Enroller>,
	pub api: Arc<dyn ApiServer>,
	pub gateways: Arc<dyn GatewayChecker>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::states::testing::api_peer;

	#[tokio::test]
	async fn tcp_checker_needs_a_listener() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let checker = TcpGatewayChecker { port };

		let mut gateway = api_peer();
		gateway.ipv4 = Some(Ipv4Addr::LOCALHOST);
		assert!(checker.check(&gateway).await.is_ok());

		drop(listener);
		assert!(matches!(checker.check(&gateway).await, Err(AgentError::Unavailable(_))));

		gateway.ipv4 = None;
		assert!(matches!(checker.check(&gateway).await, Err(AgentError::Other(_))));
	}
}
