// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::config::TenantConfig;
use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use palisade_common::{Peer, SessionKey};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
	pub access_token: String,
	pub expiry: DateTime<Utc>,
}

/// Server-side session the agent logged in to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
	pub key: SessionKey,
	pub expiry: DateTime<Utc>,
}

impl SessionInfo {
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		self.expiry <= now
	}
}

/// Outcome of bootstrapping: where the API server is and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
	pub api_endpoint: String,
	pub api_server_peer: Peer,
	pub ipv4: Option<Ipv4Addr>,
	pub ipv6: Option<Ipv6Addr>,
}

/// Mutable runtime data owned by the state machine driver.
#[derive(Debug, Clone)]
pub struct RuntimeState {
	tenants: Vec<TenantConfig>,
	active: usize,
	pub tokens: Option<Tokens>,
	pub session: Option<SessionInfo>,
	pub enrollment: Option<Enrollment>,
	pub api_endpoint: Option<String>,
}

impl RuntimeState {
	pub fn new(tenants: Vec<TenantConfig>) -> Result<Self> {
		if tenants.is_empty() {
			return Err(AgentError::Config(crate::config::ConfigError::NoTenants));
		}
		Ok(Self {
			tenants,
			active: 0,
			tokens: None,
			session: None,
			enrollment: None,
			api_endpoint: None,
		})
	}

	pub fn tenants(&self) -> &[TenantConfig] {
		&self.tenants
	}

	pub fn active_tenant(&self) -> &TenantConfig {
		&self.tenants[self.active]
	}

	pub fn has_tenant(&self, name: &str) -> bool {
		self.tenants.iter().any(|t| t.name == name)
	}

	/// Switches tenant. The old tenant's session does not carry over.
	pub fn set_active_tenant(&mut self, name: &str) -> Result<()> {
		let index = self
			.tenants
			.iter()
			.position(|t| t.name == name)
			.ok_or_else(|| AgentError::UnknownTenant(name.to_string()))?;
		if index != self.active {
			self.active = index;
			self.session = None;
		}
		Ok(())
	}

	pub fn live_session(&self, now: DateTime<Utc>) -> Option<&SessionInfo> {
		self.session.as_ref().filter(|s| !s.is_expired_at(now))
	}

	/// Clears everything tied to the current login attempt.
	pub fn reset_session_scoped(&mut self) {
		self.tokens = None;
		self.enrollment = None;
		self.api_endpoint = None;
	}
}
