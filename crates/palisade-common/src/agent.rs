// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::peer::Peer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Connection phase of the device agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
	#[default]
	Disconnected,
	Authenticating,
	Bootstrapping,
	Connected,
}

impl AgentState {
	pub const ALL: [AgentState; 4] = [
		AgentState::Disconnected,
		AgentState::Authenticating,
		AgentState::Bootstrapping,
		AgentState::Connected,
	];

	pub fn name(&self) -> &'static str {
		match self {
			AgentState::Disconnected => "Disconnected",
			AgentState::Authenticating => "Authenticating",
			AgentState::Bootstrapping => "Bootstrapping",
			AgentState::Connected => "Connected",
		}
	}
}

impl fmt::Display for AgentState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Snapshot of the agent published to local observers.
///
/// Snapshots are immutable once published; a change produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentStatus {
	pub connection_state: AgentState,
	#[serde(default)]
	pub tenant: Option<String>,
	#[serde(default)]
	pub error: Option<String>,
	/// Last health verdict pushed by the server, if any.
	#[serde(default)]
	pub healthy: Option<bool>,
	#[serde(default)]
	pub gateways: Vec<Peer>,
	/// Reachability of each gateway by name, from the latest health check.
	#[serde(default)]
	pub gateway_health: BTreeMap<String, bool>,
	#[serde(default)]
	pub connected_since: Option<DateTime<Utc>>,
}

impl AgentStatus {
	pub fn new(connection_state: AgentState) -> Self {
		Self {
			connection_state,
			..Self::default()
		}
	}

	pub fn gateway_healthy(&self, name: &str) -> bool {
		self.gateway_health.get(name).copied().unwrap_or(false)
	}
}

/// Health for `gateways`, carrying over what `previous` knew about gateways
/// of the same name. Gateways never checked start unhealthy.
pub fn merge_gateway_health(previous: &BTreeMap<String, bool>, gateways: &[Peer]) -> BTreeMap<String, bool> {
	gateways
		.iter()
		.map(|gw| (gw.name.clone(), previous.get(&gw.name).copied().unwrap_or(false)))
		.collect()
}
