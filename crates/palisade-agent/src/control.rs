// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{AgentError, Result};
use crate::event::Event;
use crate::status::{StatusBroadcaster, StatusSubscription};
use palisade_common::AgentStatus;
use tokio::sync::mpsc;

/// Requests arriving from the local control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Trigger {
	Event(Event),
	SetActiveTenant(String),
}

/// Cloneable handle used by the CLI, tray or UI to steer the agent.
#[derive(Clone)]
pub struct AgentControl {
	triggers: mpsc::Sender<Trigger>,
	status: StatusBroadcaster,
}

impl AgentControl {
	pub(crate) fn new(triggers: mpsc::Sender<Trigger>, status: StatusBroadcaster) -> Self {
		Self { triggers, status }
	}

	pub async fn login(&self) -> Result<()> {
		self.send(Trigger::Event(Event::Login)).await
	}

	pub async fn logout(&self) -> Result<()> {
		self.send(Trigger::Event(Event::Disconnect)).await
	}

	pub async fn set_active_tenant(&self, name: impl Into<String>) -> Result<()> {
		self.send(Trigger::SetActiveTenant(name.into())).await
	}

	pub fn subscribe(&self) -> StatusSubscription {
		self.status.subscribe()
	}

	pub fn status(&self) -> AgentStatus {
		self.status.current()
	}

	pub(crate) async fn send(&self, trigger: Trigger) -> Result<()> {
		self.triggers
			.send(trigger)
			.await
			.map_err(|_| AgentError::Stopped)
	}
}
