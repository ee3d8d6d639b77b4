// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-state `enter` behaviour.
//!
//! Every `enter` runs until it has exactly one event to report. Cancellation
//! of the token means someone outside forced a transition; states then return
//! `WaitForExternalEvent` and let the driver decide.

mod authenticating;
mod bootstrapping;
mod connected;
mod disconnected;

use crate::collaborators::{Collaborators, TunnelConfig};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::event::{Event, EventWithSpan};
use crate::runtime::{RuntimeState, Tokens};
use crate::status::StatusBroadcaster;
use palisade_common::{AgentState, AgentStatus};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

/// Everything a state may touch. Owned by the driver; only `enter` mutates it.
pub struct StateContext {
	pub config: AgentConfig,
	pub runtime: RuntimeState,
	pub collaborators: Collaborators,
	pub status: AgentStatus,
	broadcaster: StatusBroadcaster,
	auto_connect_pending: bool,
}

impl StateContext {
	pub fn new(
		config: AgentConfig,
		runtime: RuntimeState,
		collaborators: Collaborators,
		broadcaster: StatusBroadcaster,
	) -> Self {
		let mut status = AgentStatus::new(AgentState::Disconnected);
		status.tenant = Some(runtime.active_tenant().name.clone());
		Self {
			auto_connect_pending: config.auto_connect,
			config,
			runtime,
			collaborators,
			status,
			broadcaster,
		}
	}

	/// Publishes the current status snapshot.
	pub fn publish(&self) {
		self.broadcaster.publish(self.status.clone());
	}

	pub fn set_state(&mut self, state: AgentState) {
		self.status.connection_state = state;
		self.status.tenant = Some(self.runtime.active_tenant().name.clone());
		self.publish();
	}

	pub fn report_error(&mut self, message: impl Into<String>) {
		self.status.error = Some(message.into());
		self.publish();
	}

	fn clear_error(&mut self) {
		self.status.error = None;
	}

	fn tunnel_config(&self, peers: Vec<palisade_common::Peer>) -> TunnelConfig {
		let enrollment = self.runtime.enrollment.as_ref();
		TunnelConfig {
			ipv4: enrollment.and_then(|e| e.ipv4),
			ipv6: enrollment.and_then(|e| e.ipv6),
			peers,
		}
	}

	/// Cached tokens, or fresh ones from the token source.
	async fn tokens(&mut self, cancel: &CancellationToken) -> Result<Tokens> {
		if let Some(tokens) = &self.runtime.tokens {
			return Ok(tokens.clone());
		}
		let source = self.collaborators.tokens.clone();
		let tenant = self.runtime.active_tenant().clone();
		let tokens = bounded(
			cancel,
			self.config.auth_timeout,
			"token acquisition",
			async move { source.get_token(&tenant).await },
		)
		.await?;
		self.runtime.tokens = Some(tokens.clone());
		Ok(tokens)
	}
}

/// Runs `fut` until it finishes, `cancel` fires, or `limit` elapses.
pub(crate) async fn bounded<T, F>(
	cancel: &CancellationToken,
	limit: Duration,
	what: &'static str,
	fut: F,
) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(AgentError::Cancelled),
		res = tokio::time::timeout(limit, fut) => res.map_err(|_| AgentError::Timeout(what))?,
	}
}

/// Runs the `enter` of `state` inside its own span.
pub async fn enter(state: AgentState, ctx: &mut StateContext, cancel: &CancellationToken) -> EventWithSpan {
	let span = info_span!("enter", %state);
	let event = async {
		match state {
			AgentState::Disconnected => disconnected::enter(ctx, cancel).await,
			AgentState::Authenticating => authenticating::enter(ctx, cancel).await,
			AgentState::Bootstrapping => bootstrapping::enter(ctx, cancel).await,
			AgentState::Connected => connected::enter(ctx, cancel).await,
		}
	}
	.instrument(span.clone())
	.await;
	EventWithSpan::new(event, span)
}

/// Maps a failed operation to the event that leaves the state.
fn on_failure(ctx: &mut StateContext, err: AgentError) -> Event {
	match err {
		AgentError::Cancelled => Event::WaitForExternalEvent,
		err => {
			tracing::warn!(error = %err, "state failed");
			ctx.report_error(err.to_string());
			Event::Disconnect
		}
	}
}
