// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! State machine driver.
//!
//! One `enter` runs at a time. Events it returns are looked up in the
//! transition table; external triggers that are valid for the current state
//! cancel the running `enter`, wait for it to return, discard its event and
//! transition. Anything else is logged and dropped.

use crate::collaborators::Collaborators;
use crate::config::AgentConfig;
use crate::control::{AgentControl, Trigger};
use crate::error::Result;
use crate::event::{Event, EventWithSpan};
use crate::runtime::RuntimeState;
use crate::states::{self, StateContext};
use crate::status::StatusBroadcaster;
use crate::transitions::transition;
use palisade_common::AgentState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const TRIGGER_CAPACITY: usize = 32;

/// Transition requested from outside the running state.
#[derive(Debug)]
struct Forced {
	event: Event,
	next: AgentState,
	tenant: Option<String>,
	error: Option<String>,
}

enum Outcome {
	Produced(EventWithSpan),
	Forced(Forced),
}

pub struct StateMachine {
	ctx: StateContext,
	state: AgentState,
	triggers: mpsc::Receiver<Trigger>,
	triggers_closed: bool,
	tenant_names: Vec<String>,
	broadcaster: StatusBroadcaster,
}

impl StateMachine {
	pub fn new(config: AgentConfig, collaborators: Collaborators) -> Result<(Self, AgentControl)> {
		config.validate()?;
		let runtime = RuntimeState::new(config.tenants.clone())?;
		let tenant_names = config.tenants.iter().map(|t| t.name.clone()).collect();
		let broadcaster = StatusBroadcaster::new(config.status_queue_capacity);
		let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);

		let ctx = StateContext::new(config, runtime, collaborators, broadcaster.clone());
		let machine = Self {
			ctx,
			state: AgentState::Disconnected,
			triggers: rx,
			triggers_closed: false,
			tenant_names,
			broadcaster: broadcaster.clone(),
		};
		Ok((machine, AgentControl::new(tx, broadcaster)))
	}

	pub fn state(&self) -> AgentState {
		self.state
	}

	/// Drives the machine until `shutdown` fires, or until it is idle and every
	/// control handle is gone. Returns the final runtime state.
	#[instrument(skip_all)]
	pub async fn run(mut self, shutdown: CancellationToken) -> RuntimeState {
		info!("agent state machine started");
		self.ctx.set_state(self.state);

		loop {
			let cancel = shutdown.child_token();
			let outcome = self.run_state(&cancel).await;
			if shutdown.is_cancelled() {
				break;
			}

			let forced = match outcome {
				Outcome::Forced(forced) => forced,
				Outcome::Produced(produced) => match transition(produced.event, self.state) {
					Some(next) => {
						produced.span.in_scope(|| {
							info!(from = %self.state, to = %next, event = %produced.event, "state transition");
						});
						self.enter_state(produced.event, next);
						continue;
					}
					None => {
						if produced.event != Event::WaitForExternalEvent {
							produced.span.in_scope(|| {
								warn!(state = %self.state, event = %produced.event, "invalid state transition, event dropped");
							});
						}
						match self.wait_for_trigger(&shutdown).await {
							Some(forced) => forced,
							None => break,
						}
					}
				},
			};

			info!(from = %self.state, to = %forced.next, event = %forced.event, "forced state transition");
			if let Some(name) = &forced.tenant {
				if let Err(e) = self.ctx.runtime.set_active_tenant(name) {
					warn!(error = %e, "tenant switch failed");
				}
			}
			if forced.error.is_some() {
				self.ctx.status.error = forced.error;
			}
			self.enter_state(forced.event, forced.next);
		}

		info!(state = %self.state, "agent state machine stopped");
		self.ctx.runtime
	}

	fn enter_state(&mut self, event: Event, next: AgentState) {
		// an error only outlives the attempt that caused it until the next login
		if event == Event::Login {
			self.ctx.status.error = None;
		}
		self.state = next;
		self.ctx.set_state(next);
	}

	async fn run_state(&mut self, cancel: &CancellationToken) -> Outcome {
		let state = self.state;
		let enter = states::enter(state, &mut self.ctx, cancel);
		tokio::pin!(enter);

		loop {
			tokio::select! {
				produced = &mut enter => return Outcome::Produced(produced),
				trigger = self.triggers.recv(), if !self.triggers_closed => {
					let Some(trigger) = trigger else {
						debug!("control channel closed");
						self.triggers_closed = true;
						continue;
					};
					let Some(forced) = resolve(state, &self.tenant_names, &self.broadcaster, trigger) else {
						continue;
					};
					cancel.cancel();
					let discarded = (&mut enter).await;
					debug!(event = %discarded.event, "discarded event of interrupted state");
					return Outcome::Forced(forced);
				}
			}
		}
	}

	async fn wait_for_trigger(&mut self, shutdown: &CancellationToken) -> Option<Forced> {
		loop {
			if self.triggers_closed {
				return None;
			}
			let trigger = tokio::select! {
				biased;
				_ = shutdown.cancelled() => return None,
				trigger = self.triggers.recv() => trigger,
			};
			match trigger {
				Some(trigger) => {
					if let Some(forced) = resolve(self.state, &self.tenant_names, &self.broadcaster, trigger) {
						return Some(forced);
					}
				}
				None => self.triggers_closed = true,
			}
		}
	}
}

/// Decides what an external trigger means in `state`; `None` drops it.
fn resolve(
	state: AgentState,
	tenant_names: &[String],
	broadcaster: &StatusBroadcaster,
	trigger: Trigger,
) -> Option<Forced> {
	match trigger {
		Trigger::Event(event) => match transition(event, state) {
			Some(next) => Some(Forced {
				event,
				next,
				tenant: None,
				error: None,
			}),
			None => {
				warn!(%state, %event, "invalid state transition, event dropped");
				None
			}
		},
		Trigger::SetActiveTenant(name) if tenant_names.contains(&name) => Some(Forced {
			event: Event::Disconnect,
			next: AgentState::Disconnected,
			tenant: Some(name),
			error: None,
		}),
		Trigger::SetActiveTenant(name) => {
			let message = format!("unknown tenant: {name}");
			warn!(tenant = %name, "cannot switch to unknown tenant");
			let mut status = broadcaster.current();
			status.error = Some(message.clone());
			broadcaster.publish(status);

			let next = transition(Event::Disconnect, state)?;
			Some(Forced {
				event: Event::Disconnect,
				next,
				tenant: None,
				error: Some(message),
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{AuthProvider, TenantConfig};
	use crate::states::testing::{collaborators, Mock};
	use crate::status::StatusSubscription;
	use palisade_common::AgentStatus;
	use std::sync::Arc;
	use std::time::Duration;

	fn two_tenants() -> AgentConfig {
		AgentConfig {
			status_queue_capacity: 64,
			tenants: vec![
				TenantConfig::new("acme", AuthProvider::Azure),
				TenantConfig::new("globex", AuthProvider::Google),
			],
			..AgentConfig::default()
		}
	}

	async fn wait_for(sub: &mut StatusSubscription, pred: impl Fn(&AgentStatus) -> bool) -> AgentStatus {
		tokio::time::timeout(Duration::from_secs(5), async {
			loop {
				let status = sub.recv().await.expect("status stream closed");
				if pred(&status) {
					return status;
				}
			}
		})
		.await
		.expect("status not observed")
	}

	#[tokio::test]
	async fn logout_interrupts_authentication() {
		let mock = Arc::new(Mock::default());
		*mock.hang_tokens.lock() = true;
		let (machine, control) = StateMachine::new(two_tenants(), collaborators(&mock)).unwrap();
		let mut sub = control.subscribe();
		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(machine.run(shutdown.clone()));

		control.login().await.unwrap();
		wait_for(&mut sub, |s| s.connection_state == AgentState::Authenticating).await;

		control.logout().await.unwrap();
		wait_for(&mut sub, |s| s.connection_state == AgentState::Disconnected).await;

		shutdown.cancel();
		let runtime = handle.await.unwrap();
		assert!(runtime.tokens.is_none());
	}

	#[tokio::test]
	async fn invalid_external_event_is_dropped() {
		let mock = Arc::new(Mock::default());
		let (machine, control) = StateMachine::new(two_tenants(), collaborators(&mock)).unwrap();
		let mut sub = control.subscribe();
		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(machine.run(shutdown.clone()));

		control.logout().await.unwrap();
		control.send(Trigger::Event(Event::Bootstrapped)).await.unwrap();
		control.login().await.unwrap();

		// the first transition observed is the valid login
		let status = wait_for(&mut sub, |s| s.connection_state != AgentState::Disconnected).await;
		assert_eq!(status.connection_state, AgentState::Authenticating);

		shutdown.cancel();
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn switching_tenant_reenters_disconnected() {
		let mock = Arc::new(Mock::default());
		let (machine, control) = StateMachine::new(two_tenants(), collaborators(&mock)).unwrap();
		let mut sub = control.subscribe();
		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(machine.run(shutdown.clone()));

		control.set_active_tenant("globex").await.unwrap();
		let status = wait_for(&mut sub, |s| s.tenant.as_deref() == Some("globex")).await;
		assert_eq!(status.connection_state, AgentState::Disconnected);

		shutdown.cancel();
		let runtime = handle.await.unwrap();
		assert_eq!(runtime.active_tenant().name, "globex");
	}

	#[tokio::test]
	async fn unknown_tenant_reports_error_and_disconnects() {
		let mock = Arc::new(Mock::default());
		*mock.hang_tokens.lock() = true;
		let (machine, control) = StateMachine::new(two_tenants(), collaborators(&mock)).unwrap();
		let mut sub = control.subscribe();
		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(machine.run(shutdown.clone()));

		control.login().await.unwrap();
		wait_for(&mut sub, |s| s.connection_state == AgentState::Authenticating).await;

		control.set_active_tenant("initech").await.unwrap();
		let status = wait_for(&mut sub, |s| s.connection_state == AgentState::Disconnected).await;
		assert_eq!(status.error.as_deref(), Some("unknown tenant: initech"));
		assert_eq!(status.tenant.as_deref(), Some("acme"));

		shutdown.cancel();
		handle.await.unwrap();
	}

	/// **Test: an error carried into Disconnected is cleared once the user logs in again**
	#[tokio::test]
	async fn login_clears_previous_error() {
		let mock = Arc::new(Mock::default());
		*mock.hang_tokens.lock() = true;
		let (machine, control) = StateMachine::new(two_tenants(), collaborators(&mock)).unwrap();
		let mut sub = control.subscribe();
		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(machine.run(shutdown.clone()));

		control.login().await.unwrap();
		wait_for(&mut sub, |s| s.connection_state == AgentState::Authenticating).await;
		control.set_active_tenant("initech").await.unwrap();
		let status = wait_for(&mut sub, |s| s.connection_state == AgentState::Disconnected).await;
		assert!(status.error.is_some());

		control.login().await.unwrap();
		let status = wait_for(&mut sub, |s| s.connection_state == AgentState::Authenticating).await;
		assert_eq!(status.error, None);
		assert_eq!(control.status().error, None);

		shutdown.cancel();
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn shutdown_stops_idle_machine_without_control() {
		let mock = Arc::new(Mock::default());
		let (machine, control) = StateMachine::new(two_tenants(), collaborators(&mock)).unwrap();
		let shutdown = CancellationToken::new();
		let handle = tokio::spawn(machine.run(shutdown.clone()));

		drop(control);
		shutdown.cancel();
		tokio::time::timeout(Duration::from_secs(5), handle)
			.await
			.unwrap()
			.unwrap();
	}
}
