// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{bounded, on_failure, StateContext};
use crate::collaborators::GatewayChecker;
use crate::error::{AgentError, Result};
use crate::event::Event;
use crate::runtime::SessionInfo;
use chrono::Utc;
use futures::StreamExt;
use palisade_common::{merge_gateway_health, DeviceConfiguration, Peer};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

const UNHEALTHY_MESSAGE: &str = "device is unhealthy, gateways are unavailable";

pub(super) async fn enter(ctx: &mut StateContext, cancel: &CancellationToken) -> Event {
	let api_peer = match ctx.runtime.enrollment.as_ref() {
		Some(enrollment) => enrollment.api_server_peer.clone(),
		None => return on_failure(ctx, AgentError::Other("device is not bootstrapped".to_string())),
	};

	if let Err(err) = configure(ctx, cancel, vec![api_peer.clone()]).await {
		return on_failure(ctx, err);
	}

	ctx.clear_error();
	ctx.status.connected_since = Some(Utc::now());
	ctx.publish();

	let event = sync_until_exit(ctx, cancel, &api_peer).await;

	// runs after cancellation too
	let helper = ctx.collaborators.helper.clone();
	match tokio::time::timeout(ctx.config.helper_timeout, helper.teardown()).await {
		Ok(Ok(())) => info!("tunnel torn down"),
		Ok(Err(e)) => warn!(error = %e, "tunnel teardown failed"),
		Err(_) => warn!("tunnel teardown timed out"),
	}
	ctx.status.gateways.clear();
	ctx.status.gateway_health.clear();
	ctx.status.healthy = None;
	ctx.status.connected_since = None;

	event
}

fn backoff(base: Duration, attempt: u32) -> Duration {
	base.saturating_mul(attempt.min(1000).pow(3))
}

async fn sync_until_exit(ctx: &mut StateContext, cancel: &CancellationToken, api_peer: &Peer) -> Event {
	let mut attempt: u32 = 0;
	loop {
		if cancel.is_cancelled() {
			return Event::WaitForExternalEvent;
		}
		attempt += 1;
		info!(attempt, "setting up configuration stream");

		let err = match sync_config(ctx, cancel, api_peer).await {
			Ok(never) => match never {},
			Err(err) => err,
		};

		match err {
			AgentError::Unavailable(reason) => {
				let delay = backoff(ctx.config.api_retry_base, attempt);
				warn!(%reason, attempt, ?delay, "API server unavailable, retrying");
				tokio::select! {
					biased;
					_ = cancel.cancelled() => return Event::WaitForExternalEvent,
					_ = tokio::time::sleep(delay) => {}
				}
			}
			AgentError::LostConnection(reason) => {
				info!(%reason, "lost connection, reconnecting");
				attempt = 0;
			}
			AgentError::Unauthenticated(reason) => {
				warn!(%reason, "session rejected");
				ctx.runtime.tokens = None;
				ctx.runtime.session = None;
				ctx.report_error("unauthenticated, please log in again");
				return Event::Disconnect;
			}
			AgentError::Cancelled => return Event::WaitForExternalEvent,
			err => {
				error!(error = %err, "configuration sync failed");
				ctx.report_error(err.to_string());
				return Event::Disconnect;
			}
		}
	}
}

/// Follows the configuration stream until it fails. Never returns `Ok`.
///
/// The stream is only trusted until the session expires; expiry drops the
/// session and counts as a lost connection so the next attempt logs in again.
async fn sync_config(ctx: &mut StateContext, cancel: &CancellationToken, api_peer: &Peer) -> Result<Infallible> {
	let endpoint = ctx
		.runtime
		.api_endpoint
		.clone()
		.ok_or_else(|| AgentError::Other("no API server endpoint".to_string()))?;
	let session = login(ctx, cancel, &endpoint).await?;

	let api = ctx.collaborators.api.clone();
	let mut stream = tokio::select! {
		biased;
		_ = cancel.cancelled() => return Err(AgentError::Cancelled),
		opened = api.device_configurations(&endpoint, &session) => opened?,
	};

	let lifetime = (session.expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO);
	let expired = tokio::time::sleep(lifetime);
	tokio::pin!(expired);
	let mut checks: Option<HealthChecks> = None;

	loop {
		let next = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(AgentError::Cancelled),
			_ = &mut expired => {
				ctx.runtime.session = None;
				return Err(AgentError::LostConnection("session expired".to_string()));
			}
			health = next_round(&mut checks) => {
				record_health(ctx, health);
				continue;
			}
			next = stream.next() => next,
		};
		// a new configuration invalidates the running round
		checks = None;
		match next {
			None => return Err(AgentError::LostConnection("configuration stream ended".to_string())),
			// the stream had been working, so this is a dropped connection
			Some(Err(AgentError::Unavailable(reason))) => return Err(AgentError::LostConnection(reason)),
			Some(Err(err)) => return Err(err),
			Some(Ok(config)) => {
				apply(ctx, cancel, api_peer, config).await?;
				if !ctx.status.gateways.is_empty() {
					checks = Some(HealthChecks::spawn(
						ctx.collaborators.gateways.clone(),
						ctx.status.gateways.clone(),
						ctx.config.gateway_check_interval,
						ctx.config.gateway_check_timeout,
					));
				}
			}
		}
	}
}

/// Background rounds of gateway reachability checks for one configuration.
/// Dropping it stops the rounds.
struct HealthChecks {
	task: JoinHandle<()>,
	rounds: mpsc::Receiver<BTreeMap<String, bool>>,
}

impl HealthChecks {
	/// The first round starts at once, later ones `interval` after the
	/// previous round finished.
	fn spawn(checker: Arc<dyn GatewayChecker>, gateways: Vec<Peer>, interval: Duration, timeout: Duration) -> Self {
		let (tx, rounds) = mpsc::channel(1);
		let task = tokio::spawn(
			async move {
				loop {
					let health = check_gateways(checker.as_ref(), &gateways, timeout).await;
					if tx.send(health).await.is_err() {
						return;
					}
					tokio::time::sleep(interval).await;
				}
			}
			.instrument(Span::current()),
		);
		Self { task, rounds }
	}
}

impl Drop for HealthChecks {
	fn drop(&mut self) {
		self.task.abort();
	}
}

async fn next_round(checks: &mut Option<HealthChecks>) -> BTreeMap<String, bool> {
	if let Some(checks) = checks {
		if let Some(health) = checks.rounds.recv().await {
			return health;
		}
	}
	futures::future::pending().await
}

async fn check_gateways(checker: &dyn GatewayChecker, gateways: &[Peer], timeout: Duration) -> BTreeMap<String, bool> {
	let checks = gateways.iter().map(|gateway| async move {
		let healthy = match tokio::time::timeout(timeout, checker.check(gateway)).await {
			Ok(Ok(())) => true,
			Ok(Err(e)) => {
				debug!(gateway = %gateway.name, error = %e, "gateway unreachable");
				false
			}
			Err(_) => {
				debug!(gateway = %gateway.name, "gateway check timed out");
				false
			}
		};
		(gateway.name.clone(), healthy)
	});
	futures::future::join_all(checks).await.into_iter().collect()
}

fn record_health(ctx: &mut StateContext, health: BTreeMap<String, bool>) {
	for (name, healthy) in health {
		if let Some(known) = ctx.status.gateway_health.get_mut(&name) {
			*known = healthy;
		}
	}
	ctx.publish();
}

/// Reuses a live session or logs in again.
async fn login(ctx: &mut StateContext, cancel: &CancellationToken, endpoint: &str) -> Result<SessionInfo> {
	if let Some(session) = ctx.runtime.live_session(Utc::now()) {
		return Ok(session.clone());
	}

	let helper = ctx.collaborators.helper.clone();
	let serial = bounded(cancel, ctx.config.helper_timeout, "reading serial", async move {
		helper.serial().await
	})
	.await?;
	let tokens = ctx.tokens(cancel).await?;

	let api = ctx.collaborators.api.clone();
	let endpoint = endpoint.to_string();
	let session = bounded(cancel, ctx.config.auth_timeout, "API server login", async move {
		api.login(&endpoint, &tokens, &serial).await
	})
	.await?;
	info!("logged in to API server");
	ctx.runtime.session = Some(session.clone());
	Ok(session)
}

async fn apply(
	ctx: &mut StateContext,
	cancel: &CancellationToken,
	api_peer: &Peer,
	config: DeviceConfiguration,
) -> Result<()> {
	let healthy = config.is_healthy();
	let gateways = if healthy { config.gateways } else { Vec::new() };

	let mut peers = Vec::with_capacity(gateways.len() + 1);
	peers.push(api_peer.clone());
	peers.extend(gateways.iter().cloned());
	configure(ctx, cancel, peers).await?;

	if healthy {
		info!(gateways = gateways.len(), "applied configuration");
		ctx.status.error = None;
	} else {
		warn!("device reported unhealthy, gateways removed");
		ctx.status.error = Some(UNHEALTHY_MESSAGE.to_string());
	}
	ctx.status.healthy = Some(healthy);
	ctx.status.gateway_health = merge_gateway_health(&ctx.status.gateway_health, &gateways);
	ctx.status.gateways = gateways;
	ctx.publish();
	Ok(())
}

async fn configure(ctx: &StateContext, cancel: &CancellationToken, peers: Vec<Peer>) -> Result<()> {
	let helper = ctx.collaborators.helper.clone();
	let tunnel = ctx.tunnel_config(peers);
	bounded(cancel, ctx.config.helper_timeout, "tunnel configuration", async move {
		helper.configure(tunnel).await
	})
	.await
}
