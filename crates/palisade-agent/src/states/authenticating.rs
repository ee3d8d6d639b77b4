// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{on_failure, StateContext};
use crate::event::Event;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(super) async fn enter(ctx: &mut StateContext, cancel: &CancellationToken) -> Event {
	if ctx.runtime.live_session(Utc::now()).is_some() {
		info!("tenant session still valid, skipping token acquisition");
		return Event::Authenticated;
	}

	match ctx.tokens(cancel).await {
		Ok(_) => {
			info!(tenant = %ctx.runtime.active_tenant().name, "acquired token");
			Event::Authenticated
		}
		Err(err) => on_failure(ctx, err),
	}
}

#[cfg(test)]
mod tests {
	use super::super::testing::{context, Mock};
	use super::*;
	use crate::config::AgentConfig;
	use crate::error::AgentError;
	use crate::runtime::SessionInfo;
	use chrono::Duration;
	use palisade_common::SessionKey;
	use std::sync::Arc;

	#[tokio::test]
	async fn acquires_and_stores_token() {
		let mock = Arc::new(Mock::default());
		let (mut ctx, _) = context(&mock, AgentConfig::default());

		let event = enter(&mut ctx, &CancellationToken::new()).await;
		assert_eq!(event, Event::Authenticated);
		assert!(ctx.runtime.tokens.is_some());
		assert_eq!(*mock.token_calls.lock(), 1);
	}

	#[tokio::test]
	async fn live_session_skips_token_source() {
		let mock = Arc::new(Mock::default());
		let (mut ctx, _) = context(&mock, AgentConfig::default());
		ctx.runtime.session = Some(SessionInfo {
			key: SessionKey::new("s"),
			expiry: Utc::now() + Duration::hours(1),
		});

		assert_eq!(enter(&mut ctx, &CancellationToken::new()).await, Event::Authenticated);
		assert_eq!(*mock.token_calls.lock(), 0);
	}

	#[tokio::test]
	async fn failure_reports_error_and_disconnects() {
		let mock = Arc::new(Mock::default());
		*mock.token_error.lock() = Some(AgentError::Other("browser closed".to_string()));
		let (mut ctx, broadcaster) = context(&mock, AgentConfig::default());

		assert_eq!(enter(&mut ctx, &CancellationToken::new()).await, Event::Disconnect);
		assert_eq!(broadcaster.current().error.as_deref(), Some("browser closed"));
	}

	#[tokio::test]
	async fn cancellation_waits_for_external_event() {
		let mock = Arc::new(Mock::default());
		*mock.hang_tokens.lock() = true;
		let (mut ctx, _) = context(&mock, AgentConfig::default());
		let cancel = CancellationToken::new();

		let canceller = {
			let cancel = cancel.clone();
			tokio::spawn(async move {
				tokio::time::sleep(std::time::Duration::from_millis(10)).await;
				cancel.cancel();
			})
		};
		assert_eq!(enter(&mut ctx, &cancel).await, Event::WaitForExternalEvent);
		canceller.await.unwrap();
		assert!(ctx.runtime.tokens.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn slow_token_source_times_out() {
		let mock = Arc::new(Mock::default());
		*mock.hang_tokens.lock() = true;
		let (mut ctx, broadcaster) = context(&mock, AgentConfig::default());

		assert_eq!(enter(&mut ctx, &CancellationToken::new()).await, Event::Disconnect);
		assert!(broadcaster
			.current()
			.error
			.is_some_and(|e| e.contains("timed out")));
	}
}
