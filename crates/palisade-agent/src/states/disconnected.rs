// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::StateContext;
use crate::event::Event;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(super) async fn enter(ctx: &mut StateContext, cancel: &CancellationToken) -> Event {
	ctx.runtime.reset_session_scoped();

	if ctx.auto_connect_pending {
		ctx.auto_connect_pending = false;
		info!("auto-connect enabled, logging in");
		return Event::Login;
	}

	cancel.cancelled().await;
	Event::WaitForExternalEvent
}
