// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::{bounded, on_failure, StateContext};
use crate::error::Result;
use crate::event::Event;
use crate::runtime::Enrollment;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(super) async fn enter(ctx: &mut StateContext, cancel: &CancellationToken) -> Event {
	match bootstrap(ctx, cancel).await {
		Ok(enrollment) => {
			info!(api_endpoint = %enrollment.api_endpoint, "bootstrapped");
			ctx.runtime.api_endpoint = Some(enrollment.api_endpoint.clone());
			ctx.runtime.enrollment = Some(enrollment);
			Event::Bootstrapped
		}
		Err(err) => on_failure(ctx, err),
	}
}

async fn bootstrap(ctx: &mut StateContext, cancel: &CancellationToken) -> Result<Enrollment> {
	let tenant = ctx.runtime.active_tenant().clone();
	let enroller = ctx.collaborators.enroller.clone();

	let persisted = {
		let enroller = enroller.clone();
		let tenant = tenant.clone();
		bounded(cancel, ctx.config.enroll_timeout, "loading enrollment", async move {
			enroller.load(&tenant).await
		})
		.await?
	};
	if let Some(enrollment) = persisted {
		info!("using persisted enrollment");
		return Ok(enrollment);
	}

	let helper = ctx.collaborators.helper.clone();
	let serial = bounded(cancel, ctx.config.helper_timeout, "reading serial", async move {
		helper.serial().await
	})
	.await?;
	let tokens = ctx.tokens(cancel).await?;

	info!(%serial, "enrolling device");
	bounded(cancel, ctx.config.enroll_timeout, "enrollment", async move {
		enroller.enroll(&tenant, &serial, &tokens).await
	})
	.await
}
