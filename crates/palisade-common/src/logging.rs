// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide tracing setup shared by the server and the agent.
//!
//! `RUST_LOG` takes precedence over the default directive passed in.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
	#[error("invalid log filter: {0}")]
	Filter(String),

	#[error("failed to install tracing subscriber: {0}")]
	Init(String),
}

fn env_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
	match EnvFilter::try_from_default_env() {
		Ok(filter) => Ok(filter),
		Err(_) => {
			EnvFilter::try_new(default_directive).map_err(|e| LoggingError::Filter(e.to_string()))
		}
	}
}

/// Installs the global subscriber, failing if one is already set.
pub fn try_init_tracing(default_directive: &str, json: bool) -> Result<(), LoggingError> {
	let filter = env_filter(default_directive)?;
	let registry = tracing_subscriber::registry().with(filter);

	if json {
		registry
			.with(fmt::layer().json())
			.try_init()
			.map_err(|e| LoggingError::Init(e.to_string()))
	} else {
		registry
			.with(fmt::layer())
			.try_init()
			.map_err(|e| LoggingError::Init(e.to_string()))
	}
}

/// Like [`try_init_tracing`], but a second installation is only logged.
pub fn init_tracing(default_directive: &str, json: bool) {
	if let Err(e) = try_init_tracing(default_directive, json) {
		tracing::debug!(error = %e, "tracing already initialised");
	}
}
