// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
	/// The API server could not be reached at all.
	#[error("API server unavailable: {0}")]
	Unavailable(String),

	#[error("unauthenticated: {0}")]
	Unauthenticated(String),

	/// A working connection dropped; reconnect immediately.
	#[error("lost connection: {0}")]
	LostConnection(String),

	#[error("operation cancelled")]
	Cancelled,

	#[error("{0} timed out")]
	Timeout(&'static str),

	#[error("unknown tenant: {0}")]
	UnknownTenant(String),

	#[error("agent has stopped")]
	Stopped,

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("{0}")]
	Other(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
