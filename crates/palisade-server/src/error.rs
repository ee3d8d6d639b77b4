// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::config::ConfigError;
use crate::directory::DirectoryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Coarse classification callers use to pick a reaction (retry, surface, drop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	NotFound,
	PoolExhausted,
	InvalidArgument,
	Conflict,
	Transient,
}

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("session not found")]
	SessionNotFound,

	#[error("device not found")]
	DeviceNotFound,

	#[error("gateway not found: {0}")]
	GatewayNotFound(String),

	#[error("no active stream for session")]
	NoActiveStream,

	#[error("no active stream for gateway {0}")]
	NoActiveGatewayStream(String),

	#[error("no available addresses in {pool}")]
	PoolExhausted { pool: String },

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("gateway {0} already has an open stream")]
	GatewayAlreadyConnected(String),

	#[error("push queue is full")]
	StreamBackpressure,

	#[error("push stream closed by subscriber")]
	StreamClosed,

	#[error("directory error: {0}")]
	Directory(#[from] DirectoryError),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("metrics registry error: {0}")]
	Metrics(#[from] prometheus::Error),
}

impl ServerError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			ServerError::SessionNotFound
			| ServerError::DeviceNotFound
			| ServerError::GatewayNotFound(_)
			| ServerError::NoActiveStream
			| ServerError::NoActiveGatewayStream(_) => ErrorKind::NotFound,
			ServerError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
			ServerError::InvalidArgument(_) | ServerError::Config(_) | ServerError::Metrics(_) => {
				ErrorKind::InvalidArgument
			}
			ServerError::GatewayAlreadyConnected(_) => ErrorKind::Conflict,
			ServerError::StreamBackpressure | ServerError::StreamClosed => ErrorKind::Transient,
			ServerError::Directory(e) => e.kind(),
		}
	}
}
